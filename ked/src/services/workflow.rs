//! Enrichment job state machine.
//!
//! `PENDING → TRANSCRIPTION → SEARCH → SCRAPING → RESOLVING → SYNTHESIZING`
//! and then one of `SUCCESS`, `PARTIAL`, `FAILED` or `CANCELLED`. Each job
//! runs as its own task. Cancellation is honored only at stage boundaries,
//! so a dispatch wave that has started always runs to completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use nanoid::nanoid;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::config::Config;
use crate::db::DatabaseBackend;
use crate::embeddings::EmbeddingProvider;
use crate::enrichment::traits::person_profiles;
use crate::enrichment::{
    communication_strategy, map_traits, merge_extracted, profile_type, social_hooks,
    ConversationContext, DispatchQuery, Dispatcher, FusionEngine, IdentityResolver,
    NameExtractor, PiiScrubber,
};
use crate::error::{KedError, Result};
use crate::llm::LlmProvider;
use crate::models::{
    Candidate, EnrichmentJob, EnrichmentRequest, EnrichmentResult, FusedProfile, JobStage,
    JobStatus, ResolvedIdentity,
};
use crate::transcription::TranscriptionProvider;

pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";
const INTERRUPTED_BY_SHUTDOWN: &str = "interrupted by shutdown";

const PROFESSIONAL_SOURCES: [&str; 2] = ["linkedin", "github"];
const PROFESSIONAL_FIELDS: [&str; 4] = ["headline", "bio", "experience", "skills"];
const PERSONALITY_SOURCES: [&str; 3] = ["instagram", "tiktok", "twitter"];
const PERSONALITY_FIELDS: [&str; 2] = ["bio", "recent_text"];

pub struct JobListing {
    pub jobs: Vec<JobStatus>,
    pub counts: Vec<(JobStage, u64)>,
}

impl JobListing {
    /// Jobs matching `stage`, or all of the user's jobs.
    pub fn total(&self, stage: Option<JobStage>) -> u64 {
        self.counts
            .iter()
            .filter(|(s, _)| stage.map_or(true, |wanted| wanted == *s))
            .map(|(_, n)| n)
            .sum()
    }
}

/// Everything a job needs once it is running.
struct Prepared {
    transcript: String,
    embedding: Vec<f32>,
}

#[derive(Clone)]
pub struct EnrichmentService {
    db: Arc<dyn DatabaseBackend>,
    embeddings: Arc<EmbeddingProvider>,
    transcription: TranscriptionProvider,
    llm: LlmProvider,
    extractor: NameExtractor,
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<IdentityResolver>,
    fusion: Arc<FusionEngine>,
    scrubber: Arc<PiiScrubber>,
    default_sources: Arc<Vec<String>>,
    source_timeout: Duration,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl EnrichmentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<dyn DatabaseBackend>,
        embeddings: Arc<EmbeddingProvider>,
        transcription: TranscriptionProvider,
        llm: LlmProvider,
        dispatcher: Arc<Dispatcher>,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            db,
            embeddings,
            transcription,
            extractor: NameExtractor::new(llm.clone()),
            llm,
            dispatcher,
            resolver: Arc::new(IdentityResolver::new(config.enrichment.resolution.clone())),
            fusion: Arc::new(FusionEngine::new(config.enrichment.fusion)),
            scrubber: Arc::new(PiiScrubber::new()?),
            default_sources: Arc::new(config.sources.default_sources.clone()),
            source_timeout: Duration::from_secs(config.enrichment.dispatch.source_timeout_secs),
            running: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn default_sources(&self) -> &[String] {
        &self.default_sources
    }

    /// Number of jobs with a live worker task.
    pub fn in_flight(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Validate and persist a new job, then start its worker.
    pub async fn submit(&self, user_id: &str, request: EnrichmentRequest) -> Result<String> {
        request.validate()?;
        if self.shutdown.is_cancelled() {
            return Err(KedError::Internal("service is shutting down".to_string()));
        }

        let audio = match request.audio.as_deref().filter(|a| !a.is_empty()) {
            Some(encoded) => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| KedError::Validation(format!("audio is not valid base64: {e}")))?,
            ),
            None => None,
        };

        let job_id = nanoid!();
        let job = EnrichmentJob::new(job_id.clone(), user_id.to_string(), request.clone());
        self.db.create_job(&job).await?;

        let token = self.shutdown.child_token();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.clone(), token.clone());

        tracing::info!(job_id = %job_id, user_id = %user_id, "Enrichment job submitted");

        let service = self.clone();
        let id = job_id.clone();
        let user = user_id.to_string();
        tokio::spawn(async move {
            service.run(&id, &user, request, audio, &token).await;
            service
                .running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });

        Ok(job_id)
    }

    /// Current status of a job owned by `user_id`. Terminal jobs carry their result.
    pub async fn get_status(&self, job_id: &str, user_id: &str) -> Result<JobStatus> {
        let job = self.load_job(job_id, user_id).await?;
        let result = if job.stage.is_terminal() {
            self.db.get_result(job_id, user_id).await?
        } else {
            None
        };
        Ok(JobStatus::from_job(&job, result))
    }

    /// A user's jobs, newest first, with per-stage totals. Listed jobs
    /// never carry their result; poll the job for that.
    pub async fn list(
        &self,
        user_id: &str,
        stage: Option<JobStage>,
        limit: u32,
    ) -> Result<JobListing> {
        let jobs = self.db.list_jobs(user_id, stage, limit).await?;
        let counts = self.db.count_jobs_by_stage(user_id).await?;
        Ok(JobListing {
            jobs: jobs.iter().map(|job| JobStatus::from_job(job, None)).collect(),
            counts,
        })
    }

    /// Request cooperative cancellation. A terminal job is left untouched.
    pub async fn cancel(&self, job_id: &str, user_id: &str) -> Result<JobStatus> {
        let job = self.load_job(job_id, user_id).await?;
        if job.stage.is_terminal() {
            return self.get_status(job_id, user_id).await;
        }

        self.db.request_cancel(job_id, user_id).await?;
        let token = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned();
        match token {
            Some(token) => {
                tracing::info!(job_id = %job_id, stage = %job.stage, "Cancellation requested");
                token.cancel();
            }
            None => {
                // No worker in this process; nothing else will finish it.
                self.db.finish_job(job_id, JobStage::Cancelled, None).await?;
                tracing::info!(job_id = %job_id, "Cancelled job without a running worker");
            }
        }

        self.get_status(job_id, user_id).await
    }

    /// Fail every job a previous process left running.
    pub async fn sweep_interrupted(&self) -> Result<u64> {
        let swept = self.db.fail_interrupted_jobs(INTERRUPTED_BY_RESTART).await?;
        if swept > 0 {
            tracing::warn!(count = swept, "Marked interrupted enrichment jobs as failed");
        }
        Ok(swept)
    }

    /// Stop accepting work and signal every running job.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn load_job(&self, job_id: &str, user_id: &str) -> Result<EnrichmentJob> {
        self.db
            .get_job(job_id, user_id)
            .await?
            .ok_or_else(|| KedError::NotFound(format!("Enrichment job {job_id} not found")))
    }

    async fn run(
        &self,
        job_id: &str,
        user_id: &str,
        request: EnrichmentRequest,
        audio: Option<Vec<u8>>,
        token: &CancellationToken,
    ) {
        let outcome = self.execute(job_id, user_id, &request, audio, token).await;
        let (stage, error) = match outcome {
            Ok(stage) => (stage, None),
            Err(KedError::Cancelled(_)) if self.shutdown.is_cancelled() => {
                (JobStage::Failed, Some(INTERRUPTED_BY_SHUTDOWN.to_string()))
            }
            Err(KedError::Cancelled(reason)) => {
                tracing::info!(job_id = %job_id, reason = %reason, "Enrichment job cancelled");
                (JobStage::Cancelled, None)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Enrichment job failed");
                (JobStage::Failed, Some(e.to_string()))
            }
        };

        match self.db.finish_job(job_id, stage, error.as_deref()).await {
            Ok(true) => tracing::info!(job_id = %job_id, stage = %stage, "Enrichment job finished"),
            Ok(false) => tracing::debug!(job_id = %job_id, "Job was already terminal"),
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to record job outcome"),
        }
    }

    async fn execute(
        &self,
        job_id: &str,
        user_id: &str,
        request: &EnrichmentRequest,
        audio: Option<Vec<u8>>,
        token: &CancellationToken,
    ) -> Result<JobStage> {
        self.enter(job_id, user_id, JobStage::Transcription, token).await?;
        let prepared = self.prepare(request, audio).await?;

        self.enter(job_id, user_id, JobStage::Search, token).await?;
        let mut ctx = ConversationContext {
            name_hints: request.name_hints.clone(),
            locations: request.locations.clone(),
            professions: request.professions.clone(),
            timeline: request.timeline.clone(),
            text: prepared.transcript.clone(),
        };
        let has_hints = ctx.name_hints.iter().any(|n| !n.trim().is_empty());
        if !has_hints && self.extractor.is_enabled() {
            let persons = self.extractor.extract(&prepared.transcript).await;
            tracing::info!(
                job_id = %job_id,
                extracted = persons.len(),
                "Extracted names from transcript"
            );
            merge_extracted(&mut ctx, &persons);
        }
        let query = DispatchQuery {
            job_id: job_id.to_string(),
            name_hints: ctx.name_hints.clone(),
            context_terms: ctx
                .locations
                .iter()
                .chain(&ctx.professions)
                .cloned()
                .collect(),
        };
        let sources = self.enabled_sources(request.enabled_sources.as_deref());

        self.enter(job_id, user_id, JobStage::Scraping, token).await?;
        let dispatch = self
            .dispatcher
            .dispatch(&query, &sources, self.source_timeout)
            .await;
        let candidates: Vec<Candidate> = dispatch
            .candidates()
            .into_iter()
            .filter(|c| match c.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, source = %c.source, error = %e, "Dropping malformed candidate");
                    false
                }
            })
            .collect();
        self.db.save_candidates(job_id, user_id, &candidates).await?;
        tracing::info!(
            job_id = %job_id,
            found = dispatch.found.len(),
            failed = dispatch.failed.len(),
            skipped = dispatch.skipped.len(),
            candidates = candidates.len(),
            "Dispatch finished"
        );

        self.enter(job_id, user_id, JobStage::Resolving, token).await?;
        let mut ranked = self.resolver.rank(&candidates, &ctx)?;
        if self.llm.rescoring_enabled() {
            ranked = self.resolver.rescore_with_llm(&self.llm, ranked, &ctx).await;
        }
        let identity = self.resolver.classify(ranked);

        self.enter(job_id, user_id, JobStage::Synthesizing, token).await?;
        // Profile vectors join the fusion only for a high-confidence identity.
        let (professional, personality) = if identity.high_confidence {
            self.component_vectors(job_id, &identity, &candidates).await
        } else {
            (None, None)
        };
        let fusion = self.fusion.fuse(
            &prepared.embedding,
            professional.as_deref(),
            personality.as_deref(),
        )?;
        let traits = map_traits(&identity, &candidates);
        let profile = FusedProfile {
            vector: fusion.vector,
            weights: fusion.weights,
            components: fusion.components,
            profile_type: profile_type(&traits),
            strategy: communication_strategy(&traits),
            hooks: social_hooks(&identity, &candidates),
            traits,
        };
        let scrubbed = self.scrubber.scrub(&prepared.transcript);
        let stage = if identity.is_actionable() {
            JobStage::Success
        } else {
            JobStage::Partial
        };
        let result = EnrichmentResult {
            identity,
            profile,
            dispatch: dispatch.summary(),
            transcript: scrubbed.text,
            redactions: scrubbed.redactions,
        };

        self.checkpoint(job_id, user_id, token).await?;
        if !self.db.save_result(job_id, user_id, &result).await? {
            return Err(KedError::Cancelled(
                "job finished before its result was stored".to_string(),
            ));
        }
        Ok(stage)
    }

    /// Stop here if cancellation was requested, either through the token or
    /// through the persisted flag.
    async fn checkpoint(
        &self,
        job_id: &str,
        user_id: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Err(KedError::Cancelled("cancellation requested".to_string()));
        }
        let job = self.load_job(job_id, user_id).await?;
        if job.cancel_requested {
            return Err(KedError::Cancelled("cancellation requested".to_string()));
        }
        if job.stage.is_terminal() {
            return Err(KedError::Cancelled(format!("job already {}", job.stage)));
        }
        Ok(())
    }

    async fn enter(
        &self,
        job_id: &str,
        user_id: &str,
        stage: JobStage,
        token: &CancellationToken,
    ) -> Result<()> {
        self.checkpoint(job_id, user_id, token).await?;
        if !self.db.advance_job(job_id, stage).await? {
            return Err(KedError::Cancelled(format!("job left the pipeline before {stage}")));
        }
        tracing::debug!(job_id = %job_id, stage = %stage, "Stage entered");
        Ok(())
    }

    /// Transcript text and its vector. Either collaborator failing is fatal.
    async fn prepare(
        &self,
        request: &EnrichmentRequest,
        audio: Option<Vec<u8>>,
    ) -> Result<Prepared> {
        let given = request
            .transcript
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let transcript = match (given, audio) {
            (Some(text), _) => text.to_string(),
            (None, Some(bytes)) => self
                .transcription
                .transcribe(&bytes, request.audio_format.as_deref())
                .await?
                .trim()
                .to_string(),
            (None, None) => String::new(),
        };
        if transcript.is_empty() {
            return Err(KedError::Transcription(
                "no transcript text available".to_string(),
            ));
        }

        let embedding = match request.embedding.clone() {
            Some(embedding) => embedding,
            None => self.embeddings.embed_single(&transcript).await?,
        };
        Ok(Prepared {
            transcript,
            embedding,
        })
    }

    /// Requested sources, lowercased and deduplicated, or the configured defaults.
    fn enabled_sources(&self, requested: Option<&[String]>) -> Vec<String> {
        let raw = requested.unwrap_or(&self.default_sources);
        let mut sources: Vec<String> = Vec::with_capacity(raw.len());
        for source in raw {
            let source = source.trim().to_lowercase();
            if !source.is_empty() && !sources.contains(&source) {
                sources.push(source);
            }
        }
        sources
    }

    /// Professional and personality vectors of the resolved person. A failed
    /// embedding leaves that component out.
    async fn component_vectors(
        &self,
        job_id: &str,
        identity: &ResolvedIdentity,
        candidates: &[Candidate],
    ) -> (Option<Vec<f32>>, Option<Vec<f32>>) {
        let profiles = person_profiles(identity, candidates);
        let professional = profile_text(&profiles, &PROFESSIONAL_SOURCES, &PROFESSIONAL_FIELDS);
        let personality = profile_text(&profiles, &PERSONALITY_SOURCES, &PERSONALITY_FIELDS);

        let mut vectors = Vec::with_capacity(2);
        for (component, text) in [("professional", professional), ("personality", personality)] {
            let vector = match text {
                Some(text) => match self.embeddings.embed_single(&text).await {
                    Ok(vector) => Some(vector),
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, component, error = %e, "Component embedding failed, fusing without it");
                        None
                    }
                },
                None => None,
            };
            vectors.push(vector);
        }
        let personality = vectors.pop().flatten();
        let professional = vectors.pop().flatten();
        (professional, personality)
    }
}

fn field_text(candidate: &Candidate, key: &str) -> Option<String> {
    match candidate.fields.get(key)? {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

fn profile_text(profiles: &[&Candidate], sources: &[&str], fields: &[&str]) -> Option<String> {
    let parts: Vec<String> = profiles
        .iter()
        .filter(|c| sources.iter().any(|s| c.source.eq_ignore_ascii_case(s)))
        .flat_map(|c| fields.iter().filter_map(|key| field_text(c, key)))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}
