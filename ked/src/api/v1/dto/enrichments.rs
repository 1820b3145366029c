//! Enrichment job DTOs for the v1 API.
//!
//! Requests submit a conversation for enrichment; responses expose job
//! progress and, once the job is terminal, the resolved identity and fused
//! profile.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{self, Metadata};

// ---------------------------------------------------------------------------
// Request DTOs
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/enrichments`.
///
/// At least one of `transcript` or `audio` must be present. When both are
/// given the transcript is used and the audio is ignored.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEnrichmentRequest {
    /// Conversation transcript.
    pub transcript: Option<String>,
    /// Base64-encoded audio recording. Never stored.
    pub audio: Option<String>,
    /// Audio container hint (e.g. `"mp3"`, `"wav"`).
    pub audio_format: Option<String>,
    /// Precomputed transcript embedding. Computed server-side when absent.
    pub embedding: Option<Vec<f32>>,
    /// Names mentioned in the conversation, most likely first (max 10).
    #[serde(default)]
    pub name_hints: Vec<String>,
    /// Sources to query. Defaults to the server's configured list.
    pub enabled_sources: Option<Vec<String>>,
    /// Places mentioned in the conversation.
    #[serde(default)]
    pub locations: Vec<String>,
    /// Roles or employers mentioned in the conversation.
    #[serde(default)]
    pub professions: Vec<String>,
    /// Dates or periods mentioned in the conversation.
    #[serde(default)]
    pub timeline: Vec<String>,
}

impl From<SubmitEnrichmentRequest> for models::EnrichmentRequest {
    fn from(req: SubmitEnrichmentRequest) -> Self {
        Self {
            transcript: req.transcript,
            audio: req.audio,
            audio_format: req.audio_format,
            embedding: req.embedding,
            name_hints: req.name_hints,
            enabled_sources: req.enabled_sources,
            locations: req.locations,
            professions: req.professions,
            timeline: req.timeline,
        }
    }
}

/// Query parameters for `GET /v1/enrichments`.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListEnrichmentsQuery {
    /// Only jobs currently in this stage.
    pub stage: Option<EnrichmentStage>,
    /// Maximum jobs returned (default 50, max 200).
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Response DTOs
// ---------------------------------------------------------------------------

/// Lifecycle stage of an enrichment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStage {
    Pending,
    Transcription,
    Search,
    Scraping,
    Resolving,
    Synthesizing,
    Success,
    Partial,
    Failed,
    Cancelled,
}

impl From<models::JobStage> for EnrichmentStage {
    fn from(stage: models::JobStage) -> Self {
        match stage {
            models::JobStage::Pending => Self::Pending,
            models::JobStage::Transcription => Self::Transcription,
            models::JobStage::Search => Self::Search,
            models::JobStage::Scraping => Self::Scraping,
            models::JobStage::Resolving => Self::Resolving,
            models::JobStage::Synthesizing => Self::Synthesizing,
            models::JobStage::Success => Self::Success,
            models::JobStage::Partial => Self::Partial,
            models::JobStage::Failed => Self::Failed,
            models::JobStage::Cancelled => Self::Cancelled,
        }
    }
}

impl From<EnrichmentStage> for models::JobStage {
    fn from(stage: EnrichmentStage) -> Self {
        match stage {
            EnrichmentStage::Pending => Self::Pending,
            EnrichmentStage::Transcription => Self::Transcription,
            EnrichmentStage::Search => Self::Search,
            EnrichmentStage::Scraping => Self::Scraping,
            EnrichmentStage::Resolving => Self::Resolving,
            EnrichmentStage::Synthesizing => Self::Synthesizing,
            EnrichmentStage::Success => Self::Success,
            EnrichmentStage::Partial => Self::Partial,
            EnrichmentStage::Failed => Self::Failed,
            EnrichmentStage::Cancelled => Self::Cancelled,
        }
    }
}

/// Response for `POST /v1/enrichments` (HTTP 202).
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEnrichmentResponse {
    /// Handle for polling and cancellation.
    pub job_id: String,
    pub stage: EnrichmentStage,
}

/// Response for `GET /v1/enrichments/{jobId}`.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentStatusResponse {
    pub job_id: String,
    pub stage: EnrichmentStage,
    /// 0-100, never decreasing.
    pub progress_percent: u8,
    /// Human-readable description of the current stage.
    pub stage_label: String,
    pub terminal: bool,
    pub cancel_requested: bool,
    /// Failure reason for `failed` jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present once a `success` or `partial` job is done.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EnrichmentResultResponse>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<models::JobStatus> for EnrichmentStatusResponse {
    fn from(status: models::JobStatus) -> Self {
        Self {
            job_id: status.job_id,
            stage: status.stage.into(),
            progress_percent: status.progress,
            stage_label: status.stage_label,
            terminal: status.terminal,
            cancel_requested: status.cancel_requested,
            error: status.error,
            result: status.result.map(Into::into),
            created_at: status.created_at,
            started_at: status.started_at,
            completed_at: status.completed_at,
        }
    }
}

/// One row of `GET /v1/enrichments`.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentSummaryResponse {
    pub job_id: String,
    pub stage: EnrichmentStage,
    pub progress_percent: u8,
    pub stage_label: String,
    pub terminal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<models::JobStatus> for EnrichmentSummaryResponse {
    fn from(status: models::JobStatus) -> Self {
        Self {
            job_id: status.job_id,
            stage: status.stage.into(),
            progress_percent: status.progress,
            stage_label: status.stage_label,
            terminal: status.terminal,
            error: status.error,
            created_at: status.created_at,
            completed_at: status.completed_at,
        }
    }
}

/// Job count for one stage.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct StageCountResponse {
    pub stage: EnrichmentStage,
    pub count: u64,
}

/// Response for `GET /v1/enrichments`.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListEnrichmentsResponse {
    /// Newest first.
    pub enrichments: Vec<EnrichmentSummaryResponse>,
    /// Totals across all of the caller's jobs, regardless of filters.
    pub counts: Vec<StageCountResponse>,
}

/// Response for `POST /v1/enrichments/{jobId}:cancel`.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelEnrichmentResponse {
    pub job_id: String,
    pub cancel_requested: bool,
    /// Stage at the time of the call. A running job reaches `cancelled`
    /// at its next stage boundary.
    pub stage: EnrichmentStage,
    pub terminal: bool,
}

impl From<models::JobStatus> for CancelEnrichmentResponse {
    fn from(status: models::JobStatus) -> Self {
        Self {
            job_id: status.job_id,
            cancel_requested: status.cancel_requested,
            stage: status.stage.into(),
            terminal: status.terminal,
        }
    }
}

/// Terminal payload of a finished job.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResultResponse {
    pub identity: IdentityResponse,
    pub profile: ProfileResponse,
    pub dispatch: DispatchResponse,
    /// Transcript with PII replaced by `[REDACTED_<KIND>]` markers.
    pub transcript: String,
    /// Number of redactions per PII kind.
    #[schema(value_type = Object)]
    pub redactions: HashMap<String, usize>,
}

impl From<models::EnrichmentResult> for EnrichmentResultResponse {
    fn from(result: models::EnrichmentResult) -> Self {
        Self {
            identity: result.identity.into(),
            profile: result.profile.into(),
            dispatch: result.dispatch.into(),
            transcript: result.transcript,
            redactions: result.redactions,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    /// Best match, absent when no candidate is actionable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen: Option<ScoredCandidateResponse>,
    pub confidence: f32,
    /// `high`, `medium` or `low`.
    pub band: String,
    pub high_confidence: bool,
    pub alternatives: Vec<ScoredCandidateResponse>,
    pub reasoning: String,
}

impl From<models::ResolvedIdentity> for IdentityResponse {
    fn from(identity: models::ResolvedIdentity) -> Self {
        Self {
            chosen: identity.chosen.map(Into::into),
            confidence: identity.confidence,
            band: identity.band.to_string(),
            high_confidence: identity.high_confidence,
            alternatives: identity.alternatives.into_iter().map(Into::into).collect(),
            reasoning: identity.reasoning,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidateResponse {
    pub candidate: CandidateResponse,
    pub confidence: f32,
    pub band: String,
    pub corroborating_sources: Vec<String>,
    pub reasoning: String,
}

impl From<models::ScoredCandidate> for ScoredCandidateResponse {
    fn from(scored: models::ScoredCandidate) -> Self {
        Self {
            candidate: scored.candidate.into(),
            confidence: scored.confidence,
            band: scored.band.to_string(),
            corroborating_sources: scored.corroborating_sources,
            reasoning: scored.reasoning,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CandidateResponse {
    pub source: String,
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub display_name: String,
    /// Source-specific profile fields.
    #[schema(value_type = Object)]
    pub fields: Metadata,
    pub extracted_at: DateTime<Utc>,
}

impl From<models::Candidate> for CandidateResponse {
    fn from(c: models::Candidate) -> Self {
        Self {
            source: c.source,
            external_id: c.external_id,
            url: c.url,
            display_name: c.display_name,
            fields: c.fields,
            extracted_at: c.extracted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TraitScoresResponse {
    pub professional: f32,
    pub creative: f32,
    pub casual: f32,
    pub realtime: f32,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FusionWeightsResponse {
    pub transcript: f32,
    pub professional: f32,
    pub personality: f32,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StrategyResponse {
    pub primary_channels: Vec<String>,
    pub tone: String,
    pub content_focus: String,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    /// Unit-length fused vector.
    pub vector: Vec<f32>,
    /// Weights that contributed; a missing component reports 0.
    pub weights: FusionWeightsResponse,
    pub components: Vec<String>,
    pub traits: TraitScoresResponse,
    /// `<primary>_<secondary>` trait axes, e.g. `professional_realtime`.
    pub profile_type: String,
    pub strategy: StrategyResponse,
    pub hooks: Vec<String>,
}

impl From<models::FusedProfile> for ProfileResponse {
    fn from(p: models::FusedProfile) -> Self {
        Self {
            vector: p.vector,
            weights: FusionWeightsResponse {
                transcript: p.weights.transcript,
                professional: p.weights.professional,
                personality: p.weights.personality,
            },
            components: p.components,
            traits: TraitScoresResponse {
                professional: p.traits.professional,
                creative: p.traits.creative,
                casual: p.traits.casual,
                realtime: p.traits.realtime,
            },
            profile_type: p.profile_type,
            strategy: StrategyResponse {
                primary_channels: p.strategy.primary_channels,
                tone: p.strategy.tone,
                content_focus: p.strategy.content_focus,
            },
            hooks: p.hooks,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceOutcomeResponse {
    pub source: String,
    /// `success`, `timeout`, `error` or `skipped`.
    pub outcome: String,
    pub latency_ms: u64,
    pub candidates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-source accounting of the dispatch wave.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub sources: Vec<SourceOutcomeResponse>,
    pub found: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_latency_ms: u64,
}

impl From<models::DispatchSummary> for DispatchResponse {
    fn from(d: models::DispatchSummary) -> Self {
        Self {
            sources: d
                .sources
                .into_iter()
                .map(|s| SourceOutcomeResponse {
                    source: s.source,
                    outcome: s.outcome.to_string(),
                    latency_ms: s.latency_ms,
                    candidates: s.candidates,
                    detail: s.detail,
                })
                .collect(),
            found: d.found,
            failed: d.failed,
            skipped: d.skipped,
            total_latency_ms: d.total_latency_ms,
        }
    }
}
