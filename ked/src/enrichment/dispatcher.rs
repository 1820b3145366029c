//! Concurrent fan-out of one query to every enabled source.
//!
//! One task per launched source, joined under a single wall-clock ceiling of
//! `per_source_timeout + margin`. Every enabled source ends up in exactly one
//! of `found`, `failed` or `skipped`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinSet;

use super::circuit::{CircuitManager, EgressHandle, FailureReason};
use super::rate_limiter::RateLimiter;
use super::sources::{QueryContext, SourceError, SourceRegistry};
use crate::models::{Candidate, DispatchSummary, QueryOutcome, SourceQuery, SourceSummary};

/// What to look for.
#[derive(Debug, Clone, Default)]
pub struct DispatchQuery {
    pub job_id: String,
    pub name_hints: Vec<String>,
    pub context_terms: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    pub found: Vec<SourceQuery>,
    pub failed: Vec<SourceQuery>,
    pub skipped: Vec<SourceQuery>,
    pub total_latency: Duration,
}

impl DispatchResult {
    /// Candidates from every successful source, first occurrence wins on duplicates.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut seen = std::collections::HashSet::new();
        self.found
            .iter()
            .flat_map(|q| q.candidates.iter())
            .filter(|c| seen.insert(c.fingerprint()))
            .cloned()
            .collect()
    }

    pub fn failed_sources(&self) -> Vec<String> {
        self.failed.iter().map(|q| q.source.clone()).collect()
    }

    pub fn accounted(&self) -> usize {
        self.found.len() + self.failed.len() + self.skipped.len()
    }

    pub fn summary(&self) -> DispatchSummary {
        let sources = self
            .found
            .iter()
            .chain(&self.failed)
            .chain(&self.skipped)
            .map(|q| SourceSummary {
                source: q.source.clone(),
                outcome: q.outcome,
                latency_ms: q.latency_ms,
                candidates: q.candidates.len(),
                detail: q.detail.clone(),
            })
            .collect();
        DispatchSummary {
            sources,
            found: self.found.len(),
            failed: self.failed.len(),
            skipped: self.skipped.len(),
            total_latency_ms: self.total_latency.as_millis() as u64,
        }
    }
}

struct Launched {
    source: String,
    egress: EgressHandle,
}

struct Completed {
    index: usize,
    outcome: Result<Vec<Candidate>, SourceError>,
    latency: Duration,
}

pub struct Dispatcher {
    registry: Arc<SourceRegistry>,
    rate_limiter: Arc<RateLimiter>,
    circuit: Arc<CircuitManager>,
    margin: Duration,
    max_results: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SourceRegistry>,
        rate_limiter: Arc<RateLimiter>,
        circuit: Arc<CircuitManager>,
        margin: Duration,
    ) -> Self {
        Self {
            registry,
            rate_limiter,
            circuit,
            margin,
            max_results: 5,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn circuit(&self) -> &CircuitManager {
        &self.circuit
    }

    pub async fn dispatch(
        &self,
        query: &DispatchQuery,
        enabled_sources: &[String],
        per_source_timeout: Duration,
    ) -> DispatchResult {
        let started = Instant::now();
        let terms: Vec<String> = query
            .name_hints
            .iter()
            .chain(&query.context_terms)
            .cloned()
            .collect();

        let mut skipped: Vec<(usize, SourceQuery)> = Vec::new();
        let mut found: Vec<(usize, SourceQuery)> = Vec::new();
        let mut failed: Vec<(usize, SourceQuery)> = Vec::new();
        let mut pending: HashMap<usize, Launched> = HashMap::new();
        let mut set = JoinSet::new();
        let deadline_ms = per_source_timeout.as_millis() as u64;

        for (index, raw) in enabled_sources.iter().enumerate() {
            let source = raw.trim().to_lowercase();

            let Some(adapter) = self.registry.get(&source) else {
                tracing::info!(job_id = %query.job_id, source = %source, "Source not registered, skipping");
                skipped.push((index, SourceQuery::skipped(&source, &terms, "unregistered")));
                continue;
            };
            if !self.circuit.is_available(&source) {
                tracing::info!(job_id = %query.job_id, source = %source, "Circuit open, skipping");
                skipped.push((index, SourceQuery::skipped(&source, &terms, "circuit_open")));
                continue;
            }
            if !self.rate_limiter.allow(&source) {
                tracing::info!(job_id = %query.job_id, source = %source, "Rate limit reached, skipping");
                skipped.push((index, SourceQuery::skipped(&source, &terms, "rate_limited")));
                continue;
            }
            let Some(egress) = self
                .circuit
                .select_egress_for(&source, adapter.source_class())
            else {
                tracing::info!(job_id = %query.job_id, source = %source, "No egress available, skipping");
                skipped.push((index, SourceQuery::skipped(&source, &terms, "no_egress")));
                continue;
            };

            let ctx = QueryContext {
                job_id: query.job_id.clone(),
                name_hints: query.name_hints.clone(),
                context_terms: query.context_terms.clone(),
                deadline: Instant::now() + per_source_timeout,
                egress: egress.clone(),
                max_results: self.max_results,
            };
            pending.insert(index, Launched { source, egress });

            set.spawn(async move {
                let begun = Instant::now();
                let call = AssertUnwindSafe(adapter.query(&ctx)).catch_unwind();
                let outcome = match tokio::time::timeout(per_source_timeout, call).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(SourceError::Unavailable("adapter panicked".to_string())),
                    Err(_) => Err(SourceError::Timeout),
                };
                Completed {
                    index,
                    outcome,
                    latency: begun.elapsed(),
                }
            });
        }

        let ceiling = tokio::time::sleep(per_source_timeout + self.margin);
        tokio::pin!(ceiling);

        while !pending.is_empty() {
            tokio::select! {
                joined = set.join_next() => {
                    let Some(joined) = joined else { break };
                    let Ok(done) = joined else { continue };
                    let Some(launched) = pending.remove(&done.index) else { continue };
                    let entry = self.complete(
                        &query.job_id,
                        &terms,
                        deadline_ms,
                        launched,
                        done.outcome,
                        done.latency,
                    );
                    match entry.outcome {
                        QueryOutcome::Success => found.push((done.index, entry)),
                        _ => failed.push((done.index, entry)),
                    }
                }
                _ = &mut ceiling => {
                    set.abort_all();
                    break;
                }
            }
        }

        // Anything still pending was abandoned at the ceiling.
        let abandoned: Vec<(usize, Launched)> = pending.drain().collect();
        for (index, launched) in abandoned {
            let entry = self.complete(
                &query.job_id,
                &terms,
                deadline_ms,
                launched,
                Err(SourceError::Timeout),
                started.elapsed(),
            );
            failed.push((index, entry));
        }

        let ordered = |mut v: Vec<(usize, SourceQuery)>| {
            v.sort_by_key(|(i, _)| *i);
            v.into_iter().map(|(_, q)| q).collect::<Vec<_>>()
        };
        let result = DispatchResult {
            found: ordered(found),
            failed: ordered(failed),
            skipped: ordered(skipped),
            total_latency: started.elapsed(),
        };

        tracing::info!(
            job_id = %query.job_id,
            found = result.found.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            latency_ms = result.total_latency.as_millis() as u64,
            "Dispatch wave complete"
        );
        result
    }

    /// Record one finished (or abandoned) source. Called once per launch.
    fn complete(
        &self,
        job_id: &str,
        terms: &[String],
        deadline_ms: u64,
        launched: Launched,
        outcome: Result<Vec<Candidate>, SourceError>,
        latency: Duration,
    ) -> SourceQuery {
        let Launched { source, egress } = launched;
        let latency_ms = latency.as_millis() as u64;

        match outcome {
            Ok(mut candidates) => {
                self.circuit.record_success(&source);
                self.circuit.record_egress_success(&egress);
                // Adapters own their source name; stamp it so downstream grouping holds.
                for c in &mut candidates {
                    c.source = source.clone();
                }
                tracing::debug!(
                    job_id = %job_id,
                    source = %source,
                    candidates = candidates.len(),
                    latency_ms,
                    "Source query succeeded"
                );
                SourceQuery {
                    source,
                    terms: terms.to_vec(),
                    deadline_ms,
                    outcome: QueryOutcome::Success,
                    latency_ms,
                    candidates,
                    detail: None,
                }
            }
            Err(e) => {
                let reason = e.failure_reason();
                self.circuit.record_failure(&source, reason);
                if matches!(
                    reason,
                    FailureReason::Captcha
                        | FailureReason::RateLimited
                        | FailureReason::Blocked
                        | FailureReason::Timeout
                ) {
                    self.circuit.record_egress_failure(&egress);
                }
                tracing::warn!(
                    job_id = %job_id,
                    source = %source,
                    reason = %reason,
                    error = %e,
                    latency_ms,
                    "Source query failed"
                );
                SourceQuery {
                    source,
                    terms: terms.to_vec(),
                    deadline_ms,
                    outcome: if reason == FailureReason::Timeout {
                        QueryOutcome::Timeout
                    } else {
                        QueryOutcome::Error
                    },
                    latency_ms,
                    candidates: Vec::new(),
                    detail: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitConfig, RateLimitRule};
    use crate::enrichment::sources::SourceAdapter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Found(usize),
        Fail(SourceError),
        Hang,
        Panic,
    }

    struct FakeAdapter {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl FakeAdapter {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn source_class(&self) -> &str {
            "residential"
        }

        async fn query(&self, _ctx: &QueryContext) -> Result<Vec<Candidate>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Found(n) => Ok((0..*n)
                    .map(|i| Candidate::new("ignored", format!("{}-{i}", self.name), "Jane Doe"))
                    .collect()),
                Behavior::Fail(e) => Err(e.clone()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                }
                Behavior::Panic => panic!("adapter exploded"),
            }
        }
    }

    fn dispatcher(
        adapters: Vec<Arc<FakeAdapter>>,
        limits: HashMap<String, RateLimitRule>,
    ) -> Dispatcher {
        let mut registry = SourceRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        Dispatcher::new(
            Arc::new(registry),
            Arc::new(RateLimiter::new(&limits)),
            Arc::new(CircuitManager::new(CircuitConfig::default(), &[])),
            Duration::from_millis(100),
        )
    }

    fn query() -> DispatchQuery {
        DispatchQuery {
            job_id: "job-1".to_string(),
            name_hints: vec!["Jane Doe".to_string()],
            context_terms: vec![],
        }
    }

    fn sources(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_every_source_accounted_once() {
        let d = dispatcher(
            vec![
                FakeAdapter::new("linkedin", Behavior::Found(2)),
                FakeAdapter::new("github", Behavior::Fail(SourceError::Blocked(403))),
                FakeAdapter::new("twitter", Behavior::Found(0)),
            ],
            HashMap::new(),
        );
        let enabled = sources(&["linkedin", "github", "twitter", "myspace"]);
        let result = d.dispatch(&query(), &enabled, Duration::from_secs(2)).await;

        assert_eq!(result.accounted(), enabled.len());
        assert_eq!(result.found.len(), 2);
        assert_eq!(result.failed_sources(), vec!["github".to_string()]);
        assert_eq!(result.skipped[0].detail.as_deref(), Some("unregistered"));
        assert_eq!(result.candidates().len(), 2);
        assert!(result.candidates().iter().all(|c| c.source == "linkedin"));
    }

    #[tokio::test]
    async fn test_hanging_source_is_abandoned_as_timeout() {
        let d = dispatcher(
            vec![
                FakeAdapter::new("linkedin", Behavior::Found(1)),
                FakeAdapter::new("tiktok", Behavior::Hang),
            ],
            HashMap::new(),
        );
        let begun = Instant::now();
        let result = d
            .dispatch(&query(), &sources(&["linkedin", "tiktok"]), Duration::from_millis(200))
            .await;

        assert!(begun.elapsed() < Duration::from_secs(2));
        assert_eq!(result.found.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].outcome, QueryOutcome::Timeout);
        assert_eq!(result.failed[0].source, "tiktok");
    }

    #[tokio::test]
    async fn test_hanging_sources_share_one_wave_ceiling() {
        let hanging = ["linkedin", "github", "twitter", "tiktok"];
        let mut adapters: Vec<Arc<FakeAdapter>> = hanging
            .iter()
            .map(|&name| FakeAdapter::new(name, Behavior::Hang))
            .collect();
        adapters.push(FakeAdapter::new("web", Behavior::Found(1)));
        let d = dispatcher(adapters, HashMap::new());

        let timeout = Duration::from_millis(200);
        let mut enabled = sources(&hanging);
        enabled.push("web".to_string());
        let begun = Instant::now();
        let result = d.dispatch(&query(), &enabled, timeout).await;
        let elapsed = begun.elapsed();

        // Four sequential timeouts would take 800ms.
        assert!(
            elapsed < timeout + d.margin + Duration::from_millis(150),
            "wave took {elapsed:?}"
        );
        assert_eq!(result.accounted(), enabled.len());
        assert_eq!(result.found.len(), 1);
        assert_eq!(result.failed.len(), hanging.len());
        for (entry, name) in result.failed.iter().zip(hanging) {
            assert_eq!(entry.source, name);
            assert_eq!(entry.outcome, QueryOutcome::Timeout);
        }
    }

    #[tokio::test]
    async fn test_panicking_adapter_is_a_failure_not_a_crash() {
        let d = dispatcher(vec![FakeAdapter::new("web", Behavior::Panic)], HashMap::new());
        let result = d.dispatch(&query(), &sources(&["web"]), Duration::from_secs(1)).await;
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].outcome, QueryOutcome::Error);
    }

    #[tokio::test]
    async fn test_rate_limited_source_is_skipped_without_call() {
        let adapter = FakeAdapter::new("instagram", Behavior::Found(1));
        let limits = HashMap::from([(
            "instagram".to_string(),
            RateLimitRule {
                limit: 1,
                window_secs: 60,
            },
        )]);
        let d = dispatcher(vec![Arc::clone(&adapter)], limits);

        let first = d.dispatch(&query(), &sources(&["instagram"]), Duration::from_secs(1)).await;
        let second = d.dispatch(&query(), &sources(&["instagram"]), Duration::from_secs(1)).await;

        assert_eq!(first.found.len(), 1);
        assert_eq!(second.skipped.len(), 1);
        assert_eq!(second.skipped[0].detail.as_deref(), Some("rate_limited"));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_circuit_trips_after_three_failures_and_skips() {
        let adapter = FakeAdapter::new("linkedin", Behavior::Fail(SourceError::Captcha));
        let d = dispatcher(vec![Arc::clone(&adapter)], HashMap::new());
        let enabled = sources(&["linkedin"]);

        for _ in 0..3 {
            let r = d.dispatch(&query(), &enabled, Duration::from_secs(1)).await;
            assert_eq!(r.failed.len(), 1);
        }
        let r = d.dispatch(&query(), &enabled, Duration::from_secs(1)).await;
        assert_eq!(r.skipped.len(), 1);
        assert_eq!(r.skipped[0].detail.as_deref(), Some("circuit_open"));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_sources_is_a_valid_empty_result() {
        let d = dispatcher(vec![], HashMap::new());
        let result = d.dispatch(&query(), &[], Duration::from_secs(1)).await;
        assert_eq!(result.accounted(), 0);
        assert!(result.candidates().is_empty());
        let summary = result.summary();
        assert_eq!(summary.found + summary.failed + summary.skipped, 0);
    }
}
