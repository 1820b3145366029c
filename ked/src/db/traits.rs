use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Candidate, EnrichmentJob, EnrichmentResult, JobStage};

// ---------------------------------------------------------------------------
// Individual store traits
// ---------------------------------------------------------------------------

/// Lifecycle of enrichment jobs. Every mutation is a no-op on a terminal job;
/// the returned `bool` says whether a row changed.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &EnrichmentJob) -> Result<()>;
    async fn get_job(&self, job_id: &str, user_id: &str) -> Result<Option<EnrichmentJob>>;

    /// A user's jobs, newest first, optionally narrowed to one stage.
    async fn list_jobs(
        &self,
        user_id: &str,
        stage: Option<JobStage>,
        limit: u32,
    ) -> Result<Vec<EnrichmentJob>>;

    /// How many of a user's jobs sit in each stage.
    async fn count_jobs_by_stage(&self, user_id: &str) -> Result<Vec<(JobStage, u64)>>;

    /// Move a running job to `stage`. Progress never decreases.
    async fn advance_job(&self, job_id: &str, stage: JobStage) -> Result<bool>;

    /// Set the cooperative cancellation flag.
    async fn request_cancel(&self, job_id: &str, user_id: &str) -> Result<bool>;

    /// Enter a terminal stage.
    async fn finish_job(&self, job_id: &str, stage: JobStage, error: Option<&str>) -> Result<bool>;

    /// Mark every non-terminal job as failed. Used at startup, when no
    /// worker from a previous process can still be running.
    async fn fail_interrupted_jobs(&self, reason: &str) -> Result<u64>;
}

/// Candidates gathered for a job.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn save_candidates(
        &self,
        job_id: &str,
        user_id: &str,
        candidates: &[Candidate],
    ) -> Result<()>;
    async fn get_candidates(&self, job_id: &str, user_id: &str) -> Result<Vec<Candidate>>;
}

/// Terminal enrichment output.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist `result` while the job is still running. Returns `false`
    /// when the job is already terminal or unknown.
    async fn save_result(
        &self,
        job_id: &str,
        user_id: &str,
        result: &EnrichmentResult,
    ) -> Result<bool>;
    async fn get_result(&self, job_id: &str, user_id: &str) -> Result<Option<EnrichmentResult>>;
}

// ---------------------------------------------------------------------------
// Unified backend supertrait
// ---------------------------------------------------------------------------

/// A complete database backend that combines all store traits plus lifecycle
/// operations.
#[async_trait]
pub trait DatabaseBackend: JobStore + CandidateStore + ResultStore {
    /// Sync with remote (e.g. Turso replication). No-op for local-only backends.
    async fn sync(&self) -> Result<()>;
}
