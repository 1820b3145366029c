use async_trait::async_trait;

use crate::db::connection::Database;
use crate::db::repository::{CandidateRepository, JobRepository, ResultRepository};
use crate::db::traits::{CandidateStore, DatabaseBackend, JobStore, ResultStore};
use crate::error::Result;
use crate::models::{Candidate, EnrichmentJob, EnrichmentResult, JobStage};

pub struct LibSqlBackend {
    db: Database,
}

impl LibSqlBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for LibSqlBackend {
    async fn create_job(&self, job: &EnrichmentJob) -> Result<()> {
        let conn = self.db.connect().await?;
        JobRepository::create(&conn, job).await
    }
    async fn get_job(&self, job_id: &str, user_id: &str) -> Result<Option<EnrichmentJob>> {
        let conn = self.db.connect().await?;
        JobRepository::get(&conn, job_id, user_id).await
    }
    async fn list_jobs(
        &self,
        user_id: &str,
        stage: Option<JobStage>,
        limit: u32,
    ) -> Result<Vec<EnrichmentJob>> {
        let conn = self.db.connect().await?;
        JobRepository::list(&conn, user_id, stage, limit).await
    }
    async fn count_jobs_by_stage(&self, user_id: &str) -> Result<Vec<(JobStage, u64)>> {
        let conn = self.db.connect().await?;
        JobRepository::count_by_stage(&conn, user_id).await
    }
    async fn advance_job(&self, job_id: &str, stage: JobStage) -> Result<bool> {
        let conn = self.db.connect().await?;
        JobRepository::advance(&conn, job_id, stage).await
    }
    async fn request_cancel(&self, job_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.db.connect().await?;
        JobRepository::request_cancel(&conn, job_id, user_id).await
    }
    async fn finish_job(&self, job_id: &str, stage: JobStage, error: Option<&str>) -> Result<bool> {
        let conn = self.db.connect().await?;
        JobRepository::finish(&conn, job_id, stage, error).await
    }
    async fn fail_interrupted_jobs(&self, reason: &str) -> Result<u64> {
        let conn = self.db.connect().await?;
        JobRepository::fail_interrupted(&conn, reason).await
    }
}

#[async_trait]
impl CandidateStore for LibSqlBackend {
    async fn save_candidates(
        &self,
        job_id: &str,
        user_id: &str,
        candidates: &[Candidate],
    ) -> Result<()> {
        let conn = self.db.connect().await?;
        CandidateRepository::create_batch(&conn, job_id, user_id, candidates).await
    }
    async fn get_candidates(&self, job_id: &str, user_id: &str) -> Result<Vec<Candidate>> {
        let conn = self.db.connect().await?;
        CandidateRepository::list_for_job(&conn, job_id, user_id).await
    }
}

#[async_trait]
impl ResultStore for LibSqlBackend {
    async fn save_result(
        &self,
        job_id: &str,
        user_id: &str,
        result: &EnrichmentResult,
    ) -> Result<bool> {
        let conn = self.db.connect().await?;
        ResultRepository::save(&conn, job_id, user_id, result).await
    }
    async fn get_result(&self, job_id: &str, user_id: &str) -> Result<Option<EnrichmentResult>> {
        let conn = self.db.connect().await?;
        ResultRepository::get(&conn, job_id, user_id).await
    }
}

#[async_trait]
impl DatabaseBackend for LibSqlBackend {
    async fn sync(&self) -> Result<()> {
        self.db.sync().await
    }
}
