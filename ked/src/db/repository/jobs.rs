use chrono::Utc;
use libsql::{params, Connection};

use super::parse_timestamp;
use crate::db::schema::TERMINAL_STAGES_SQL;
use crate::error::Result;
use crate::models::{EnrichmentJob, JobStage};

pub struct JobRepository;

impl JobRepository {
    pub async fn create(conn: &Connection, job: &EnrichmentJob) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO enrichment_jobs (
                id, user_id, stage, progress, stage_label, cancel_requested, error,
                request, created_at, started_at, completed_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                job.id.clone(),
                job.user_id.clone(),
                job.stage.to_string(),
                i64::from(job.progress),
                job.stage_label.clone(),
                i64::from(job.cancel_requested),
                job.error.clone(),
                serde_json::to_string(&job.request)?,
                job.created_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.updated_at.to_rfc3339(),
            ],
        )
        .await?;

        Ok(())
    }

    pub async fn get(
        conn: &Connection,
        job_id: &str,
        user_id: &str,
    ) -> Result<Option<EnrichmentJob>> {
        let mut rows = conn
            .query(
                r#"
                SELECT id, user_id, stage, progress, stage_label, cancel_requested, error,
                       request, created_at, started_at, completed_at, updated_at
                FROM enrichment_jobs WHERE id = ?1 AND user_id = ?2
                "#,
                params![job_id, user_id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_job(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Newest first. `stage` narrows the listing to one stage.
    pub async fn list(
        conn: &Connection,
        user_id: &str,
        stage: Option<JobStage>,
        limit: u32,
    ) -> Result<Vec<EnrichmentJob>> {
        let mut rows = conn
            .query(
                r#"
                SELECT id, user_id, stage, progress, stage_label, cancel_requested, error,
                       request, created_at, started_at, completed_at, updated_at
                FROM enrichment_jobs
                WHERE user_id = ?1 AND (?2 IS NULL OR stage = ?2)
                ORDER BY created_at DESC, id DESC
                LIMIT ?3
                "#,
                params![user_id, stage.map(|s| s.to_string()), i64::from(limit)],
            )
            .await?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await? {
            jobs.push(Self::row_to_job(&row)?);
        }
        Ok(jobs)
    }

    /// Job counts per stage for one user. Stages without jobs are absent.
    pub async fn count_by_stage(
        conn: &Connection,
        user_id: &str,
    ) -> Result<Vec<(JobStage, u64)>> {
        let mut rows = conn
            .query(
                "SELECT stage, COUNT(*) FROM enrichment_jobs WHERE user_id = ?1 GROUP BY stage",
                params![user_id],
            )
            .await?;

        let mut counts = Vec::new();
        while let Some(row) = rows.next().await? {
            let Ok(stage) = row.get::<String>(0)?.parse::<JobStage>() else {
                continue;
            };
            counts.push((stage, row.get::<i64>(1)?.max(0) as u64));
        }
        counts.sort_by_key(|(stage, _)| (stage.progress(), stage.to_string()));
        Ok(counts)
    }

    pub async fn advance(conn: &Connection, job_id: &str, stage: JobStage) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            r#"
            UPDATE enrichment_jobs SET
                stage = ?2,
                progress = MAX(progress, ?3),
                stage_label = ?4,
                started_at = COALESCE(started_at, ?5),
                updated_at = ?5
            WHERE id = ?1 AND stage NOT IN {TERMINAL_STAGES_SQL}
            "#
        );
        let affected = conn
            .execute(
                &sql,
                params![
                    job_id,
                    stage.to_string(),
                    i64::from(stage.progress()),
                    stage.label(),
                    now
                ],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn request_cancel(conn: &Connection, job_id: &str, user_id: &str) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE enrichment_jobs SET cancel_requested = 1, updated_at = ?3
            WHERE id = ?1 AND user_id = ?2 AND stage NOT IN {TERMINAL_STAGES_SQL}
            "#
        );
        let affected = conn
            .execute(&sql, params![job_id, user_id, Utc::now().to_rfc3339()])
            .await?;
        Ok(affected > 0)
    }

    pub async fn finish(
        conn: &Connection,
        job_id: &str,
        stage: JobStage,
        error: Option<&str>,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            r#"
            UPDATE enrichment_jobs SET
                stage = ?2,
                progress = MAX(progress, ?3),
                stage_label = ?4,
                error = ?5,
                completed_at = ?6,
                updated_at = ?6
            WHERE id = ?1 AND stage NOT IN {TERMINAL_STAGES_SQL}
            "#
        );
        let affected = conn
            .execute(
                &sql,
                params![
                    job_id,
                    stage.to_string(),
                    i64::from(stage.progress()),
                    stage.label(),
                    error.map(str::to_string),
                    now
                ],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn fail_interrupted(conn: &Connection, reason: &str) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let failed = JobStage::Failed;
        let sql = format!(
            r#"
            UPDATE enrichment_jobs SET
                stage = ?1,
                progress = MAX(progress, ?2),
                stage_label = ?3,
                error = ?4,
                completed_at = ?5,
                updated_at = ?5
            WHERE stage NOT IN {TERMINAL_STAGES_SQL}
            "#
        );
        let affected = conn
            .execute(
                &sql,
                params![
                    failed.to_string(),
                    i64::from(failed.progress()),
                    failed.label(),
                    reason,
                    now
                ],
            )
            .await?;
        Ok(affected)
    }

    fn row_to_job(row: &libsql::Row) -> Result<EnrichmentJob> {
        let stage = row
            .get::<String>(2)?
            .parse()
            .unwrap_or(JobStage::Failed);
        let progress = row.get::<i64>(3)?.clamp(0, 100) as u8;

        Ok(EnrichmentJob {
            id: row.get(0)?,
            user_id: row.get(1)?,
            stage,
            progress,
            stage_label: row.get(4)?,
            cancel_requested: row.get::<i64>(5)? != 0,
            error: row.get(6)?,
            request: serde_json::from_str(&row.get::<String>(7)?).unwrap_or_default(),
            created_at: parse_timestamp(&row.get::<String>(8)?),
            started_at: row.get::<Option<String>>(9)?.as_deref().map(parse_timestamp),
            completed_at: row.get::<Option<String>>(10)?.as_deref().map(parse_timestamp),
            updated_at: parse_timestamp(&row.get::<String>(11)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_connection;
    use crate::models::EnrichmentRequest;

    fn job(id: &str, user: &str) -> EnrichmentJob {
        EnrichmentJob::new(
            id.to_string(),
            user.to_string(),
            EnrichmentRequest {
                transcript: Some("Met Jane Doe".to_string()),
                name_hints: vec!["Jane Doe".to_string()],
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_create_and_get_is_scoped_by_user() {
        let conn = test_connection().await;
        JobRepository::create(&conn, &job("job_1", "alice")).await.unwrap();

        let loaded = JobRepository::get(&conn, "job_1", "alice").await.unwrap().unwrap();
        assert_eq!(loaded.stage, JobStage::Pending);
        assert_eq!(loaded.progress, 0);
        assert_eq!(loaded.request.name_hints, vec!["Jane Doe"]);
        assert!(loaded.started_at.is_none());

        assert!(JobRepository::get(&conn, "job_1", "mallory").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_advance_sets_started_and_progress() {
        let conn = test_connection().await;
        JobRepository::create(&conn, &job("job_1", "alice")).await.unwrap();

        assert!(JobRepository::advance(&conn, "job_1", JobStage::Scraping).await.unwrap());
        let loaded = JobRepository::get(&conn, "job_1", "alice").await.unwrap().unwrap();
        assert_eq!(loaded.stage, JobStage::Scraping);
        assert_eq!(loaded.progress, 40);
        assert_eq!(loaded.stage_label, JobStage::Scraping.label());
        assert!(loaded.started_at.is_some());
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let conn = test_connection().await;
        JobRepository::create(&conn, &job("job_1", "alice")).await.unwrap();

        JobRepository::advance(&conn, "job_1", JobStage::Resolving).await.unwrap();
        JobRepository::advance(&conn, "job_1", JobStage::Search).await.unwrap();
        let loaded = JobRepository::get(&conn, "job_1", "alice").await.unwrap().unwrap();
        assert_eq!(loaded.progress, 70);
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_immutable() {
        let conn = test_connection().await;
        JobRepository::create(&conn, &job("job_1", "alice")).await.unwrap();

        assert!(JobRepository::finish(&conn, "job_1", JobStage::Partial, None).await.unwrap());
        assert!(!JobRepository::advance(&conn, "job_1", JobStage::Scraping).await.unwrap());
        assert!(!JobRepository::finish(&conn, "job_1", JobStage::Failed, Some("late"))
            .await
            .unwrap());
        assert!(!JobRepository::request_cancel(&conn, "job_1", "alice").await.unwrap());

        let loaded = JobRepository::get(&conn, "job_1", "alice").await.unwrap().unwrap();
        assert_eq!(loaded.stage, JobStage::Partial);
        assert_eq!(loaded.progress, 100);
        assert!(loaded.error.is_none());
        assert!(loaded.completed_at.is_some());
        assert!(!loaded.cancel_requested);
    }

    #[tokio::test]
    async fn test_request_cancel_requires_owner() {
        let conn = test_connection().await;
        JobRepository::create(&conn, &job("job_1", "alice")).await.unwrap();

        assert!(!JobRepository::request_cancel(&conn, "job_1", "mallory").await.unwrap());
        assert!(JobRepository::request_cancel(&conn, "job_1", "alice").await.unwrap());
        let loaded = JobRepository::get(&conn, "job_1", "alice").await.unwrap().unwrap();
        assert!(loaded.cancel_requested);
        assert_eq!(loaded.stage, JobStage::Pending);
    }

    #[tokio::test]
    async fn test_fail_interrupted_only_touches_running_jobs() {
        let conn = test_connection().await;
        JobRepository::create(&conn, &job("running", "alice")).await.unwrap();
        JobRepository::create(&conn, &job("done", "alice")).await.unwrap();
        JobRepository::advance(&conn, "running", JobStage::Scraping).await.unwrap();
        JobRepository::finish(&conn, "done", JobStage::Success, None).await.unwrap();

        let swept = JobRepository::fail_interrupted(&conn, "interrupted by restart").await.unwrap();
        assert_eq!(swept, 1);

        let running = JobRepository::get(&conn, "running", "alice").await.unwrap().unwrap();
        assert_eq!(running.stage, JobStage::Failed);
        assert_eq!(running.error.as_deref(), Some("interrupted by restart"));
        let done = JobRepository::get(&conn, "done", "alice").await.unwrap().unwrap();
        assert_eq!(done.stage, JobStage::Success);
    }

    #[tokio::test]
    async fn test_list_is_owner_scoped_and_filtered() {
        let conn = test_connection().await;
        for (id, user) in [("a", "alice"), ("b", "alice"), ("c", "alice"), ("m", "mallory")] {
            let mut j = job(id, user);
            j.created_at = j.created_at + chrono::Duration::seconds(id.as_bytes()[0] as i64);
            JobRepository::create(&conn, &j).await.unwrap();
        }
        JobRepository::finish(&conn, "b", JobStage::Partial, None).await.unwrap();

        let all = JobRepository::list(&conn, "alice", None, 10).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let limited = JobRepository::list(&conn, "alice", None, 2).await.unwrap();
        assert_eq!(limited.len(), 2);

        let partial = JobRepository::list(&conn, "alice", Some(JobStage::Partial), 10)
            .await
            .unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].id, "b");

        let counts = JobRepository::count_by_stage(&conn, "alice").await.unwrap();
        assert_eq!(counts, vec![(JobStage::Pending, 2), (JobStage::Partial, 1)]);
        assert!(JobRepository::count_by_stage(&conn, "nobody").await.unwrap().is_empty());
    }
}
