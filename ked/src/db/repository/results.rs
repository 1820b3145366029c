use chrono::Utc;
use libsql::{params, Connection};

use crate::db::schema::TERMINAL_STAGES_SQL;
use crate::error::Result;
use crate::models::EnrichmentResult;

pub struct ResultRepository;

impl ResultRepository {
    /// Store the result of a job that is still running. Returns `false` if
    /// the job is unknown, owned by someone else, or already terminal.
    pub async fn save(
        conn: &Connection,
        job_id: &str,
        user_id: &str,
        result: &EnrichmentResult,
    ) -> Result<bool> {
        let sql = format!(
            r#"
            INSERT OR REPLACE INTO enrichment_results (
                job_id, user_id, identity, profile, dispatch, transcript, redactions, created_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
            WHERE EXISTS (
                SELECT 1 FROM enrichment_jobs
                WHERE id = ?1 AND user_id = ?2 AND stage NOT IN {TERMINAL_STAGES_SQL}
            )
            "#
        );
        let affected = conn
            .execute(
                &sql,
                params![
                    job_id,
                    user_id,
                    serde_json::to_string(&result.identity)?,
                    serde_json::to_string(&result.profile)?,
                    serde_json::to_string(&result.dispatch)?,
                    result.transcript.clone(),
                    serde_json::to_string(&result.redactions)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn get(
        conn: &Connection,
        job_id: &str,
        user_id: &str,
    ) -> Result<Option<EnrichmentResult>> {
        let mut rows = conn
            .query(
                r#"
                SELECT identity, profile, dispatch, transcript, redactions
                FROM enrichment_results WHERE job_id = ?1 AND user_id = ?2
                "#,
                params![job_id, user_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(EnrichmentResult {
            identity: serde_json::from_str(&row.get::<String>(0)?)?,
            profile: serde_json::from_str(&row.get::<String>(1)?)?,
            dispatch: serde_json::from_str(&row.get::<String>(2)?)?,
            transcript: row.get(3)?,
            redactions: serde_json::from_str(&row.get::<String>(4)?).unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FusionWeights;
    use crate::db::repository::{test_connection, JobRepository};
    use crate::models::{
        CommunicationStrategy, DispatchSummary, EnrichmentJob, EnrichmentRequest, FusedProfile,
        JobStage, ResolvedIdentity, TraitScores,
    };
    use pretty_assertions::assert_eq;

    fn result() -> EnrichmentResult {
        EnrichmentResult {
            identity: ResolvedIdentity::unresolved("no candidates"),
            profile: FusedProfile {
                vector: vec![0.6, 0.8],
                weights: FusionWeights::default(),
                components: vec!["transcript".to_string()],
                traits: TraitScores::neutral(),
                profile_type: "professional_creative".to_string(),
                strategy: CommunicationStrategy {
                    primary_channels: vec!["LinkedIn".to_string()],
                    tone: "balanced".to_string(),
                    content_focus: "general".to_string(),
                },
                hooks: vec![],
            },
            dispatch: DispatchSummary::default(),
            transcript: "Met [REDACTED_EMAIL]".to_string(),
            redactions: [("email".to_string(), 1)].into_iter().collect(),
        }
    }

    async fn setup() -> Connection {
        let conn = test_connection().await;
        let job = EnrichmentJob::new(
            "job_1".to_string(),
            "alice".to_string(),
            EnrichmentRequest::default(),
        );
        JobRepository::create(&conn, &job).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let conn = setup().await;
        assert!(ResultRepository::save(&conn, "job_1", "alice", &result()).await.unwrap());

        let loaded = ResultRepository::get(&conn, "job_1", "alice").await.unwrap();
        assert_eq!(loaded, Some(result()));
        assert!(ResultRepository::get(&conn, "job_1", "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_job_rejects_result() {
        let conn = setup().await;
        JobRepository::finish(&conn, "job_1", JobStage::Cancelled, None)
            .await
            .unwrap();

        assert!(!ResultRepository::save(&conn, "job_1", "alice", &result()).await.unwrap());
        assert!(ResultRepository::get(&conn, "job_1", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_owner_cannot_save() {
        let conn = setup().await;
        assert!(!ResultRepository::save(&conn, "job_1", "mallory", &result()).await.unwrap());
    }
}
