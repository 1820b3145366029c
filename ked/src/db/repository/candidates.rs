use libsql::{params, Connection};

use super::parse_timestamp;
use crate::error::Result;
use crate::models::Candidate;

pub struct CandidateRepository;

impl CandidateRepository {
    /// Insert candidates for a job. A candidate already stored for the same
    /// `(job, source, external_id)` is left as is.
    pub async fn create_batch(
        conn: &Connection,
        job_id: &str,
        user_id: &str,
        candidates: &[Candidate],
    ) -> Result<()> {
        for candidate in candidates {
            conn.execute(
                r#"
                INSERT OR IGNORE INTO enrichment_candidates (
                    job_id, user_id, source, external_id, url, display_name, fields, extracted_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    job_id,
                    user_id,
                    candidate.source.clone(),
                    candidate.external_id.clone(),
                    candidate.url.clone(),
                    candidate.display_name.clone(),
                    serde_json::to_string(&candidate.fields)?,
                    candidate.extracted_at.to_rfc3339(),
                ],
            )
            .await?;
        }
        Ok(())
    }

    pub async fn list_for_job(
        conn: &Connection,
        job_id: &str,
        user_id: &str,
    ) -> Result<Vec<Candidate>> {
        let mut rows = conn
            .query(
                r#"
                SELECT source, external_id, url, display_name, fields, extracted_at
                FROM enrichment_candidates
                WHERE job_id = ?1 AND user_id = ?2
                ORDER BY id
                "#,
                params![job_id, user_id],
            )
            .await?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await? {
            candidates.push(Candidate {
                source: row.get(0)?,
                external_id: row.get(1)?,
                url: row.get(2)?,
                display_name: row.get(3)?,
                fields: serde_json::from_str(&row.get::<String>(4)?).unwrap_or_default(),
                extracted_at: parse_timestamp(&row.get::<String>(5)?),
            });
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{test_connection, JobRepository};
    use crate::models::{EnrichmentJob, EnrichmentRequest};

    #[tokio::test]
    async fn test_batch_round_trip_and_dedup() {
        let conn = test_connection().await;
        let job = EnrichmentJob::new(
            "job_1".to_string(),
            "alice".to_string(),
            EnrichmentRequest::default(),
        );
        JobRepository::create(&conn, &job).await.unwrap();

        let gh = Candidate::new("github", "janedoe", "Jane Doe")
            .with_url("https://github.com/janedoe")
            .with_field("stars", 12);
        let li = Candidate::new("linkedin", "https://linkedin.com/in/jd", "Jane Doe");

        CandidateRepository::create_batch(&conn, "job_1", "alice", &[gh.clone(), li.clone()])
            .await
            .unwrap();
        CandidateRepository::create_batch(&conn, "job_1", "alice", &[gh.clone()])
            .await
            .unwrap();

        let stored = CandidateRepository::list_for_job(&conn, "job_1", "alice")
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].source, "github");
        assert_eq!(stored[0].url.as_deref(), Some("https://github.com/janedoe"));
        assert_eq!(stored[0].field_f64("stars"), Some(12.0));
        assert_eq!(stored[1].external_id, li.external_id);

        assert!(CandidateRepository::list_for_job(&conn, "job_1", "bob")
            .await
            .unwrap()
            .is_empty());
    }
}
