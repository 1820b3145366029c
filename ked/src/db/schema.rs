use libsql::Connection;

use crate::error::Result;

/// Stages after which a job row is frozen, as a SQL tuple.
pub(crate) const TERMINAL_STAGES_SQL: &str = "('success', 'partial', 'failed', 'cancelled')";

pub async fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per enrichment workflow run
        CREATE TABLE IF NOT EXISTS enrichment_jobs (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            stage TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            stage_label TEXT NOT NULL DEFAULT '',
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            request TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_enrichment_jobs_user_id ON enrichment_jobs(user_id);
        CREATE INDEX IF NOT EXISTS idx_enrichment_jobs_user_created
            ON enrichment_jobs(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_enrichment_jobs_stage ON enrichment_jobs(stage);

        -- Profiles discovered during dispatch
        CREATE TABLE IF NOT EXISTS enrichment_candidates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            source TEXT NOT NULL,
            external_id TEXT NOT NULL,
            url TEXT,
            display_name TEXT NOT NULL,
            fields TEXT NOT NULL DEFAULT '{}',
            extracted_at TEXT NOT NULL,
            UNIQUE (job_id, source, external_id),
            FOREIGN KEY (job_id) REFERENCES enrichment_jobs(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_enrichment_candidates_job ON enrichment_candidates(job_id, user_id);

        -- Terminal output of a successful or partial run
        CREATE TABLE IF NOT EXISTS enrichment_results (
            job_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            identity TEXT NOT NULL,
            profile TEXT NOT NULL,
            dispatch TEXT NOT NULL,
            transcript TEXT NOT NULL DEFAULT '',
            redactions TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            FOREIGN KEY (job_id) REFERENCES enrichment_jobs(id) ON DELETE CASCADE
        );
        "#,
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStage;
    use libsql::Builder;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();

        init_schema(&conn).await.unwrap();
        init_schema(&conn).await.unwrap();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'enrichment_%' ORDER BY name",
                (),
            )
            .await
            .unwrap();
        let mut tables = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            tables.push(row.get::<String>(0).unwrap());
        }
        assert_eq!(
            tables,
            vec![
                "enrichment_candidates",
                "enrichment_jobs",
                "enrichment_results"
            ]
        );
    }

    #[test]
    fn test_terminal_sql_matches_stage_enum() {
        for stage in JobStage::TERMINAL {
            assert!(TERMINAL_STAGES_SQL.contains(&format!("'{stage}'")));
        }
        assert_eq!(TERMINAL_STAGES_SQL.matches('\'').count(), JobStage::TERMINAL.len() * 2);
    }
}
