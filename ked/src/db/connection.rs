use libsql::{Builder, Connection};
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::error::Result;

use super::schema;

const JOURNAL_MODES: [&str; 6] = ["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];
const SYNCHRONOUS_MODES: [&str; 4] = ["OFF", "NORMAL", "FULL", "EXTRA"];

/// Handle to the job store. Local files, remote libsql and embedded
/// replicas are all opened through the same type.
#[derive(Clone)]
pub struct Database {
    db: Arc<libsql::Database>,
    busy_timeout_ms: u64,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let remote = config.url.starts_with("libsql://") || config.url.starts_with("https://");
        let token = config.auth_token.clone().unwrap_or_default();

        let db = match (remote, config.local_path.as_deref()) {
            (true, Some(local_path)) => {
                Builder::new_remote_replica(local_path, config.url.clone(), token)
                    .build()
                    .await?
            }
            (true, None) => Builder::new_remote(config.url.clone(), token).build().await?,
            (false, _) => {
                let path = config.url.strip_prefix("file:").unwrap_or(&config.url);
                Builder::new_local(path).build().await?
            }
        };

        let database = Self {
            db: Arc::new(db),
            busy_timeout_ms: config.busy_timeout_ms,
        };

        let conn = database.connect().await?;
        if !remote {
            apply_file_pragmas(&conn, config).await;
        }
        schema::init_schema(&conn).await?;
        tracing::info!(url = %redact_url(&config.url), "Job store ready");

        Ok(database)
    }

    /// Open a connection with the busy timeout applied; SQLite scopes it
    /// to the connection.
    pub async fn connect(&self) -> Result<Connection> {
        let conn = self.db.connect()?;
        let pragma = format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms);
        if let Err(error) = conn.execute_batch(&pragma).await {
            tracing::debug!(error = %error, "busy_timeout not applied");
        }
        Ok(conn)
    }

    /// Pull from the primary when running as an embedded replica.
    pub async fn sync(&self) -> Result<()> {
        if let Ok(replicated) = self.db.sync().await {
            tracing::debug!(?replicated, "Database synced");
        }
        Ok(())
    }
}

/// Journal and sync modes persist in the file, so they are set once.
async fn apply_file_pragmas(conn: &Connection, config: &DatabaseConfig) {
    let journal = normalize(&config.journal_mode, &JOURNAL_MODES, "WAL");
    let synchronous = normalize(&config.synchronous, &SYNCHRONOUS_MODES, "NORMAL");

    for (pragma, mode) in [("journal_mode", journal), ("synchronous", synchronous)] {
        if let Err(error) = conn.execute_batch(&format!("PRAGMA {pragma} = {mode}")).await {
            tracing::warn!(pragma, mode, error = %error, "Failed to set SQLite pragma");
        }
    }
}

fn normalize(value: &str, allowed: &[&'static str], fallback: &'static str) -> &'static str {
    let wanted = value.trim().to_uppercase();
    allowed
        .iter()
        .find(|mode| **mode == wanted)
        .copied()
        .unwrap_or_else(|| {
            tracing::warn!(value, fallback, "Unknown SQLite mode, using fallback");
            fallback
        })
}

fn redact_url(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
