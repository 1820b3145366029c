mod candidates;
mod jobs;
mod results;

pub use candidates::CandidateRepository;
pub use jobs::JobRepository;
pub use results::ResultRepository;

use chrono::{DateTime, Utc};

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
pub(crate) async fn test_connection() -> libsql::Connection {
    let conn = libsql::Builder::new_local(":memory:")
        .build()
        .await
        .unwrap()
        .connect()
        .unwrap();
    crate::db::schema::init_schema(&conn).await.unwrap();
    conn
}
