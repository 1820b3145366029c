//! Job store.
//!
//! Jobs, their candidate snapshots and finished results live in libsql.
//! Callers go through [`DatabaseBackend`]; [`repository`] holds the SQL.

pub mod backends;
mod connection;
pub mod repository;
pub(crate) mod schema;
pub mod traits;

pub use backends::libsql::LibSqlBackend;
pub use connection::Database;
pub use traits::{CandidateStore, DatabaseBackend, JobStore, ResultStore};
