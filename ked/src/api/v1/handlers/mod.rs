pub mod enrichments;
pub(crate) mod health;
pub mod sources;

pub use health::health_check;
