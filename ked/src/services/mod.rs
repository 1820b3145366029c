mod workflow;

pub use workflow::{EnrichmentService, JobListing, INTERRUPTED_BY_RESTART};
