mod candidate;
mod enrichment;

pub use candidate::*;
pub use enrichment::*;

pub type Metadata = std::collections::HashMap<String, serde_json::Value>;
