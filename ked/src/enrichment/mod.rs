//! The enrichment core: source fan-out, identity resolution and profile synthesis.

pub mod circuit;
pub mod dispatcher;
pub mod extraction;
pub mod fusion;
pub mod hooks;
pub mod rate_limiter;
pub mod resolution;
pub mod scrub;
pub mod sources;
pub mod traits;

pub use circuit::{CircuitManager, EgressHandle, EgressHealth, FailureReason, SourceHealth};
pub use dispatcher::{DispatchQuery, DispatchResult, Dispatcher};
pub use extraction::{merge_extracted, ExtractedPerson, NameExtractor};
pub use fusion::{Fusion, FusionEngine};
pub use hooks::social_hooks;
pub use rate_limiter::RateLimiter;
pub use resolution::{ConversationContext, IdentityResolver};
pub use scrub::{PiiScrubber, Scrubbed};
pub use sources::{SourceAdapter, SourceError, SourceRegistry};
pub use traits::{communication_strategy, map_traits, profile_type};
