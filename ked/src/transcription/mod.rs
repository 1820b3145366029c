//! Speech-to-text for audio submissions.
//!
//! Only used when a job arrives without a transcript.

mod api;
mod provider;

pub use provider::TranscriptionProvider;
