use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use validator::Validate;

use super::Metadata;
use crate::config::FusionWeights;

/// A profile discovered by one source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct Candidate {
    #[validate(length(min = 1, max = 64))]
    pub source: String,
    #[validate(length(min = 1, max = 2048))]
    pub external_id: String,
    pub url: Option<String>,
    #[validate(length(min = 1, max = 512))]
    pub display_name: String,
    #[serde(default)]
    pub fields: Metadata,
    pub extracted_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(
        source: impl Into<String>,
        external_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            external_id: external_id.into(),
            url: None,
            display_name: display_name.into(),
            fields: Metadata::new(),
            extracted_at: Utc::now(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// String field, ignoring blanks.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Numeric field; numeric strings such as `"1200"` are accepted.
    pub fn field_f64(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().replace(',', "").parse().ok(),
            _ => None,
        }
    }

    /// Whether a field is present with a meaningful value.
    pub fn has_field(&self, key: &str) -> bool {
        match self.fields.get(key) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(serde_json::Value::Object(o)) => !o.is_empty(),
            Some(_) => true,
        }
    }

    /// All string-valued fields joined, for term matching.
    pub fn text_blob(&self) -> String {
        let mut parts = vec![self.display_name.clone()];
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        for key in keys {
            match &self.fields[key] {
                serde_json::Value::String(s) => parts.push(s.clone()),
                serde_json::Value::Array(items) => parts.extend(
                    items
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_string)),
                ),
                _ => {}
            }
        }
        parts.join(" ")
    }

    /// Stable identifier for a `(source, external_id)` pair.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.external_id.as_bytes());
        let digest = hasher.finalize();
        digest[..12].iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Success,
    Timeout,
    Error,
    Skipped,
}

impl std::fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One adapter invocation within a dispatch wave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceQuery {
    pub source: String,
    pub terms: Vec<String>,
    pub deadline_ms: u64,
    pub outcome: QueryOutcome,
    pub latency_ms: u64,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Skip or failure reason.
    pub detail: Option<String>,
}

impl SourceQuery {
    pub fn skipped(source: &str, terms: &[String], reason: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            terms: terms.to_vec(),
            deadline_ms: 0,
            outcome: QueryOutcome::Skipped,
            latency_ms: 0,
            candidates: Vec::new(),
            detail: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.8 {
            Self::High
        } else if confidence >= 0.6 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub confidence: f32,
    pub band: ConfidenceBand,
    /// Sources other than the candidate's own that name the same person.
    pub corroborating_sources: Vec<String>,
    pub reasoning: String,
}

/// Outcome of disambiguation over a job's candidates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedIdentity {
    pub chosen: Option<ScoredCandidate>,
    pub confidence: f32,
    pub band: ConfidenceBand,
    pub high_confidence: bool,
    pub alternatives: Vec<ScoredCandidate>,
    pub reasoning: String,
}

impl ResolvedIdentity {
    pub fn unresolved(reasoning: impl Into<String>) -> Self {
        Self {
            chosen: None,
            confidence: 0.0,
            band: ConfidenceBand::Low,
            high_confidence: false,
            alternatives: Vec::new(),
            reasoning: reasoning.into(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.chosen.is_some()
    }
}

/// Coordinates in the four-axis social trait space, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TraitScores {
    pub professional: f32,
    pub creative: f32,
    pub casual: f32,
    pub realtime: f32,
}

impl TraitScores {
    pub const NEUTRAL: f32 = 0.5;

    pub fn neutral() -> Self {
        Self {
            professional: Self::NEUTRAL,
            creative: Self::NEUTRAL,
            casual: Self::NEUTRAL,
            realtime: Self::NEUTRAL,
        }
    }

    /// Axes in declaration order, paired with their names.
    pub fn axes(&self) -> [(&'static str, f32); 4] {
        [
            ("professional", self.professional),
            ("creative", self.creative),
            ("casual", self.casual),
            ("realtime", self.realtime),
        ]
    }
}

impl Default for TraitScores {
    fn default() -> Self {
        Self::neutral()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CommunicationStrategy {
    pub primary_channels: Vec<String>,
    pub tone: String,
    pub content_focus: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusedProfile {
    /// Unit-normalized unified vector.
    pub vector: Vec<f32>,
    pub weights: FusionWeights,
    pub components: Vec<String>,
    pub traits: TraitScores,
    pub profile_type: String,
    pub strategy: CommunicationStrategy,
    pub hooks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_band_boundaries() {
        assert_eq!(ConfidenceBand::from_confidence(0.8), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_confidence(0.79), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_confidence(0.6), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_confidence(0.59), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_confidence(0.0), ConfidenceBand::Low);
    }

    #[test]
    fn test_field_accessors() {
        let c = Candidate::new("github", "octocat", "The Octocat")
            .with_field("public_repos", 8)
            .with_field("followers", "1,200")
            .with_field("bio", "  ")
            .with_field("location", "San Francisco");

        assert_eq!(c.field_f64("public_repos"), Some(8.0));
        assert_eq!(c.field_f64("followers"), Some(1200.0));
        assert_eq!(c.field_str("bio"), None);
        assert!(!c.has_field("bio"));
        assert_eq!(c.field_str("location"), Some("San Francisco"));
        assert!(c.text_blob().contains("San Francisco"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_source_scoped() {
        let a = Candidate::new("github", "alice", "Alice");
        let b = Candidate::new("github", "alice", "Alice Smith");
        let c = Candidate::new("twitter", "alice", "Alice");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 24);
    }

    #[test]
    fn test_candidate_validation_rejects_empty_name() {
        let c = Candidate::new("web", "https://x.test", "");
        assert!(c.validate().is_err());
        let ok = Candidate::new("web", "https://x.test", "X").with_field("k", json!(1));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(
            serde_json::to_string(&QueryOutcome::Timeout).unwrap(),
            "\"timeout\""
        );
        assert_eq!(QueryOutcome::Skipped.to_string(), "skipped");
    }
}
