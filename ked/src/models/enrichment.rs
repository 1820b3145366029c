use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::{Validate, ValidationError};

use super::{FusedProfile, ResolvedIdentity};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    #[default]
    Pending,
    Transcription,
    Search,
    Scraping,
    Resolving,
    Synthesizing,
    Success,
    Partial,
    Failed,
    Cancelled,
}

impl JobStage {
    pub const TERMINAL: [JobStage; 4] = [
        JobStage::Success,
        JobStage::Partial,
        JobStage::Failed,
        JobStage::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Progress reported on entering the stage.
    pub fn progress(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Transcription => 10,
            Self::Search => 25,
            Self::Scraping => 40,
            Self::Resolving => 70,
            Self::Synthesizing => 85,
            Self::Success | Self::Partial | Self::Failed | Self::Cancelled => 100,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Queued",
            Self::Transcription => "Transcribing conversation",
            Self::Search => "Preparing source queries",
            Self::Scraping => "Querying sources",
            Self::Resolving => "Resolving identity",
            Self::Synthesizing => "Building profile",
            Self::Success => "Enrichment complete",
            Self::Partial => "Enrichment complete without a confident match",
            Self::Failed => "Enrichment failed",
            Self::Cancelled => "Enrichment cancelled",
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Transcription => write!(f, "transcription"),
            Self::Search => write!(f, "search"),
            Self::Scraping => write!(f, "scraping"),
            Self::Resolving => write!(f, "resolving"),
            Self::Synthesizing => write!(f, "synthesizing"),
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "transcription" => Ok(Self::Transcription),
            "search" => Ok(Self::Search),
            "scraping" => Ok(Self::Scraping),
            "resolving" => Ok(Self::Resolving),
            "synthesizing" => Ok(Self::Synthesizing),
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown job stage: {s}")),
        }
    }
}

fn validate_input_present(request: &EnrichmentRequest) -> Result<(), ValidationError> {
    let has_transcript = request
        .transcript
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty());
    let has_audio = request.audio.as_deref().is_some_and(|a| !a.is_empty());
    if has_transcript || has_audio {
        Ok(())
    } else {
        Err(ValidationError::new("transcript_or_audio_required"))
    }
}

fn validate_embedding(embedding: &[f32]) -> Result<(), ValidationError> {
    if embedding.is_empty() || embedding.iter().any(|v| !v.is_finite()) {
        return Err(ValidationError::new("embedding_must_be_finite_and_non_empty"));
    }
    Ok(())
}

/// Input of one enrichment run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
#[validate(schema(function = "validate_input_present"))]
pub struct EnrichmentRequest {
    #[validate(length(max = 200_000))]
    pub transcript: Option<String>,
    /// Base64-encoded audio; never persisted.
    #[serde(default, skip_serializing)]
    pub audio: Option<String>,
    pub audio_format: Option<String>,
    #[validate(custom(function = "validate_embedding"))]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    #[validate(length(max = 10))]
    pub name_hints: Vec<String>,
    pub enabled_sources: Option<Vec<String>>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub professions: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentJob {
    pub id: String,
    pub user_id: String,
    pub stage: JobStage,
    pub progress: u8,
    pub stage_label: String,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub request: EnrichmentRequest,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichmentJob {
    pub fn new(id: String, user_id: String, request: EnrichmentRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            stage: JobStage::Pending,
            progress: JobStage::Pending.progress(),
            stage_label: JobStage::Pending.label().to_string(),
            cancel_requested: false,
            error: None,
            request,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSummary {
    pub source: String,
    pub outcome: super::QueryOutcome,
    pub latency_ms: u64,
    pub candidates: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DispatchSummary {
    pub sources: Vec<SourceSummary>,
    pub found: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_latency_ms: u64,
}

/// Terminal payload of a SUCCESS or PARTIAL job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentResult {
    pub identity: ResolvedIdentity,
    pub profile: FusedProfile,
    pub dispatch: DispatchSummary,
    pub transcript: String,
    #[serde(default)]
    pub redactions: HashMap<String, usize>,
}

/// Snapshot returned to a polling caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatus {
    pub job_id: String,
    pub stage: JobStage,
    pub progress: u8,
    pub stage_label: String,
    pub terminal: bool,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub result: Option<EnrichmentResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn from_job(job: &EnrichmentJob, result: Option<EnrichmentResult>) -> Self {
        Self {
            job_id: job.id.clone(),
            stage: job.stage,
            progress: job.progress,
            stage_label: job.stage_label.clone(),
            terminal: job.stage.is_terminal(),
            cancel_requested: job.cancel_requested,
            error: job.error.clone(),
            result,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_progress_is_monotonic_along_pipeline() {
        let pipeline = [
            JobStage::Pending,
            JobStage::Transcription,
            JobStage::Search,
            JobStage::Scraping,
            JobStage::Resolving,
            JobStage::Synthesizing,
            JobStage::Success,
        ];
        for pair in pipeline.windows(2) {
            assert!(pair[0].progress() < pair[1].progress());
        }
    }

    #[test]
    fn test_stage_round_trips_through_strings() {
        for stage in [
            JobStage::Pending,
            JobStage::Scraping,
            JobStage::Partial,
            JobStage::Cancelled,
        ] {
            assert_eq!(stage.to_string().parse::<JobStage>().unwrap(), stage);
        }
        assert!("bogus".parse::<JobStage>().is_err());
        assert_eq!("SUCCESS".parse::<JobStage>().unwrap(), JobStage::Success);
    }

    #[test]
    fn test_terminal_stages() {
        assert!(JobStage::Success.is_terminal());
        assert!(JobStage::Cancelled.is_terminal());
        assert!(!JobStage::Synthesizing.is_terminal());
        assert!(!JobStage::Pending.is_terminal());
    }

    #[test]
    fn test_request_requires_transcript_or_audio() {
        let empty = EnrichmentRequest::default();
        assert!(empty.validate().is_err());

        let with_text = EnrichmentRequest {
            transcript: Some("Met Jane Doe at the conference".to_string()),
            ..Default::default()
        };
        assert!(with_text.validate().is_ok());

        let with_audio = EnrichmentRequest {
            audio: Some("UklGRg==".to_string()),
            ..Default::default()
        };
        assert!(with_audio.validate().is_ok());
    }

    #[test]
    fn test_request_rejects_non_finite_embedding() {
        let request = EnrichmentRequest {
            transcript: Some("hello".to_string()),
            embedding: Some(vec![0.1, f32::NAN]),
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_audio_is_not_serialized() {
        let request = EnrichmentRequest {
            audio: Some("UklGRg==".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("audio").is_none());
    }
}
