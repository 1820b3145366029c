use std::time::Duration;

use tracing::{info, warn};

use crate::config::{parse_provider_model, TranscriptionConfig};
use crate::error::{KedError, Result};

use super::api::TranscriptionApiClient;

#[derive(Clone)]
enum TranscriptionBackend {
    Api { client: TranscriptionApiClient },
    Unavailable { reason: String },
}

/// Speech-to-text collaborator for audio submissions.
#[derive(Clone)]
pub struct TranscriptionProvider {
    backend: TranscriptionBackend,
    timeout_secs: u64,
    max_file_size: u64,
}

impl TranscriptionProvider {
    pub fn new(config: &TranscriptionConfig) -> Self {
        let (provider, _model) = parse_provider_model(&config.model);

        let backend = if provider.eq_ignore_ascii_case("local") && config.base_url.is_none() {
            let reason = format!(
                "No transcription endpoint configured for model '{}'",
                config.model
            );
            warn!("{}", reason);
            TranscriptionBackend::Unavailable { reason }
        } else {
            match TranscriptionApiClient::new(config) {
                Ok(client) => {
                    info!(provider = %provider, "Transcription API backend initialized");
                    TranscriptionBackend::Api { client }
                }
                Err(e) => {
                    let reason = format!("Transcription API backend unavailable: {e}");
                    warn!("{}", reason);
                    TranscriptionBackend::Unavailable { reason }
                }
            }
        };

        Self {
            backend,
            timeout_secs: config.timeout_secs,
            max_file_size: config.max_file_size,
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        let defaults = TranscriptionConfig::default();
        Self {
            backend: TranscriptionBackend::Unavailable {
                reason: reason.to_string(),
            },
            timeout_secs: defaults.timeout_secs,
            max_file_size: defaults.max_file_size,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, TranscriptionBackend::Unavailable { .. })
    }

    pub async fn transcribe(&self, audio_bytes: &[u8], format: Option<&str>) -> Result<String> {
        let client = match &self.backend {
            TranscriptionBackend::Api { client } => client,
            TranscriptionBackend::Unavailable { reason } => {
                return Err(KedError::TranscriptionUnavailable(reason.clone()))
            }
        };
        if audio_bytes.is_empty() {
            return Err(KedError::Validation("audio payload is empty".to_string()));
        }
        if audio_bytes.len() as u64 > self.max_file_size {
            return Err(KedError::Validation(format!(
                "audio payload of {} bytes exceeds the {} byte limit",
                audio_bytes.len(),
                self.max_file_size
            )));
        }

        let timeout = Duration::from_secs(self.timeout_secs);
        match tokio::time::timeout(timeout, client.transcribe(audio_bytes, format)).await {
            Ok(result) => result,
            Err(_) => Err(KedError::Transcription(format!(
                "Transcription timed out after {} seconds",
                self.timeout_secs
            ))),
        }
    }
}
