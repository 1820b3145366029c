use std::time::Duration;

use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    config::{parse_provider_model, TranscriptionConfig},
    error::{KedError, Result},
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_RETRIES: u32 = 2;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for OpenAI-compatible `/audio/transcriptions` endpoints.
#[derive(Debug, Clone)]
pub struct TranscriptionApiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl TranscriptionApiClient {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            KedError::Transcription("API key required for transcription API".to_string())
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KedError::Transcription(format!("Failed to create HTTP client: {e}")))?;

        let (_, model) = parse_provider_model(&config.model);
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Transcribe `audio_bytes`. Server errors and timeouts are retried with
    /// exponential backoff; everything else fails immediately.
    pub async fn transcribe(&self, audio_bytes: &[u8], format: Option<&str>) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.send(audio_bytes, format).await {
                Ok(text) => return Ok(text),
                Err(Attempt::Retryable(e)) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    let delay_ms = 100 * 2_u64.pow(attempt - 1);
                    warn!(attempt, delay_ms, error = %e, "Transcription attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(Attempt::Retryable(e)) | Err(Attempt::Fatal(e)) => return Err(e),
            }
        }
    }

    async fn send(
        &self,
        audio_bytes: &[u8],
        format: Option<&str>,
    ) -> std::result::Result<String, Attempt> {
        let extension = format.unwrap_or("mp3").to_lowercase();
        let file_part = multipart::Part::bytes(audio_bytes.to_vec())
            .file_name(format!("audio.{extension}"))
            .mime_str(mime_type(&extension))
            .map_err(|e| {
                Attempt::Fatal(KedError::Transcription(format!("Invalid MIME type: {e}")))
            })?;

        let form = multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "json");

        let url = format!("{}/audio/transcriptions", self.base_url);
        debug!(%url, bytes = audio_bytes.len(), "Sending transcription request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Attempt::Retryable(KedError::Transcription(format!("Request failed: {e}")))
                } else {
                    Attempt::Fatal(KedError::Transcription(format!("Request failed: {e}")))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }

        let parsed: TranscriptionResponse = response.json().await.map_err(|e| {
            Attempt::Fatal(KedError::Transcription(format!(
                "Failed to parse transcription response: {e}"
            )))
        })?;

        if parsed.text.trim().is_empty() {
            return Err(Attempt::Fatal(KedError::Transcription(
                "Transcription response contained empty text".to_string(),
            )));
        }
        Ok(parsed.text)
    }
}

enum Attempt {
    Retryable(KedError),
    Fatal(KedError),
}

fn mime_type(extension: &str) -> &'static str {
    match extension {
        "wav" => "audio/wav",
        "m4a" | "mp4" => "audio/mp4",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        _ => "audio/mpeg",
    }
}

fn map_http_error(status: StatusCode, body: &str) -> Attempt {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Attempt::Fatal(KedError::ApiAuth(
            format!("Transcription authentication failed ({status}): {body}"),
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            Attempt::Fatal(KedError::ApiRateLimit { retry_after: None })
        }
        s if s.is_server_error() => Attempt::Retryable(KedError::Transcription(format!(
            "Transcription server error ({status}): {body}"
        ))),
        _ => Attempt::Fatal(KedError::Transcription(format!(
            "Transcription API error ({status}): {body}"
        ))),
    }
}
