use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
    Client, StatusCode,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{KedError, Result};

/// Default base URL per provider prefix.
pub fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "lmstudio" => "http://localhost:1234/v1",
        _ => "https://api.openai.com/v1",
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
#[derive(Clone)]
pub struct EmbeddingApiClient {
    client: Client,
    config: ApiConfig,
}

impl EmbeddingApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KedError::Embedding(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref api_key) = self.config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}"))
                    .map_err(|e| KedError::Embedding(format!("Invalid API key header: {e}")))?,
            );
        }
        Ok(headers)
    }

    /// Embed `texts`, one vector per input, in input order.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts.to_vec(),
        };
        let headers = self.headers()?;
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));

        let mut attempt = 0;
        loop {
            let sent = self
                .client
                .post(&url)
                .headers(headers.clone())
                .json(&request)
                .send()
                .await;

            let error = match sent {
                Ok(resp) if resp.status().is_success() => {
                    let body: EmbeddingResponse = resp.json().await.map_err(|e| {
                        KedError::Embedding(format!("Failed to parse response: {e}"))
                    })?;
                    return order_by_index(body.data, texts.len());
                }
                Ok(resp) => match rejected(resp).await {
                    Retry::Again(e) => e,
                    Retry::Stop(e) => return Err(e),
                },
                Err(e) => KedError::Embedding(format!("Request failed: {e}")),
            };

            if attempt >= self.config.max_retries {
                return Err(error);
            }
            attempt += 1;
            tracing::debug!(attempt, error = %error, "Retrying embedding request");
            tokio::time::sleep(Duration::from_millis(100 << (attempt - 1))).await;
        }
    }
}

enum Retry {
    Again(KedError),
    Stop(KedError),
}

async fn rejected(resp: reqwest::Response) -> Retry {
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        return Retry::Again(KedError::ApiRateLimit { retry_after });
    }

    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Retry::Stop(KedError::ApiAuth(body)),
        s if s.is_server_error() => {
            Retry::Again(KedError::Embedding(format!("Server error {s}: {body}")))
        }
        s => Retry::Stop(KedError::Embedding(format!("API error {s}: {body}"))),
    }
}

fn order_by_index(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(KedError::Embedding(format!(
            "Expected {expected} embeddings, got {}",
            data.len()
        )));
    }
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}
