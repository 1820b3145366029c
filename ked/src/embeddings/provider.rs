use crate::config::{parse_provider_model, EmbeddingsConfig};
use crate::embeddings::api::{default_base_url, ApiConfig, EmbeddingApiClient};
use crate::error::{KedError, Result};

enum EmbeddingBackend {
    Api(EmbeddingApiClient),
    Unavailable { reason: String },
}

/// Embedding collaborator backed by an OpenAI-compatible API.
pub struct EmbeddingProvider {
    backend: EmbeddingBackend,
    dimensions: usize,
}

impl EmbeddingProvider {
    pub fn new(config: &EmbeddingsConfig) -> Self {
        let (provider, model_name) = parse_provider_model(&config.model);
        let provider = provider.to_lowercase();

        if provider == "local" && config.base_url.is_none() {
            return Self::unavailable(
                &format!("No embedding endpoint configured for model '{}'", config.model),
                config.dimensions,
            );
        }
        let needs_key = matches!(provider.as_str(), "openai" | "openrouter");
        if needs_key && config.api_key.is_none() {
            return Self::unavailable(
                "EMBEDDING_API_KEY is required for hosted embedding providers",
                config.dimensions,
            );
        }

        let api_config = ApiConfig {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url(&provider).to_string()),
            api_key: config.api_key.clone(),
            model: model_name.to_string(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        };

        match EmbeddingApiClient::new(api_config) {
            Ok(client) => Self {
                backend: EmbeddingBackend::Api(client),
                dimensions: config.dimensions,
            },
            Err(e) => Self::unavailable(&e.to_string(), config.dimensions),
        }
    }

    pub fn unavailable(reason: &str, dimensions: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Unavailable {
                reason: reason.to_string(),
            },
            dimensions,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.backend, EmbeddingBackend::Api(_))
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match &self.backend {
            EmbeddingBackend::Api(client) => {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                client.embed(&refs).await
            }
            EmbeddingBackend::Unavailable { reason } => Err(KedError::Embedding(format!(
                "Embedding provider unavailable: {reason}"
            ))),
        }
    }

    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed(vec![text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| KedError::Embedding("No embedding generated".to_string()))
    }
}
