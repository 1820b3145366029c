use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{parse_llm_provider_model, LlmConfig};
use crate::error::{KedError, Result};
use crate::llm::api::LlmApiClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAI,
    OpenRouter,
    Ollama,
    LmStudio,
    OpenAICompatible { base_url: String },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Optional LLM collaborator. Callers check [`LlmProvider::is_available`]
/// or handle [`KedError::LlmUnavailable`].
#[derive(Clone)]
pub struct LlmProvider {
    backend: LlmBackend,
    config: Option<Arc<LlmConfig>>,
    client: Option<Arc<LlmApiClient>>,
}

impl std::fmt::Debug for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl LlmProvider {
    pub fn new(config: Option<&LlmConfig>) -> Self {
        let Some(config) = config else {
            return Self::unavailable("No LLM configuration provided");
        };

        let (provider, _model) = parse_llm_provider_model(&config.model);

        let backend = match provider.to_lowercase().as_str() {
            "openai" => LlmBackend::OpenAI,
            "openrouter" => LlmBackend::OpenRouter,
            "ollama" => LlmBackend::Ollama,
            "lmstudio" => LlmBackend::LmStudio,
            _ => match &config.base_url {
                Some(base_url) => LlmBackend::OpenAICompatible {
                    base_url: base_url.clone(),
                },
                None => {
                    return Self::unavailable(&format!(
                        "Unknown provider in model: {}",
                        config.model
                    ))
                }
            },
        };

        match LlmApiClient::new(config) {
            Ok(client) => Self {
                backend,
                config: Some(Arc::new(config.clone())),
                client: Some(Arc::new(client)),
            },
            Err(e) => Self::unavailable(&e.to_string()),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            backend: LlmBackend::Unavailable {
                reason: reason.to_string(),
            },
            config: None,
            client: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some() && !matches!(self.backend, LlmBackend::Unavailable { .. })
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    pub fn config(&self) -> Option<&LlmConfig> {
        self.config.as_deref()
    }

    /// Whether identity rescoring is both configured and possible.
    pub fn rescoring_enabled(&self) -> bool {
        self.is_available() && self.config().is_some_and(|c| c.identity_rescoring)
    }

    pub async fn complete_json(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: Option<&CompletionOptions>,
    ) -> Result<Value> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| KedError::LlmUnavailable(self.unavailable_reason()))?;
        client.complete_json(prompt, system_prompt, options).await
    }

    pub async fn complete_structured<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<T> {
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(400),
        };
        let json_value = self.complete_json(prompt, system_prompt, Some(&options)).await?;

        serde_json::from_value(json_value)
            .map_err(|e| KedError::Llm(format!("Failed to deserialize response: {e}")))
    }

    fn unavailable_reason(&self) -> String {
        match &self.backend {
            LlmBackend::Unavailable { reason } => reason.clone(),
            _ => "LLM client not initialised".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str) -> LlmConfig {
        LlmConfig {
            model: model.to_string(),
            api_key: None,
            base_url: None,
            timeout_secs: 5,
            max_retries: 0,
            identity_rescoring: true,
            name_extraction: true,
        }
    }

    #[test]
    fn test_no_config_is_unavailable() {
        let provider = LlmProvider::new(None);
        assert!(!provider.is_available());
        assert!(!provider.rescoring_enabled());
    }

    #[test]
    fn test_local_backend_without_key() {
        let provider = LlmProvider::new(Some(&config("ollama/llama3")));
        assert_eq!(provider.backend(), &LlmBackend::Ollama);
        assert!(provider.is_available());
        assert!(provider.rescoring_enabled());
    }

    #[test]
    fn test_hosted_backend_without_key_is_unavailable() {
        let provider = LlmProvider::new(Some(&config("openai/gpt-4o-mini")));
        assert!(!provider.is_available());
    }

    #[tokio::test]
    async fn test_unavailable_completion_errors() {
        let provider = LlmProvider::unavailable("disabled");
        let err = provider
            .complete_structured::<Value>("hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, KedError::LlmUnavailable(ref r) if r == "disabled"));
    }
}
