use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};

use crate::{
    config::{parse_llm_provider_model, LlmConfig},
    error::{KedError, Result},
    llm::provider::CompletionOptions,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";

#[derive(Debug, Clone)]
struct ApiConfig {
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

/// Chat-completions client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct LlmApiClient {
    client: Client<OpenAIConfig>,
    config: ApiConfig,
}

impl LlmApiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_config = ApiConfig::from_llm_config(config);

        let (provider, _) = parse_llm_provider_model(&config.model);
        let needs_api_key = !matches!(
            provider.to_lowercase().as_str(),
            "ollama" | "local" | "lmstudio"
        );
        if needs_api_key && api_config.api_key.is_none() {
            return Err(KedError::Llm(
                "API key required for this provider".to_string(),
            ));
        }

        let openai_config = OpenAIConfig::new()
            .with_api_base(api_config.base_url.clone())
            .with_api_key(api_config.api_key.clone().unwrap_or_default());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api_config.timeout_secs))
            .build()
            .map_err(|error| KedError::Llm(format!("Failed to create LLM HTTP client: {error}")))?;

        // async-openai retries server errors on its own schedule; bound it by
        // the request timeout so it cannot outlive a job stage.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(api_config.timeout_secs)),
            ..Default::default()
        };

        let client = Client::with_config(openai_config)
            .with_http_client(http_client)
            .with_backoff(backoff);

        Ok(Self {
            client,
            config: api_config,
        })
    }

    /// Complete `prompt` and parse the reply as JSON. Fenced replies
    /// (```json ... ```) are accepted.
    pub async fn complete_json(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: Option<&CompletionOptions>,
    ) -> Result<Value> {
        if prompt.trim().is_empty() {
            return Err(KedError::Validation("Prompt cannot be empty".to_string()));
        }
        let request = self.build_request(prompt, system_prompt, options)?;

        let mut attempt = 0;
        let content = loop {
            match self.client.chat().create(request.clone()).await {
                Ok(response) => break first_choice(response)?,
                Err(error) => match classify(error) {
                    Failure::Transient(e) if attempt < self.config.max_retries => {
                        attempt += 1;
                        tracing::debug!(attempt, error = %e, "Retrying LLM request");
                        tokio::time::sleep(Duration::from_millis(100 << (attempt - 1))).await;
                    }
                    Failure::Transient(e) | Failure::Fatal(e) => return Err(e),
                },
            }
        };

        serde_json::from_str(strip_fence(&content)).map_err(|e| {
            let preview: String = content.chars().take(100).collect();
            tracing::warn!(%preview, error = %e, "LLM reply is not JSON");
            KedError::Llm(format!("Failed to parse JSON response: {e}"))
        })
    }

    fn build_request(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: Option<&CompletionOptions>,
    ) -> Result<CreateChatCompletionRequest> {
        let invalid =
            |what: &str, e: OpenAIError| KedError::Validation(format!("Invalid {what}: {e}"));

        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
        if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
            let message = ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| invalid("system prompt", e))?;
            messages.push(message.into());
        }
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| invalid("user prompt", e))?;
        messages.push(message.into());

        let options = options.cloned().unwrap_or_default();
        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(self.config.model.clone()).messages(messages);
        if let Some(temperature) = options.temperature {
            request.temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            request.max_tokens(max_tokens);
        }
        request.build().map_err(|e| invalid("LLM request", e))
    }
}

enum Failure {
    /// Worth another attempt: 5xx, connection errors, untyped API errors.
    Transient(KedError),
    Fatal(KedError),
}

fn classify(error: OpenAIError) -> Failure {
    match error {
        OpenAIError::Reqwest(e) => match e.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => {
                Failure::Fatal(KedError::LlmRateLimit { retry_after: None })
            }
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                Failure::Fatal(KedError::Llm(format!("LLM authentication failed: {e}")))
            }
            Some(status) if !status.is_server_error() => {
                Failure::Fatal(KedError::Llm(format!("LLM request failed: {e}")))
            }
            _ => Failure::Transient(KedError::Llm(format!("LLM request failed: {e}"))),
        },
        OpenAIError::ApiError(api) => {
            let haystack = format!(
                "{} {} {}",
                api.message,
                api.r#type.as_deref().unwrap_or_default(),
                api.code.as_deref().unwrap_or_default()
            )
            .to_lowercase();
            if ["rate limit", "rate_limit", "too many requests", "insufficient_quota"]
                .iter()
                .any(|needle| haystack.contains(needle))
            {
                Failure::Fatal(KedError::LlmRateLimit { retry_after: None })
            } else if ["unauthorized", "invalid api key", "invalid_api_key", "authentication"]
                .iter()
                .any(|needle| haystack.contains(needle))
            {
                Failure::Fatal(KedError::Llm(format!("LLM authentication failed: {api}")))
            } else if api.r#type.is_none() && api.code.is_none() {
                Failure::Transient(KedError::Llm(format!("LLM API error: {api}")))
            } else {
                Failure::Fatal(KedError::Llm(format!("LLM API error: {api}")))
            }
        }
        OpenAIError::JSONDeserialize(e) => {
            Failure::Fatal(KedError::Llm(format!("Failed to parse LLM response: {e}")))
        }
        OpenAIError::InvalidArgument(message) => Failure::Fatal(KedError::Validation(message)),
        other => Failure::Fatal(KedError::Llm(other.to_string())),
    }
}

fn first_choice(response: CreateChatCompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| KedError::Llm("LLM response contained no content".to_string()))
}

fn strip_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

impl ApiConfig {
    fn from_llm_config(config: &LlmConfig) -> Self {
        let (provider, model) = parse_llm_provider_model(&config.model);

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        let normalized_model = if provider.eq_ignore_ascii_case("local") {
            config.model.clone()
        } else {
            model.to_string()
        };

        Self {
            base_url,
            api_key: config.api_key.clone(),
            model: normalized_model,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openrouter" => OPENROUTER_BASE_URL,
        "ollama" => OLLAMA_BASE_URL,
        "lmstudio" => LMSTUDIO_BASE_URL,
        _ => OPENAI_BASE_URL,
    }
}
