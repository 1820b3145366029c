use axum::extract::State;
use serde::Serialize;

use crate::api::state::AppState;
use crate::api::v1::response::ApiResponse;
use crate::llm::LlmBackend;

/// Process health. Always 200; degraded collaborators show up per field.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub database: ComponentStatus,
    pub embeddings: ComponentStatus,
    pub transcription: ComponentStatus,
    pub llm: ComponentStatus,
    pub sources: SourcesStatus,
    pub jobs: JobsStatus,
}

/// `status` is `ok`, `error`, `available` or `unavailable`.
#[derive(Debug, Clone, Default, Serialize, utoipa::ToSchema)]
pub struct ComponentStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

impl ComponentStatus {
    fn availability(available: bool) -> Self {
        Self {
            status: if available { "available" } else { "unavailable" }.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourcesStatus {
    pub registered: usize,
    /// Sources whose circuit is currently open.
    pub suspended: Vec<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobsStatus {
    pub in_flight: usize,
}

/// `GET /api/v1/health`
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "health",
    responses(
        (status = 200, description = "Service health status", body = HealthData),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> ApiResponse<HealthData> {
    let database = ComponentStatus {
        status: match state.db.sync().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "Health check could not reach the job store");
                "error"
            }
        }
        .to_string(),
        ..Default::default()
    };

    let embeddings = ComponentStatus {
        model: Some(state.config.embeddings.model.clone()),
        dimensions: Some(state.embeddings.dimensions()),
        ..ComponentStatus::availability(state.embeddings.is_available())
    };

    let transcription_up = state.transcription.is_available();
    let transcription = ComponentStatus {
        model: transcription_up.then(|| state.config.transcription.model.clone()),
        ..ComponentStatus::availability(transcription_up)
    };

    let llm = if state.llm.is_available() {
        ComponentStatus {
            provider: Some(llm_provider_name(state.llm.backend()).to_string()),
            model: state.llm.config().map(|c| c.model.clone()),
            ..ComponentStatus::availability(true)
        }
    } else {
        ComponentStatus::availability(false)
    };

    let dispatcher = state.enrichment.dispatcher();
    let names = dispatcher.registry().names();
    let suspended = dispatcher
        .circuit()
        .snapshot(names.iter().map(String::as_str))
        .into_iter()
        .filter(|health| !health.available)
        .map(|health| health.source)
        .collect();

    ApiResponse::success(HealthData {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        embeddings,
        transcription,
        llm,
        sources: SourcesStatus {
            registered: names.len(),
            suspended,
        },
        jobs: JobsStatus {
            in_flight: state.enrichment.in_flight(),
        },
    })
}

fn llm_provider_name(backend: &LlmBackend) -> &'static str {
    match backend {
        LlmBackend::OpenAI => "openai",
        LlmBackend::OpenRouter => "openrouter",
        LlmBackend::Ollama => "ollama",
        LlmBackend::LmStudio => "lmstudio",
        LlmBackend::OpenAICompatible { .. } => "openai-compatible",
        LlmBackend::Unavailable { .. } => "unavailable",
    }
}
