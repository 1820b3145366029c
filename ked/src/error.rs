use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KedError {
    #[error("Database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("API rate limit exceeded, retry after {retry_after:?} seconds")]
    ApiRateLimit { retry_after: Option<u64> },

    #[error("API authentication error: {0}")]
    ApiAuth(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Transcription unavailable: {0}")]
    TranscriptionUnavailable(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM rate limit exceeded, retry after {retry_after:?} seconds")]
    LlmRateLimit { retry_after: Option<u64> },

    #[error("Job cancelled: {0}")]
    Cancelled(String),
}

impl IntoResponse for KedError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            KedError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            KedError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            KedError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            KedError::Database(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            KedError::Embedding(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            KedError::Http(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            KedError::Json(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            KedError::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            KedError::UrlParse(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            KedError::ApiRateLimit { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            KedError::ApiAuth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            KedError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            KedError::Transcription(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            KedError::TranscriptionUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            KedError::Llm(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            KedError::LlmUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            KedError::LlmRateLimit { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("LLM rate limit exceeded, retry after {retry_after:?} seconds"),
            ),
            KedError::Cancelled(msg) => (StatusCode::CONFLICT, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for KedError {
    fn from(errors: validator::ValidationErrors) -> Self {
        KedError::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KedError>;
