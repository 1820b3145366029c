//! v1 response envelope.
//!
//! ```json
//! { "data": { ... }, "meta": { "total": 3 }, "error": { "code": "not_found", "message": "..." } }
//! ```
//!
//! `data` and `error` are mutually exclusive. Job IDs are 21-character
//! nanoids.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::KedError;

const INTERNAL_MESSAGE: &str = "An internal error occurred";

/// Error classification on the wire, serialized snake_case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    Unauthorized,
    NotFound,
    /// The job is in a state that does not allow the operation.
    Conflict,
    /// Details are logged, never returned.
    InternalError,
    /// An optional collaborator (LLM, transcription) is not configured.
    NotImplemented,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ApiError {
    pub code: ErrorCode,
    /// Safe to show to end users.
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Envelope returned by every v1 handler. The HTTP status travels with it
/// but is not serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(skip)]
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    fn payload(data: T, meta: Option<ResponseMeta>, status: StatusCode) -> Self {
        Self {
            data: Some(data),
            meta,
            error: None,
            status,
        }
    }

    pub fn success(data: T) -> Self {
        Self::payload(data, None, StatusCode::OK)
    }

    pub fn success_with_meta(data: T, meta: ResponseMeta) -> Self {
        Self::payload(data, Some(meta), StatusCode::OK)
    }

    /// 202: the job is stored and runs in the background.
    pub fn accepted(data: T) -> Self {
        Self::payload(data, None, StatusCode::ACCEPTED)
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            data: None,
            meta: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
            status: code.status(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match serde_json::to_value(&self) {
            Ok(body) => (self.status, Json(body)).into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize v1 response");
                let fallback = ApiResponse::<()>::error(ErrorCode::InternalError, INTERNAL_MESSAGE);
                let status = fallback.status;
                (status, Json(fallback)).into_response()
            }
        }
    }
}

impl<T: Serialize> From<KedError> for ApiResponse<T> {
    fn from(err: KedError) -> Self {
        let (code, message) = match err {
            KedError::NotFound(msg) => (ErrorCode::NotFound, msg),
            KedError::Validation(msg) => (ErrorCode::InvalidRequest, msg),
            KedError::Conflict(msg) | KedError::Cancelled(msg) => (ErrorCode::Conflict, msg),
            KedError::ApiAuth(_) => (ErrorCode::Unauthorized, "Authentication required".into()),
            KedError::Json(e) => (ErrorCode::InvalidRequest, format!("Invalid JSON: {e}")),
            KedError::UrlParse(e) => (ErrorCode::InvalidRequest, format!("Invalid URL: {e}")),
            KedError::ApiRateLimit { retry_after } | KedError::LlmRateLimit { retry_after } => {
                let msg = match retry_after {
                    Some(secs) => format!("Rate limit exceeded, retry after {secs} seconds"),
                    None => "Rate limit exceeded".to_string(),
                };
                (ErrorCode::InvalidRequest, msg)
            }
            KedError::LlmUnavailable(msg) | KedError::TranscriptionUnavailable(msg) => {
                (ErrorCode::NotImplemented, msg)
            }
            internal @ (KedError::Database(_)
            | KedError::Embedding(_)
            | KedError::Http(_)
            | KedError::Io(_)
            | KedError::Internal(_)
            | KedError::Transcription(_)
            | KedError::Llm(_)) => {
                tracing::error!(error = %internal, "Internal error mapped to v1 response");
                (ErrorCode::InternalError, INTERNAL_MESSAGE.to_string())
            }
        };
        ApiResponse::error(code, message)
    }
}
