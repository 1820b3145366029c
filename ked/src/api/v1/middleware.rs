//! Bearer-key gate for the protected v1 routes.
//!
//! Keys come from `KED_API_KEYS`. With no keys configured every protected
//! route answers 401, so a misconfigured deployment never runs open.
//! Rejections use the v1 JSON envelope.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::state::AppState;

use super::response::{ApiResponse, ErrorCode};

const BEARER_PREFIX: &str = "Bearer ";

/// Admits the request when its bearer token is one of the configured keys.
pub async fn v1_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let keys = &state.config.server.api_keys;
    if keys.is_empty() {
        return unauthorized("API keys not configured. Set KED_API_KEYS to enable access.");
    }

    let token = match bearer_token(request.headers()) {
        Ok(token) => token,
        Err(message) => return unauthorized(message),
    };

    if !keys.iter().any(|key| key == token) {
        tracing::debug!(path = %request.uri().path(), "Rejected unknown API key");
        return unauthorized("Invalid API key");
    }

    next.run(request).await
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, &'static str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or("Missing authorization header")?
        .to_str()
        .map_err(|_| "Invalid authorization header format. Expected: Bearer <token>")?;

    value
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or("Invalid authorization header format. Expected: Bearer <token>")
}

fn unauthorized(message: &str) -> Response {
    ApiResponse::<()>::error(ErrorCode::Unauthorized, message).into_response()
}
