//! v1 Source handlers.

use axum::extract::State;

use crate::api::v1::dto::{ListSourcesResponse, SourceStatusResponse};
use crate::api::v1::response::{ApiError, ApiResponse, ResponseMeta};
use crate::api::AppState;

/// `GET /api/v1/sources`
///
/// Lists registered source adapters with circuit, reliability and
/// rate-limit state, plus the egress pool.
#[utoipa::path(
    get,
    path = "/api/v1/sources",
    tag = "sources",
    operation_id = "sources.list",
    responses(
        (status = 200, description = "Source status", body = ListSourcesResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
)]
pub async fn list_sources(State(state): State<AppState>) -> ApiResponse<ListSourcesResponse> {
    let dispatcher = state.enrichment.dispatcher();
    let names = dispatcher.registry().names();
    let defaults = state.enrichment.default_sources();

    let sources: Vec<SourceStatusResponse> = dispatcher
        .circuit()
        .snapshot(names.iter().map(String::as_str))
        .into_iter()
        .map(|health| {
            let default_enabled = defaults.iter().any(|d| d == &health.source);
            let remaining = dispatcher.rate_limiter().remaining(&health.source);
            let rule = dispatcher.rate_limiter().rule(&health.source);
            let mut status = SourceStatusResponse::from_health(health, default_enabled);
            status.rate_limit_remaining = remaining;
            status.rate_limit_per_window = rule.map(|r| r.limit);
            status.rate_limit_window_secs = rule.map(|r| r.window_secs);
            status
        })
        .collect();

    let egress = dispatcher
        .circuit()
        .egress_snapshot()
        .into_iter()
        .map(Into::into)
        .collect();

    let total = sources.len() as u64;
    ApiResponse::success_with_meta(
        ListSourcesResponse { sources, egress },
        ResponseMeta { total: Some(total) },
    )
}
