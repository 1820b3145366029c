//! v1 Enrichment handlers.
//!
//! Submission returns as soon as the job is persisted; callers poll the
//! status endpoint until the job is terminal. Every job is scoped to the
//! `X-User-Id` of the request that created it.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;

use crate::api::v1::dto::{
    CancelEnrichmentResponse, EnrichmentStage, EnrichmentStatusResponse, ListEnrichmentsQuery,
    ListEnrichmentsResponse, StageCountResponse, SubmitEnrichmentRequest,
    SubmitEnrichmentResponse,
};
use crate::api::v1::response::{ApiError, ApiResponse, ErrorCode, ResponseMeta};
use crate::api::{AppState, UserId};
use crate::error::KedError;

/// `POST /api/v1/enrichments`
///
/// Queues a conversation for enrichment. Returns 202 Accepted with the
/// `jobId` to poll.
#[utoipa::path(
    post,
    path = "/api/v1/enrichments",
    tag = "enrichments",
    operation_id = "enrichments.submit",
    request_body = SubmitEnrichmentRequest,
    params(
        ("X-User-Id" = Option<String>, Header, description = "Owner of the job, defaults to `anonymous`"),
    ),
    responses(
        (status = 202, description = "Enrichment accepted", body = SubmitEnrichmentResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
)]
pub async fn submit_enrichment(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<SubmitEnrichmentRequest>, JsonRejection>,
) -> ApiResponse<SubmitEnrichmentResponse> {
    let Json(req) = match payload {
        Ok(json) => json,
        Err(rejection) => return KedError::from(rejection).into(),
    };

    match state.enrichment.submit(&user_id, req.into()).await {
        Ok(job_id) => ApiResponse::accepted(SubmitEnrichmentResponse {
            job_id,
            stage: EnrichmentStage::Pending,
        }),
        Err(e) => e.into(),
    }
}

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 200;

/// `GET /api/v1/enrichments`
///
/// Lists the caller's jobs, newest first. `meta.total` counts every job
/// matching the stage filter, not just the returned page.
#[utoipa::path(
    get,
    path = "/api/v1/enrichments",
    tag = "enrichments",
    operation_id = "enrichments.list",
    params(
        ListEnrichmentsQuery,
        ("X-User-Id" = Option<String>, Header, description = "Owner of the jobs"),
    ),
    responses(
        (status = 200, description = "Jobs listed", body = ListEnrichmentsResponse),
        (status = 400, description = "Invalid query", body = ApiError),
    )
)]
pub async fn list_enrichments(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    query: Result<Query<ListEnrichmentsQuery>, QueryRejection>,
) -> ApiResponse<ListEnrichmentsResponse> {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return ApiResponse::error(ErrorCode::InvalidRequest, rejection.body_text())
        }
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let stage = query.stage.map(Into::into);

    let listing = match state.enrichment.list(&user_id, stage, limit).await {
        Ok(listing) => listing,
        Err(e) => return e.into(),
    };

    let meta = ResponseMeta {
        total: Some(listing.total(stage)),
    };
    let counts = listing
        .counts
        .iter()
        .map(|(stage, count)| StageCountResponse {
            stage: (*stage).into(),
            count: *count,
        })
        .collect();
    let enrichments = listing.jobs.into_iter().map(Into::into).collect();

    ApiResponse::success_with_meta(ListEnrichmentsResponse { enrichments, counts }, meta)
}

/// `GET /api/v1/enrichments/{jobId}`
#[utoipa::path(
    get,
    path = "/api/v1/enrichments/{jobId}",
    tag = "enrichments",
    operation_id = "enrichments.get",
    params(
        ("jobId" = String, Path, description = "Job ID returned by submit"),
        ("X-User-Id" = Option<String>, Header, description = "Owner of the job"),
    ),
    responses(
        (status = 200, description = "Job status", body = EnrichmentStatusResponse),
        (status = 404, description = "Job not found", body = ApiError),
    )
)]
pub async fn get_enrichment(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(job_id): Path<String>,
) -> ApiResponse<EnrichmentStatusResponse> {
    match state.enrichment.get_status(&job_id, &user_id).await {
        Ok(status) => ApiResponse::success(status.into()),
        Err(e) => e.into(),
    }
}

/// `POST /api/v1/enrichments/{jobId}:cancel`
///
/// Requests cooperative cancellation. The job stops at its next stage
/// boundary; cancelling a terminal job returns its status unchanged.
#[utoipa::path(
    post,
    path = "/api/v1/enrichments/{jobId}:cancel",
    tag = "enrichments",
    operation_id = "enrichments.cancel",
    params(
        ("jobId" = String, Path, description = "Job ID returned by submit"),
        ("X-User-Id" = Option<String>, Header, description = "Owner of the job"),
    ),
    responses(
        (status = 200, description = "Cancellation recorded", body = CancelEnrichmentResponse),
        (status = 404, description = "Job not found", body = ApiError),
    )
)]
pub async fn cancel_enrichment(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    job_id: String,
) -> ApiResponse<CancelEnrichmentResponse> {
    match state.enrichment.cancel(&job_id, &user_id).await {
        Ok(status) => ApiResponse::success(status.into()),
        Err(e) => e.into(),
    }
}

/// `POST /api/v1/enrichments/{jobRef}` dispatches custom methods written
/// as `<jobId>:<method>`.
pub async fn enrichment_action(
    state: State<AppState>,
    user: UserId,
    Path(job_ref): Path<String>,
) -> ApiResponse<CancelEnrichmentResponse> {
    match job_ref.rsplit_once(':') {
        Some((job_id, "cancel")) if !job_id.is_empty() => {
            cancel_enrichment(state, user, job_id.to_string()).await
        }
        _ => ApiResponse::error(
            ErrorCode::NotFound,
            format!("Unknown enrichment action: {job_ref}"),
        ),
    }
}
