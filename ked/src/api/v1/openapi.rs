use axum::Json;
use utoipa::OpenApi;
use utoipa_redoc::{Redoc, Servable};

use super::dto;
use super::handlers;
use super::response;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ked API",
        version = "1.0.0",
        description = "Conversation enrichment service. Resolves the person behind a conversation across public sources and builds an outreach profile.",
    ),
    paths(
        handlers::health::health_check,
        handlers::enrichments::submit_enrichment,
        handlers::enrichments::list_enrichments,
        handlers::enrichments::get_enrichment,
        handlers::enrichments::cancel_enrichment,
        handlers::sources::list_sources,
    ),
    components(schemas(
        // Response envelope
        response::ErrorCode,
        response::ApiError,
        response::ResponseMeta,
        // Enrichments
        dto::SubmitEnrichmentRequest,
        dto::SubmitEnrichmentResponse,
        dto::EnrichmentStage,
        dto::EnrichmentStatusResponse,
        dto::CancelEnrichmentResponse,
        dto::ListEnrichmentsQuery,
        dto::ListEnrichmentsResponse,
        dto::EnrichmentSummaryResponse,
        dto::StageCountResponse,
        dto::EnrichmentResultResponse,
        dto::IdentityResponse,
        dto::ScoredCandidateResponse,
        dto::CandidateResponse,
        dto::ProfileResponse,
        dto::TraitScoresResponse,
        dto::FusionWeightsResponse,
        dto::StrategyResponse,
        dto::DispatchResponse,
        dto::SourceOutcomeResponse,
        // Sources
        dto::ListSourcesResponse,
        dto::SourceStatusResponse,
        dto::EgressStatusResponse,
        // Health (handler-local types)
        handlers::health::HealthData,
        handlers::health::ComponentStatus,
        handlers::health::SourcesStatus,
        handlers::health::JobsStatus,
    )),
    tags(
        (name = "health", description = "Health check"),
        (name = "enrichments", description = "Enrichment job submission, listing, polling, and cancellation"),
        (name = "sources", description = "Source adapter and egress health"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(utoipa::openapi::security::Http::new(
                utoipa::openapi::security::HttpAuthScheme::Bearer,
            )),
        );
    }
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn redoc_router<S: Clone + Send + Sync + 'static>() -> axum::Router<S> {
    Redoc::with_url("/docs", ApiDoc::openapi()).into()
}
