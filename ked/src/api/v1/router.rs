use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::api::state::AppState;

use super::handlers;
use super::middleware::v1_auth_middleware;

pub fn v1_router(state: AppState) -> Router<AppState> {
    let enrichments = Router::new()
        .route(
            "/",
            get(handlers::enrichments::list_enrichments)
                .post(handlers::enrichments::submit_enrichment),
        )
        .route(
            "/{jobRef}",
            get(handlers::enrichments::get_enrichment)
                .post(handlers::enrichments::enrichment_action),
        );

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/openapi.json", get(super::openapi::openapi_json))
        .merge(super::openapi::redoc_router());

    let protected_routes = Router::new()
        .nest("/enrichments", enrichments)
        .route("/sources", get(handlers::sources::list_sources))
        .route_layer(middleware::from_fn_with_state(state, v1_auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
