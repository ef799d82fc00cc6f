//! Router assembly. Mirrors the teacher's `routes::create_api_router` /
//! `routes::v1::create_v1_router` nesting: a thin top-level router that
//! nests a versioned API router, plus an unversioned health check.

mod v1;

use crate::app_state::AppState;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

async fn healthz() -> &'static str {
    "ok"
}

pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", v1::create_v1_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
