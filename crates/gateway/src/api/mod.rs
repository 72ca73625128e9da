//! HTTP surface.

mod jobs;

use crate::state::AppState;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    Router::new()
        .route("/v1/jobs", post(jobs::submit_job))
        .route("/v1/jobs/:id", get(jobs::job_status))
        .route("/v1/jobs/:id/stream", get(jobs::stream_logs))
        .route("/v1/jobs/:id/report", get(jobs::job_report))
        .route("/v1/jobs/:id/rerun", post(jobs::rerun_job))
        .route("/v1/jobs/:id/report_requirement", post(jobs::revise_report))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}
