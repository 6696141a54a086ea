use crate::api::{handlers, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/v1/health", get(handlers::health_check))
        // Case lifecycle
        .route("/v1/cases", post(handlers::create_case))
        .route("/v1/cases", get(handlers::list_cases))
        .route("/v1/cases/:id", get(handlers::get_case))
        .route("/v1/cases/:id/submit", post(handlers::submit_case))
        .route("/v1/cases/:id/evidence", post(handlers::add_evidence))
        .route("/v1/cases/:id/review", post(handlers::review_case))
        .route("/v1/cases/:id/history", get(handlers::case_history))
        // Review queues
        .route("/v1/queues/:role", get(handlers::list_queue))
        .route("/v1/queues/:role/claim", post(handlers::claim_assignment))
        // Policy browse & what-if
        .route("/v1/policies", get(handlers::list_policies))
        .route("/v1/policies/:id", get(handlers::get_policy))
        .route("/v1/policies/:id/simulate", post(handlers::simulate_policy))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
}
