//! REST endpoints for health and rating statistics.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::ledger::RatingLedger;

/// Shared state for rating routes.
#[derive(Clone)]
pub struct RatingRouteState {
    pub ledger: Arc<RatingLedger>,
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/rating/stats
///
/// Returns average rating, review count and last review time, or 503 if
/// the rating store cannot be read.
async fn get_stats(State(state): State<RatingRouteState>) -> impl IntoResponse {
    match state.ledger.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            tracing::error!("Failed to load rating stats: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// Build the reporting REST routes.
pub fn rating_routes(state: RatingRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rating/stats", get(get_stats))
        .with_state(state)
}
