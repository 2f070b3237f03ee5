pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::background::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/background", get(handlers::handle_latest))
        .route(
            "/api/v1/background/extract",
            post(handlers::handle_extract),
        )
        .with_state(state)
}
