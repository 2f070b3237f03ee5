use std::sync::Arc;

use sqlx::PgPool;

use crate::background::pipeline::BackgroundPipeline;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Extraction pipeline with its completion service, document and repository collaborators.
    pub pipeline: Arc<BackgroundPipeline>,
}
