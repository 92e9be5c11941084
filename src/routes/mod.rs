pub mod files;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

/// Every public route, without middleware layers
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(crate::health_check))
        .route("/api/health", get(crate::health_check))
        .merge(files::router())
        .merge(crate::swagger::create_openapi_router())
}
