pub mod auth;
pub mod config;
pub mod errors;
pub mod models;
pub mod routes;
pub mod services;
pub mod swagger;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod webdav_xml_parser;

use axum::Json;
use config::Config;
use services::nextcloud::NextcloudService;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub nextcloud: NextcloudService,
}

/// Health check endpoint for monitoring
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "Nextcloud share API is running"}))
}
