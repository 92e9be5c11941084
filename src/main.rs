use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nextcloud_share::{config::Config, services::nextcloud::NextcloudService, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!(
        "Using Nextcloud at {} as {} (usage folder: {})",
        config.nextcloud.instance_url,
        config.nextcloud.username,
        config.nextcloud.usage_folder.as_deref().unwrap_or("<account root>")
    );

    let nextcloud = NextcloudService::new(config.nextcloud.clone())?;
    let server_address = config.server_address.clone();
    let state = Arc::new(AppState { config, nextcloud });

    let app = nextcloud_share::routes::api_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&server_address).await?;
    info!("Server starting on {}", server_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(state) {
        Ok(state) => state.nextcloud.close(),
        Err(_) => warn!("Application state still in use at shutdown; connection pool not closed explicitly"),
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
