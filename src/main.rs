use std::net::SocketAddr;
use std::sync::Arc;

use dlhd_resolver::configs::Config;
use dlhd_resolver::extractors::ExtractorRegistry;
use dlhd_resolver::server::{self, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration ({e}), falling back to defaults");
        Config::default()
    });

    dlhd_resolver::common::logger::init(&config);

    let state = Arc::new(AppState {
        registry: ExtractorRegistry::new(&config),
        config: config.clone(),
    });

    let app = server::router(state.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let address = SocketAddr::new(config.server.host.parse()?, config.server.port);
    info!("DLHD resolver listening on {}", address);

    let listener = tokio::net::TcpListener::bind(address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // drop long-lived extractor sessions before the runtime goes away
    state.registry.close_all().await;
    info!("Shut down cleanly");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
