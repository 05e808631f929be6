use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::configs::Config;
use crate::extractors::ExtractorRegistry;

mod routes;

/// Shared state handed to every request handler.
pub struct AppState {
    pub registry: ExtractorRegistry,
    pub config: Config,
}

const API: &str = "/api";

/// Build the HTTP router with all routes mounted under `/api`.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/resolve", get(routes::resolve))
        .route("/info", get(routes::get_info));

    Router::new()
        .nest(API, api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
