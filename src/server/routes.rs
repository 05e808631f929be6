use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::common::errors::{ApiError, ExtractorError};
use crate::server::AppState;

const RESOLVE_PATH: &str = "/api/resolve";

/// GET /api/resolve?url=...
///
/// Resolves a watch page URL into a playable manifest URL plus the headers
/// the player must send. `force=true` bypasses the cache, and any `h_`
/// prefixed query parameter is merged into the returned request headers.
pub async fn resolve(
  State(state): State<Arc<AppState>>,
  Query(params): Query<HashMap<String, String>>,
) -> Response {
  let Some(raw) = params.get("url") else {
    return (
      StatusCode::BAD_REQUEST,
      Json(ApiError::bad_request(
        "missing required query parameter: url",
        RESOLVE_PATH,
      )),
    )
      .into_response();
  };

  // watch URLs arrive percent-encoded from most callers
  let url = match urlencoding::decode(raw) {
    Ok(decoded) => decoded.into_owned(),
    Err(_) => raw.clone(),
  };
  let force = params
    .get("force")
    .map(|v| v.to_lowercase() == "true")
    .unwrap_or(false);

  info!("Resolving stream URL: {} (force={})", url, force);

  let mut stream = match state.registry.resolve(&url, force).await {
    Ok(stream) => stream,
    Err(e @ ExtractorError::UnsupportedUrl(_)) => {
      return (
        StatusCode::BAD_REQUEST,
        Json(ApiError::bad_request(e.to_string(), RESOLVE_PATH)),
      )
        .into_response();
    }
    Err(e) => {
      warn!("Extraction failed, retrying once with forced refresh: {}", e);
      match state.registry.resolve(&url, true).await {
        Ok(stream) => stream,
        Err(e) => {
          error!("Extraction failed for '{}': {}", url, e);
          return (
            StatusCode::BAD_GATEWAY,
            Json(ApiError::bad_gateway(e.to_string(), RESOLVE_PATH)),
          )
            .into_response();
        }
      }
    }
  };

  for (key, value) in &params {
    if let Some(name) = key.strip_prefix("h_") {
      stream.request_headers.insert(name.to_string(), value.clone());
    }
  }

  info!("Resolved '{}' -> {}", url, stream.destination_url);
  Json(stream).into_response()
}

#[derive(Serialize)]
pub struct ServiceInfo {
  name: &'static str,
  version: &'static str,
  build_time: u64,
  git_commit: &'static str,
  extractors: Vec<String>,
  proxies_configured: usize,
}

/// GET /api/info
pub async fn get_info(State(state): State<Arc<AppState>>) -> Json<ServiceInfo> {
  debug!("Received info request");

  Json(ServiceInfo {
    name: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
    build_time: option_env!("BUILD_TIME")
      .and_then(|s| s.parse().ok())
      .unwrap_or(0),
    git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown"),
    extractors: state.registry.extractor_names(),
    proxies_configured: state.config.dlhd.proxies.len(),
  })
}
