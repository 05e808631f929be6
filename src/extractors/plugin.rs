use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::errors::ExtractorError;

/// Everything a downstream media proxy needs to play a resolved stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedStream {
    /// Final HLS manifest URL.
    pub destination_url: String,
    /// Headers the player must send when fetching the manifest and segments.
    pub request_headers: HashMap<String, String>,
    /// Which proxy endpoint should serve this stream.
    pub mediaflow_endpoint: String,
    /// Auth handshake parameters, kept so cached entries can be re-validated.
    pub auth_data: AuthData,
}

/// Parameters recovered from the embedded player page, plus the iframe URL
/// they were scraped from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthData {
    pub channel_key: String,
    pub auth_ts: String,
    pub auth_rnd: String,
    pub auth_sig: String,
    pub auth_host: String,
    pub auth_php: String,
    pub iframe_url: String,
}

/// Trait that all stream extractors implement.
///
/// Each extractor recognizes the watch URLs of one site and turns them into
/// a playable manifest URL with the right request headers.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Unique identifier for this extractor (e.g. "dlhd").
    fn name(&self) -> &str;

    /// Check if this extractor can handle the given URL.
    fn can_handle(&self, url: &str) -> bool;

    /// Resolve the URL into a playable stream.
    ///
    /// `force_refresh` bypasses the cache and re-runs the full resolution.
    async fn extract(
        &self,
        url: &str,
        force_refresh: bool,
    ) -> Result<ResolvedStream, ExtractorError>;

    /// Release any long-lived resources (HTTP sessions, ...).
    async fn close(&self) {}
}

pub type BoxedExtractor = Box<dyn Extractor>;
