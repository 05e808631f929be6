use serde::Serialize;
use thiserror::Error;

/// Errors produced while resolving a watch URL into a playable stream.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// Generic extraction failure (page layout changed, no player found, ...).
    #[error("{0}")]
    Extraction(String),

    /// The auth parameter decoder could not assemble the full parameter set.
    #[error("missing required parameters: {}", .fields.join(", "))]
    MissingParameters { fields: Vec<&'static str> },

    /// The HTTP session could not be constructed.
    #[error("failed to build http session: {0}")]
    Session(#[source] reqwest::Error),

    /// A request kept failing at the transport level after all retries.
    #[error("all {attempts} attempts failed for {url}: {source}")]
    Transport {
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },

    /// The upstream answered with an error status on the final attempt.
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// No registered extractor recognizes the URL.
    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),
}

/// JSON error body served by the HTTP API.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub status: u16,
    /// Reason phrase matching `status`.
    pub error: String,
    pub message: String,
    /// Request path that produced the error.
    pub path: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            status: 400,
            error: "Bad Request".into(),
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn bad_gateway(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            status: 502,
            error: "Bad Gateway".into(),
            message: message.into(),
            path: path.into(),
        }
    }

    #[allow(dead_code)]
    pub fn internal(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            status: 500,
            error: "Internal Server Error".into(),
            message: message.into(),
            path: path.into(),
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
