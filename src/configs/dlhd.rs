use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DlhdConfig {
    /// Landing page of the watch site. Probed once per process; also the
    /// fallback when the probe fails.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Outbound proxy URLs (http, https or socks5). One is drawn at random
    /// each time a session is built.
    #[serde(default)]
    pub proxies: Vec<String>,
    /// Path of the resolved-stream cache file.
    #[serde(default = "default_cache_file")]
    pub cache_file: String,
    #[serde(default = "default_request_retries")]
    pub request_retries: usize,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
}

fn default_base_url() -> String {
    "https://daddylive.sx/".to_string()
}

fn default_cache_file() -> String {
    ".dlhd_cache".to_string()
}

fn default_request_retries() -> usize { 3 }

fn default_retry_initial_delay_ms() -> u64 { 2000 }

impl Default for DlhdConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            proxies: Vec::new(),
            cache_file: default_cache_file(),
            request_retries: default_request_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
        }
    }
}
