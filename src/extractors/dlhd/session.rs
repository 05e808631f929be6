use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::info;

use crate::common::errors::ExtractorError;
use crate::common::http::DEFAULT_USER_AGENT;

/// Lazily builds and hands out the shared `reqwest::Client`.
///
/// The client carries a cookie jar so a whole resolution looks like one
/// browser session to the anti-bot layer. `invalidate` drops the client and
/// its cookies; the next `acquire` builds a fresh one, drawing a new random
/// proxy when any are configured.
pub struct SessionManager {
  proxies: Vec<String>,
  session: Mutex<Option<reqwest::Client>>,
}

impl SessionManager {
  pub fn new(proxies: Vec<String>) -> Self {
    Self {
      proxies,
      session: Mutex::new(None),
    }
  }

  /// Current session, building one if none is alive.
  pub async fn acquire(&self) -> Result<reqwest::Client, ExtractorError> {
    let mut guard = self.session.lock().await;
    if let Some(client) = guard.as_ref() {
      return Ok(client.clone());
    }
    let client = self.build_session()?;
    *guard = Some(client.clone());
    Ok(client)
  }

  /// Drop the current session so the next request starts from scratch.
  pub async fn invalidate(&self) {
    let mut guard = self.session.lock().await;
    *guard = None;
  }

  pub async fn close(&self) {
    self.invalidate().await;
  }

  fn build_session(&self) -> Result<reqwest::Client, ExtractorError> {
    let mut builder = reqwest::Client::builder()
      .user_agent(DEFAULT_USER_AGENT)
      // Total request timeout (headers + body).
      .timeout(Duration::from_secs(60))
      // Separate connect timeout: a slow handshake must not eat the whole request timeout.
      .connect_timeout(Duration::from_secs(30))
      .read_timeout(Duration::from_secs(30))
      // Small per-host pool; the watch site rate-limits eager clients.
      .pool_max_idle_per_host(3)
      .pool_idle_timeout(Duration::from_secs(30))
      // Cookie jar keeps the session looking like one real browser.
      .cookie_store(true)
      // Some upstream CDNs serve mismatched certificates.
      .danger_accept_invalid_certs(true);

    if let Some(proxy_url) = self.proxies.choose(&mut rand::thread_rng()) {
      info!("Using proxy {} for the DLHD session", proxy_url);
      let proxy = reqwest::Proxy::all(proxy_url).map_err(ExtractorError::Session)?;
      builder = builder.proxy(proxy);
    }

    builder.build().map_err(ExtractorError::Session)
  }
}
