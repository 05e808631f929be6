use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{error, info, trace, warn};

use super::headers::headers_for_url;
use super::session::SessionManager;
use crate::common::errors::ExtractorError;

/// Timeout for cache-validation HEAD probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A fully buffered upstream response.
///
/// The body is read inside the retry loop so truncated payloads surface as
/// retryable transport errors; JSON is parsed lazily on demand.
#[derive(Debug)]
pub struct PageResponse {
  status: StatusCode,
  headers: HeaderMap,
  url: String,
  body: String,
}

impl PageResponse {
  #[allow(dead_code)]
  pub fn status(&self) -> StatusCode {
    self.status
  }

  #[allow(dead_code)]
  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  /// Final URL after redirects.
  #[allow(dead_code)]
  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn text(&self) -> &str {
    &self.body
  }

  pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    serde_json::from_str(&self.body)
  }
}

enum GetError {
  /// Connection-level failure: worth backing off and eventually recycling
  /// the session.
  Transport(reqwest::Error),
  /// The upstream answered, but with an error status.
  Status(StatusCode),
  /// Anything else (invalid URL, redirect loop, ...).
  Other(reqwest::Error),
}

fn classify(e: reqwest::Error) -> GetError {
  if e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request() {
    GetError::Transport(e)
  } else {
    GetError::Other(e)
  }
}

fn backoff_delay(initial: Duration, attempt: usize) -> Duration {
  initial * 2u32.saturating_pow(attempt as u32)
}

fn to_header_map(headers: &HashMap<String, String>) -> HeaderMap {
  let mut map = HeaderMap::new();
  for (name, value) in headers {
    match (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) {
      (Ok(name), Ok(value)) => {
        map.insert(name, value);
      }
      _ => trace!("Skipping invalid header: {}", name),
    }
  }
  map
}

/// Issues upstream requests through the shared session, with retry, backoff
/// and session recycling.
pub struct RequestExecutor {
  sessions: Arc<SessionManager>,
  retries: usize,
  initial_delay: Duration,
}

impl RequestExecutor {
  pub fn new(sessions: Arc<SessionManager>, retries: usize, initial_delay: Duration) -> Self {
    Self {
      sessions,
      retries,
      initial_delay,
    }
  }

  /// GET `url` with the header policy applied, retrying on failure.
  ///
  /// Transport failures back off exponentially and tear down the session
  /// once the final attempt fails. Error statuses and other non-transport
  /// failures get a single fixed-delay retry before being surfaced.
  pub async fn get(
    &self,
    url: &str,
    headers: &HashMap<String, String>,
    iframe_context: Option<&str>,
  ) -> Result<PageResponse, ExtractorError> {
    let final_headers = headers_for_url(url, headers, iframe_context);
    let header_map = to_header_map(&final_headers);
    let retries = self.retries.max(1);

    let mut attempt = 0;
    let mut retried_non_transport = false;
    loop {
      let client = self.sessions.acquire().await?;
      info!("Attempt {}/{} for URL: {}", attempt + 1, retries, url);

      match self.try_get(&client, url, header_map.clone()).await {
        Ok(resp) => {
          info!("Request for {} succeeded on attempt {}", url, attempt + 1);
          return Ok(resp);
        }
        Err(GetError::Transport(e)) => {
          warn!(
            "Transport error on attempt {} for {}: {}",
            attempt + 1,
            url,
            e
          );
          if attempt + 1 >= retries {
            self.sessions.invalidate().await;
            return Err(ExtractorError::Transport {
              url: url.to_string(),
              attempts: retries,
              source: e,
            });
          }
          let delay = backoff_delay(self.initial_delay, attempt);
          info!("Waiting {:?} before the next attempt", delay);
          tokio::time::sleep(delay).await;
        }
        Err(GetError::Status(status)) => {
          error!("Status {} on attempt {} for {}", status, attempt + 1, url);
          if retried_non_transport || attempt + 1 >= retries {
            return Err(ExtractorError::Status {
              url: url.to_string(),
              status: status.as_u16(),
            });
          }
          retried_non_transport = true;
          tokio::time::sleep(self.initial_delay).await;
        }
        Err(GetError::Other(e)) => {
          error!(
            "Non-transport error on attempt {} for {}: {}",
            attempt + 1,
            url,
            e
          );
          if retried_non_transport || attempt + 1 >= retries {
            return Err(ExtractorError::Extraction(format!(
              "final error for {}: {}",
              url, e
            )));
          }
          retried_non_transport = true;
          tokio::time::sleep(self.initial_delay).await;
        }
      }

      attempt += 1;
    }
  }

  async fn try_get(
    &self,
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
  ) -> Result<PageResponse, GetError> {
    let resp = client
      .get(url)
      .headers(headers)
      .send()
      .await
      .map_err(classify)?;

    let status = resp.status();
    if status.as_u16() >= 400 {
      return Err(GetError::Status(status));
    }

    let resp_headers = resp.headers().clone();
    let final_url = resp.url().to_string();
    // Read the body here so a mid-body disconnect counts as a failed attempt.
    let body = resp.text().await.map_err(classify)?;

    Ok(PageResponse {
      status,
      headers: resp_headers,
      url: final_url,
      body,
    })
  }

  /// Single-shot HEAD used to validate cached entries. No retries and no
  /// header policy: the stored headers are replayed exactly as cached.
  pub async fn probe(
    &self,
    url: &str,
    headers: &HashMap<String, String>,
  ) -> Result<StatusCode, ExtractorError> {
    let client = self.sessions.acquire().await?;
    let resp = client
      .head(url)
      .headers(to_header_map(headers))
      .timeout(PROBE_TIMEOUT)
      .send()
      .await
      .map_err(|e| ExtractorError::Extraction(format!("cache probe failed for {}: {}", url, e)))?;
    Ok(resp.status())
  }
}
