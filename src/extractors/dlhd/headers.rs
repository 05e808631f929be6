use std::collections::HashMap;

use reqwest::Url;
use tracing::debug;

use crate::common::http::DEFAULT_USER_AGENT;

/// Host suffix of the CDN serving the final manifests and segments.
pub const MEDIA_HOST: &str = "newkso.ru";

/// Apply the per-URL header policy on top of `base_headers`.
///
/// Requests to the media CDN are rewritten: before the iframe is known the
/// CDN gets a self-referential Referer/Origin, afterwards Referer points at
/// the iframe page and Origin at its forced-https origin. Every other host
/// receives `base_headers` untouched.
pub fn headers_for_url(
  url: &str,
  base_headers: &HashMap<String, String>,
  iframe_context: Option<&str>,
) -> HashMap<String, String> {
  let mut headers = base_headers.clone();

  let Ok(parsed) = Url::parse(url) else {
    return headers;
  };
  if !parsed.host_str().unwrap_or("").contains(MEDIA_HOST) {
    return headers;
  }

  let (referer, origin) = match iframe_context {
    Some(iframe_url) => {
      debug!("Applying media-host headers with iframe context for: {}", url);
      let origin = Url::parse(iframe_url)
        .map(|u| https_origin(&u))
        .unwrap_or_default();
      (iframe_url.to_string(), origin)
    }
    None => {
      let origin = origin_of(&parsed);
      (origin.clone(), origin)
    }
  };

  headers.insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());
  headers.insert("Referer".to_string(), referer);
  headers.insert("Origin".to_string(), origin);
  headers
}

/// Origin of a URL (scheme://host, keeping any explicit port).
pub fn origin_of(url: &Url) -> String {
  match url.port() {
    Some(port) => format!("{}://{}:{}", url.scheme(), url.host_str().unwrap_or(""), port),
    None => format!("{}://{}", url.scheme(), url.host_str().unwrap_or("")),
  }
}

/// Origin with the scheme forced to https, keeping any explicit port.
pub fn https_origin(url: &Url) -> String {
  match url.port() {
    Some(port) => format!("https://{}:{}", url.host_str().unwrap_or(""), port),
    None => format!("https://{}", url.host_str().unwrap_or("")),
  }
}
