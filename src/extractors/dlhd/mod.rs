mod cache;
mod decoder;
mod headers;
mod request;
mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use reqwest::{StatusCode, Url};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::common::errors::ExtractorError;
use crate::common::http::DEFAULT_USER_AGENT;
use crate::common::types::ChannelId;
use crate::configs::DlhdConfig;
use crate::extractors::plugin::{AuthData, Extractor, ResolvedStream};

use cache::CacheStore;
use decoder::{AuthBundle, ParamDecoder};
use headers::{MEDIA_HOST, https_origin, origin_of};
use request::RequestExecutor;
use session::SessionManager;

/// Endpoint path segments tried in order until one resolves.
const ENDPOINTS: [&str; 4] = ["stream/", "cast/", "player/", "watch/"];

/// Downstream proxy endpoint that knows how to serve HLS manifests.
const MEDIAFLOW_ENDPOINT: &str = "hls_manifest_proxy";

/// Resolves DLHD watch URLs into playable HLS manifest URLs.
///
/// A resolution walks the site's hop chain (watch page, player page, iframe
/// page), decodes the obfuscated auth parameters embedded in the iframe,
/// performs the signed auth handshake and asks the server lookup which CDN
/// host carries the channel. Successful results are cached on disk and
/// revalidated with a HEAD probe before reuse.
pub struct DlhdExtractor {
  sessions: Arc<SessionManager>,
  executor: RequestExecutor,
  cache: CacheStore,
  decoder: ParamDecoder,
  // Confirmed once per process; config value is the uncached fallback.
  base_url: RwLock<Option<String>>,
  // Watch URL shapes, most specific first. The premium pattern is anchored
  // so a manifest URL is never mistaken for a watch page.
  channel_id_res: [Regex; 5],
  stream_page_re: Regex,
  player_button_re: Regex,
  player_anchor_re: Regex,
  iframe_re: Regex,
  config: DlhdConfig,
}

impl DlhdExtractor {
  pub fn new(config: DlhdConfig) -> Self {
    let sessions = Arc::new(SessionManager::new(config.proxies.clone()));
    let executor = RequestExecutor::new(
      Arc::clone(&sessions),
      config.request_retries,
      Duration::from_millis(config.retry_initial_delay_ms),
    );
    let cache = CacheStore::open(&config.cache_file);

    Self {
      sessions,
      executor,
      cache,
      decoder: ParamDecoder::new(),
      base_url: RwLock::new(None),
      channel_id_res: [
        case_insensitive(r"/premium(\d+)/mono\.m3u8$"),
        case_insensitive(r"/(?:watch|stream|cast|player)/stream-(\d+)\.php"),
        case_insensitive(r"watch\.php\?id=(\d+)"),
        case_insensitive(r"(?:%2F|/)stream-(\d+)\.php"),
        case_insensitive(r"stream-(\d+)\.php"),
      ],
      stream_page_re: Regex::new(r"stream-\d+\.php").unwrap(),
      player_button_re: Regex::new(
        r#"<button[^>]*data-url="([^"]+)"[^>]*>Player\s*\d+</button>"#,
      )
      .unwrap(),
      player_anchor_re: Regex::new(
        r#"<a[^>]*href="([^"]+)"[^>]*>\s*<button[^>]*>\s*Player\s*2\s*</button>"#,
      )
      .unwrap(),
      iframe_re: Regex::new(r#"iframe src="([^"]*)"#).unwrap(),
      config,
    }
  }

  fn extract_channel_id(&self, url: &str) -> Option<ChannelId> {
    self
      .channel_id_res
      .iter()
      .find_map(|re| re.captures(url).map(|caps| ChannelId::from(&caps[1])))
  }

  /// The watch site's base URL, probed once and cached only when reachable.
  async fn base_url(&self) -> String {
    if let Some(url) = self.base_url.read().await.as_deref() {
      return url.to_string();
    }

    let mut cached = self.base_url.write().await;
    if let Some(url) = cached.as_deref() {
      return url.to_string();
    }

    let configured = self.config.base_url.clone();
    match self.executor.get(&configured, &HashMap::new(), None).await {
      Ok(_) => {
        info!("Base URL confirmed: {}", configured);
        *cached = Some(configured.clone());
      }
      Err(e) => {
        warn!("Base URL probe failed, using configured default: {}", e);
      }
    }
    configured
  }

  /// HEAD the cached manifest with its stored headers. Anything but a clean
  /// 200 means the entry must be re-resolved.
  async fn probe_cached(&self, channel: &ChannelId, cached: &ResolvedStream) -> bool {
    info!("Found cached stream for channel {}, validating", channel);
    match self
      .executor
      .probe(&cached.destination_url, &cached.request_headers)
      .await
    {
      Ok(status) if status == StatusCode::OK => {
        info!("Cached stream for channel {} is still valid", channel);
        true
      }
      Ok(status) => {
        warn!(
          "Cached stream for channel {} answered {}, re-resolving",
          channel, status
        );
        false
      }
      Err(e) => {
        warn!("Cache validation for channel {} failed: {}", channel, e);
        false
      }
    }
  }

  async fn resolve(
    &self,
    url: &str,
    force_refresh: bool,
  ) -> Result<ResolvedStream, ExtractorError> {
    let channel = self.extract_channel_id(url).ok_or_else(|| {
      ExtractorError::Extraction(format!("could not extract channel id from {url}"))
    })?;

    if !force_refresh {
      if let Some(cached) = self.cache.get(&channel).await {
        if self.probe_cached(&channel, &cached).await {
          return Ok(cached);
        }
        self.cache.remove(&channel).await;
        info!("Invalidated cached stream for channel {}", channel);
      }
    }

    let base_url = self.base_url().await;

    let mut last_error: Option<ExtractorError> = None;
    for endpoint in ENDPOINTS {
      info!("Trying endpoint: {}", endpoint);
      match self.try_endpoint(&base_url, endpoint, &channel).await {
        Ok(stream) => {
          self.cache.insert(channel.clone(), stream.clone()).await;
          info!("Endpoint {} succeeded for channel {}", endpoint, channel);
          return Ok(stream);
        }
        Err(e) => {
          warn!("Endpoint {} failed: {}", endpoint, e);
          last_error = Some(e);
        }
      }
    }

    Err(match last_error {
      Some(e) => ExtractorError::Extraction(format!("all endpoints failed, last error: {e}")),
      None => ExtractorError::Extraction("all endpoints failed with no detail".to_string()),
    })
  }

  /// Walk the player candidates on a watch page until one embeds an iframe.
  ///
  /// Returns the winning player URL and the raw iframe src. `hop_headers`
  /// is left pointing at the winning player so later fetches replay it as
  /// the referer.
  async fn discover_iframe(
    &self,
    base_url: &str,
    watch_page: &str,
    hop_headers: &mut HashMap<String, String>,
  ) -> Result<(String, String), ExtractorError> {
    let mut last_player_error: Option<ExtractorError> = None;

    for caps in self.player_button_re.captures_iter(watch_page) {
      let link = absolutize(base_url, &caps[1]);
      let origin = match parse_origin(&link) {
        Ok(origin) => origin,
        Err(e) => {
          last_player_error = Some(e);
          continue;
        }
      };
      hop_headers.insert("Referer".to_string(), link.clone());
      hop_headers.insert("Origin".to_string(), origin);

      match self.executor.get(&link, hop_headers, None).await {
        Ok(page) => {
          if let Some(found) = self.iframe_re.captures(page.text()) {
            return Ok((link, found[1].to_string()));
          }
          // player rendered without an iframe, try the next candidate
        }
        Err(e) => {
          last_player_error = Some(e);
        }
      }
    }

    // Old page layout: a single anchor wrapping a "Player 2" button.
    let Some(anchor) = self.player_anchor_re.captures(watch_page) else {
      return Err(match last_player_error {
        Some(e) => {
          ExtractorError::Extraction(format!("no player links found, last error: {e}"))
        }
        None => ExtractorError::Extraction("no player links found".to_string()),
      });
    };

    let link = absolutize(base_url, &anchor[1]).replace("//cast", "/cast");
    let origin = parse_origin(&link)?;
    hop_headers.insert("Referer".to_string(), link.clone());
    hop_headers.insert("Origin".to_string(), origin);

    let page = self.executor.get(&link, hop_headers, None).await?;
    match self.iframe_re.captures(page.text()) {
      Some(found) => Ok((link, found[1].to_string())),
      None => Err(match last_player_error {
        Some(e) => {
          ExtractorError::Extraction(format!("no iframe found in any player page: {e}"))
        }
        None => ExtractorError::Extraction("no iframe found in player page".to_string()),
      }),
    }
  }

  /// Run the whole hop chain for one endpoint candidate.
  async fn try_endpoint(
    &self,
    base_url: &str,
    endpoint: &str,
    channel: &ChannelId,
  ) -> Result<ResolvedStream, ExtractorError> {
    let stream_url = format!("{base_url}{endpoint}stream-{channel}.php");
    let base_origin = parse_origin(base_url)?;

    let mut hop_headers = HashMap::from([
      ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
      ("Referer".to_string(), base_url.to_string()),
      ("Origin".to_string(), base_origin),
    ]);

    let watch_page = self.executor.get(&stream_url, &hop_headers, None).await?;

    let (player_url, iframe_src) = self
      .discover_iframe(base_url, watch_page.text(), &mut hop_headers)
      .await?;

    // iframe srcs are usually relative to the player's origin
    let iframe_url = if iframe_src.starts_with("http") {
      iframe_src
    } else {
      format!(
        "{}/{}",
        parse_origin(&player_url)?,
        iframe_src.trim_start_matches('/')
      )
    };
    debug!("Iframe URL: {}", iframe_url);

    let iframe_page = self
      .executor
      .get(&iframe_url, &hop_headers, Some(&iframe_url))
      .await?;

    let mut bundle = self.decoder.decode(iframe_page.text())?;
    bundle.auth_php = normalize_auth_script(&bundle.auth_php);

    let iframe = Url::parse(&iframe_url).map_err(|e| {
      ExtractorError::Extraction(format!("invalid iframe URL {iframe_url}: {e}"))
    })?;
    let iframe_https_origin = https_origin(&iframe);

    // The handshake is side-effectful; any non-error response is enough.
    let auth_url = build_auth_url(&bundle);
    let mut auth_headers = hop_headers.clone();
    auth_headers.insert("Referer".to_string(), iframe_url.clone());
    auth_headers.insert("Origin".to_string(), iframe_https_origin.clone());
    self
      .executor
      .get(&auth_url, &auth_headers, Some(&iframe_url))
      .await?;

    let lookup_url = format!(
      "{}/server_lookup.php?channel_id={}",
      origin_of(&iframe),
      bundle.channel_key
    );
    let lookup = self
      .executor
      .get(&lookup_url, &hop_headers, Some(&iframe_url))
      .await?;
    let lookup_json: serde_json::Value = lookup.json().map_err(|e| {
      ExtractorError::Extraction(format!("server lookup returned invalid JSON: {e}"))
    })?;
    let server_key = lookup_json
      .get("server_key")
      .and_then(serde_json::Value::as_str)
      .filter(|key| !key.is_empty())
      .ok_or_else(|| {
        ExtractorError::Extraction("no server_key in lookup response".to_string())
      })?;
    info!("Server key obtained: {}", server_key);

    let destination_url = manifest_url(server_key, &bundle.channel_key);
    let request_headers = if destination_url.contains(MEDIA_HOST) {
      HashMap::from([
        ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
        ("Referer".to_string(), iframe_url.clone()),
        ("Origin".to_string(), iframe_https_origin),
      ])
    } else {
      HashMap::from([
        ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
        ("Referer".to_string(), iframe_https_origin.clone()),
        ("Origin".to_string(), iframe_https_origin),
      ])
    };
    debug!("Final stream headers: {:?}", request_headers);
    info!("Final stream URL: {}", destination_url);

    Ok(ResolvedStream {
      destination_url,
      request_headers,
      mediaflow_endpoint: MEDIAFLOW_ENDPOINT.to_string(),
      auth_data: AuthData {
        channel_key: bundle.channel_key,
        auth_ts: bundle.auth_ts,
        auth_rnd: bundle.auth_rnd,
        auth_sig: bundle.auth_sig,
        auth_host: bundle.auth_host,
        auth_php: bundle.auth_php,
        iframe_url,
      },
    })
  }
}

#[async_trait]
impl Extractor for DlhdExtractor {
  fn name(&self) -> &str {
    "dlhd"
  }

  fn can_handle(&self, url: &str) -> bool {
    url.contains("daddylive") || url.contains("dlhd") || self.stream_page_re.is_match(url)
  }

  async fn extract(
    &self,
    url: &str,
    force_refresh: bool,
  ) -> Result<ResolvedStream, ExtractorError> {
    self
      .resolve(url, force_refresh)
      .await
      .map_err(|e| ExtractorError::Extraction(format!("DLHD extraction failed completely: {e}")))
  }

  async fn close(&self) {
    self.sessions.close().await;
  }
}

fn case_insensitive(pattern: &str) -> Regex {
  RegexBuilder::new(pattern)
    .case_insensitive(true)
    .build()
    .unwrap()
}

fn absolutize(base_url: &str, link: &str) -> String {
  if link.starts_with("http") {
    link.to_string()
  } else {
    format!("{}{}", base_url, link.trim_start_matches('/'))
  }
}

fn parse_origin(url: &str) -> Result<String, ExtractorError> {
  let parsed = Url::parse(url)
    .map_err(|e| ExtractorError::Extraction(format!("invalid URL {url}: {e}")))?;
  Ok(origin_of(&parsed))
}

/// The site ships a bare `a.php` on some mirrors that actually serve the
/// handshake at `/auth.php`. Anything else passes through untouched.
fn normalize_auth_script(auth_php: &str) -> String {
  if auth_php.trim().trim_start_matches('/') == "a.php" {
    "/auth.php".to_string()
  } else {
    auth_php.to_string()
  }
}

/// Join host and script without doubling or dropping the slash between
/// them, then append the signed query. Only the signature is quoted.
fn build_auth_url(bundle: &AuthBundle) -> String {
  let host = &bundle.auth_host;
  let script = &bundle.auth_php;

  let base = if host.ends_with('/') && script.starts_with('/') {
    format!("{}{}", &host[..host.len() - 1], script)
  } else if !host.ends_with('/') && !script.starts_with('/') {
    format!("{host}/{script}")
  } else {
    format!("{host}{script}")
  };

  format!(
    "{}?channel_id={}&ts={}&rnd={}&sig={}",
    base,
    bundle.channel_key,
    bundle.auth_ts,
    bundle.auth_rnd,
    quote_plus(&bundle.auth_sig)
  )
}

/// Percent-encode with spaces as `+`, the form the auth endpoint expects.
fn quote_plus(value: &str) -> String {
  urlencoding::encode(value).replace("%20", "+")
}

fn manifest_url(server_key: &str, channel_key: &str) -> String {
  if server_key == "top1/cdn" {
    format!("https://top1.newkso.ru/top1/cdn/{channel_key}/mono.m3u8")
  } else {
    format!("https://{server_key}new.newkso.ru/{server_key}/{channel_key}/mono.m3u8")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::sync::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};

  use axum::Router;
  use axum::extract::RawQuery;
  use axum::routing::get;
  use base64::prelude::*;

  fn bundle(host: &str, script: &str) -> AuthBundle {
    AuthBundle {
      channel_key: "premium850".to_string(),
      auth_ts: "1716200000".to_string(),
      auth_rnd: "rnd42".to_string(),
      auth_sig: "si g+==".to_string(),
      auth_host: host.to_string(),
      auth_php: script.to_string(),
    }
  }

  fn test_config(base: &str, dir: &tempfile::TempDir) -> DlhdConfig {
    DlhdConfig {
      base_url: format!("{base}/"),
      proxies: Vec::new(),
      cache_file: dir.path().join("cache").to_string_lossy().into_owned(),
      request_retries: 2,
      retry_initial_delay_ms: 1,
    }
  }

  /// Bind first so page fixtures can embed the site's own base URL.
  async fn spawn_with_base(build: impl FnOnce(String) -> Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = build(base.clone());
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    base
  }

  fn b64(s: &str) -> String {
    BASE64_STANDARD.encode(s)
  }

  fn xjz_embed_page(auth_host: &str) -> String {
    let blob = b64(
      &serde_json::json!({
        "b_host": b64(auth_host),
        "b_script": b64("a.php"),
        "b_ts": b64("1716200000"),
        "b_rnd": b64("rnd42"),
        "b_sig": b64("si g+=="),
      })
      .to_string(),
    );
    format!(r#"<script>const CHANNEL_KEY = "premium850"; const XJZ = "{blob}";</script>"#)
  }

  fn counting(counter: &Arc<AtomicUsize>, body: &'static str) -> axum::routing::MethodRouter {
    let counter = counter.clone();
    get(move || {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        body
      }
    })
  }

  // offline helpers

  #[test]
  fn channel_id_patterns_cover_known_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = DlhdExtractor::new(test_config("http://unused.local", &dir));

    let cases = [
      ("https://daddylive.sx/stream/stream-850.php", "850"),
      ("https://daddylive.sx/cast/stream-12.php", "12"),
      ("https://daddylive.sx/watch.php?id=99", "99"),
      ("https://proxy.example/hls?d=https%3A%2F%2Fx%2Fstream-7.php", "7"),
      ("stream-5.php", "5"),
      ("https://top1.newkso.ru/top1/cdn/premium333/mono.m3u8", "333"),
      ("HTTPS://DADDYLIVE.SX/STREAM/STREAM-41.PHP", "41"),
    ];
    for (url, expected) in cases {
      assert_eq!(
        extractor.extract_channel_id(url).as_deref(),
        Some(expected),
        "{url}"
      );
    }

    // the premium pattern is anchored at the end of the URL
    assert!(
      extractor
        .extract_channel_id("https://x/premium1/mono.m3u8?token=1")
        .is_none()
    );
    assert!(extractor.extract_channel_id("https://example.com/other").is_none());
  }

  #[test]
  fn can_handle_is_case_sensitive_over_markers() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = DlhdExtractor::new(test_config("http://unused.local", &dir));

    assert!(extractor.can_handle("https://daddylive.sx/watch/stream-1.php"));
    assert!(extractor.can_handle("https://mirror.example/dlhd/tv"));
    assert!(extractor.can_handle("https://other.example/stream-99.php"));
    assert!(!extractor.can_handle("https://DADDYLIVE.sx/"));
    assert!(!extractor.can_handle("https://example.com/movie.mp4"));
  }

  #[test]
  fn auth_url_joins_without_double_or_missing_slash() {
    let url = build_auth_url(&bundle("https://x.test/", "/auth.php"));
    assert!(url.starts_with("https://x.test/auth.php?"), "{url}");

    let url = build_auth_url(&bundle("https://x.test", "auth.php"));
    assert!(url.starts_with("https://x.test/auth.php?"), "{url}");

    let url = build_auth_url(&bundle("https://x.test/", "auth.php"));
    assert!(url.starts_with("https://x.test/auth.php?"), "{url}");

    let url = build_auth_url(&bundle("https://x.test", "/auth.php"));
    assert!(url.starts_with("https://x.test/auth.php?"), "{url}");
  }

  #[test]
  fn auth_url_query_quotes_only_the_signature() {
    let url = build_auth_url(&bundle("https://x.test", "/auth.php"));
    assert_eq!(
      url,
      "https://x.test/auth.php?channel_id=premium850&ts=1716200000&rnd=rnd42&sig=si+g%2B%3D%3D"
    );
  }

  #[test]
  fn quote_plus_matches_form_encoding() {
    assert_eq!(quote_plus("a b+c/d=e"), "a+b%2Bc%2Fd%3De");
    assert_eq!(quote_plus("plain"), "plain");
  }

  #[test]
  fn auth_script_normalization_only_touches_a_php() {
    assert_eq!(normalize_auth_script("a.php"), "/auth.php");
    assert_eq!(normalize_auth_script(" /a.php "), "/auth.php");
    assert_eq!(normalize_auth_script("//a.php"), "/auth.php");
    assert_eq!(normalize_auth_script("/auth.php"), "/auth.php");
    assert_eq!(normalize_auth_script("b.php"), "b.php");
    assert_eq!(normalize_auth_script(" x.php "), " x.php ");
  }

  #[test]
  fn manifest_url_templates() {
    assert_eq!(
      manifest_url("top1/cdn", "123"),
      "https://top1.newkso.ru/top1/cdn/123/mono.m3u8"
    );
    assert_eq!(
      manifest_url("abc", "456"),
      "https://abcnew.newkso.ru/abc/456/mono.m3u8"
    );
  }

  #[test]
  fn absolutize_only_touches_relative_links() {
    assert_eq!(
      absolutize("https://d.sx/", "http://other.example/p"),
      "http://other.example/p"
    );
    assert_eq!(
      absolutize("https://d.sx/", "/cast/stream-1.php"),
      "https://d.sx/cast/stream-1.php"
    );
    assert_eq!(
      absolutize("https://d.sx/", "cast/stream-1.php"),
      "https://d.sx/cast/stream-1.php"
    );
  }

  #[test]
  fn player_markup_regexes_match_fixtures() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = DlhdExtractor::new(test_config("http://unused.local", &dir));

    let watch = r#"
      <button class="bt" data-url="/player/one" onclick="go()">Player 1</button>
      <button data-url="/player/two">Player  2</button>
    "#;
    let links: Vec<String> = extractor
      .player_button_re
      .captures_iter(watch)
      .map(|c| c[1].to_string())
      .collect();
    assert_eq!(links, vec!["/player/one", "/player/two"]);

    let legacy = r#"<a class="l" href="/cast/p2"><button class="b"> Player 2 </button></a>"#;
    let caps = extractor.player_anchor_re.captures(legacy).unwrap();
    assert_eq!(&caps[1], "/cast/p2");

    let player = r#"<iframe src="/premiumtv/daddylivehd.php?id=850" width="100%"></iframe>"#;
    let caps = extractor.iframe_re.captures(player).unwrap();
    assert_eq!(&caps[1], "/premiumtv/daddylivehd.php?id=850");
  }

  // end to end over a loopback site

  #[tokio::test]
  async fn test_full_resolution_via_xjz_pipeline() {
    let auth_query: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let lookup_query: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let aq = auth_query.clone();
    let lq = lookup_query.clone();
    let base = spawn_with_base(move |base| {
      Router::new()
        .route("/", get(|| async { "up" }))
        .route(
          "/stream/stream-850.php",
          get(|| async { r#"<button data-url="/player/one">Player 1</button>"# }),
        )
        .route(
          "/player/one",
          get(|| async { r#"<iframe src="/embed/850" width="100%"></iframe>"# }),
        )
        .route(
          "/embed/850",
          get(move || {
            let page = xjz_embed_page(&format!("{base}/"));
            async move { page }
          }),
        )
        .route(
          "/auth.php",
          get(move |RawQuery(q): RawQuery| {
            let aq = aq.clone();
            async move {
              *aq.lock().unwrap() = q;
              "ok"
            }
          }),
        )
        .route(
          "/server_lookup.php",
          get(move |RawQuery(q): RawQuery| {
            let lq = lq.clone();
            async move {
              *lq.lock().unwrap() = q;
              r#"{"server_key":"wind"}"#
            }
          }),
        )
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&base, &dir);
    let extractor = DlhdExtractor::new(config.clone());

    let stream = extractor
      .extract(&format!("{base}/stream/stream-850.php"), false)
      .await
      .unwrap();

    assert_eq!(
      stream.destination_url,
      "https://windnew.newkso.ru/wind/premium850/mono.m3u8"
    );
    assert_eq!(stream.mediaflow_endpoint, "hls_manifest_proxy");

    let iframe_url = format!("{base}/embed/850");
    let forced_origin = format!("https://{}", base.trim_start_matches("http://"));
    assert_eq!(stream.request_headers["Referer"], iframe_url);
    assert_eq!(stream.request_headers["Origin"], forced_origin);
    assert_eq!(stream.request_headers["User-Agent"], DEFAULT_USER_AGENT);

    assert_eq!(stream.auth_data.channel_key, "premium850");
    assert_eq!(stream.auth_data.auth_ts, "1716200000");
    assert_eq!(stream.auth_data.auth_rnd, "rnd42");
    assert_eq!(stream.auth_data.auth_sig, "si g+==");
    assert_eq!(stream.auth_data.auth_php, "/auth.php");
    assert_eq!(stream.auth_data.iframe_url, iframe_url);

    assert_eq!(
      auth_query.lock().unwrap().as_deref(),
      Some("channel_id=premium850&ts=1716200000&rnd=rnd42&sig=si+g%2B%3D%3D")
    );
    assert_eq!(
      lookup_query.lock().unwrap().as_deref(),
      Some("channel_id=premium850")
    );

    // the result must have been persisted for the next process
    let reopened = CacheStore::open(&config.cache_file);
    let cached = reopened.get(&"850".into()).await.unwrap();
    assert_eq!(cached.destination_url, stream.destination_url);
  }

  #[tokio::test]
  async fn test_landing_page_failure_falls_back_without_caching() {
    // No "/" route: base-URL discovery gets a 404 on every attempt.
    let base = spawn_with_base(move |base| {
      Router::new()
        .route(
          "/stream/stream-850.php",
          get(|| async { r#"<button data-url="/player/one">Player 1</button>"# }),
        )
        .route(
          "/player/one",
          get(|| async { r#"<iframe src="/embed/850" width="100%"></iframe>"# }),
        )
        .route(
          "/embed/850",
          get(move || {
            let page = xjz_embed_page(&format!("{base}/"));
            async move { page }
          }),
        )
        .route("/auth.php", get(|| async { "ok" }))
        .route(
          "/server_lookup.php",
          get(|| async { r#"{"server_key":"wind"}"# }),
        )
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let extractor = DlhdExtractor::new(test_config(&base, &dir));

    let stream = extractor
      .extract(&format!("{base}/stream/stream-850.php"), false)
      .await
      .unwrap();

    assert_eq!(
      stream.destination_url,
      "https://windnew.newkso.ru/wind/premium850/mono.m3u8"
    );
    // the fallback base is not cached, the next resolution retries discovery
    assert!(extractor.base_url.read().await.is_none());
  }

  #[tokio::test]
  async fn test_endpoint_fallback_stops_at_first_success() {
    let stream_hits = Arc::new(AtomicUsize::new(0));
    let cast_hits = Arc::new(AtomicUsize::new(0));
    let watch_hits = Arc::new(AtomicUsize::new(0));

    let sh = stream_hits.clone();
    let ch = cast_hits.clone();
    let wh = watch_hits.clone();
    let base = spawn_with_base(move |base| {
      let not_found = |hits: Arc<AtomicUsize>| {
        get(move || {
          let hits = hits.clone();
          async move {
            hits.fetch_add(1, Ordering::SeqCst);
            (StatusCode::NOT_FOUND, "nope")
          }
        })
      };
      Router::new()
        .route("/", get(|| async { "up" }))
        .route("/stream/stream-7.php", not_found(sh))
        .route("/cast/stream-7.php", not_found(ch))
        .route(
          "/player/stream-7.php",
          get(|| async { r#"<button data-url="/p">Player 1</button>"# }),
        )
        .route("/watch/stream-7.php", not_found(wh))
        .route("/p", get(|| async { r#"<iframe src="/e" w"# }))
        .route(
          "/e",
          get(move || {
            let page = xjz_embed_page(&format!("{base}/"));
            async move { page }
          }),
        )
        .route("/auth.php", get(|| async { "ok" }))
        .route(
          "/server_lookup.php",
          get(|| async { r#"{"server_key":"zeko"}"# }),
        )
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let extractor = DlhdExtractor::new(test_config(&base, &dir));

    let stream = extractor
      .extract(&format!("{base}/watch/stream-7.php"), false)
      .await
      .unwrap();

    assert_eq!(
      stream.destination_url,
      "https://zekonew.newkso.ru/zeko/premium850/mono.m3u8"
    );
    // one request plus the single non-transport retry per failing endpoint
    assert_eq!(stream_hits.load(Ordering::SeqCst), 2);
    assert_eq!(cast_hits.load(Ordering::SeqCst), 2);
    // the fallback never reached the last endpoint
    assert_eq!(watch_hits.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_valid_cache_entry_short_circuits_resolution() {
    let probe_hits = Arc::new(AtomicUsize::new(0));
    let stream_hits = Arc::new(AtomicUsize::new(0));

    let ph = probe_hits.clone();
    let sh = stream_hits.clone();
    let base = spawn_with_base(move |_| {
      Router::new()
        .route("/mono.m3u8", counting(&ph, "#EXTM3U"))
        .route("/stream/stream-850.php", counting(&sh, "unused"))
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&base, &dir);

    let seeded = ResolvedStream {
      destination_url: format!("{base}/mono.m3u8"),
      request_headers: HashMap::from([(
        "User-Agent".to_string(),
        DEFAULT_USER_AGENT.to_string(),
      )]),
      mediaflow_endpoint: MEDIAFLOW_ENDPOINT.to_string(),
      auth_data: AuthData {
        channel_key: "premium850".to_string(),
        auth_ts: "1".to_string(),
        auth_rnd: "2".to_string(),
        auth_sig: "3".to_string(),
        auth_host: format!("{base}/"),
        auth_php: "/auth.php".to_string(),
        iframe_url: format!("{base}/embed/850"),
      },
    };
    CacheStore::open(&config.cache_file)
      .insert("850".into(), seeded.clone())
      .await;

    let extractor = DlhdExtractor::new(config);
    let url = format!("{base}/stream/stream-850.php");

    let first = extractor.extract(&url, false).await.unwrap();
    let second = extractor.extract(&url, false).await.unwrap();

    assert_eq!(first.destination_url, seeded.destination_url);
    assert_eq!(second.destination_url, seeded.destination_url);
    // one probe per call, never a full pipeline run
    assert_eq!(probe_hits.load(Ordering::SeqCst), 2);
    assert_eq!(stream_hits.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_stale_cache_entry_is_dropped_and_re_resolved() {
    let base = spawn_with_base(move |base| {
      Router::new()
        .route("/", get(|| async { "up" }))
        .route(
          "/gone.m3u8",
          get(|| async { (StatusCode::NOT_FOUND, "moved on") }),
        )
        .route(
          "/stream/stream-850.php",
          get(|| async { r#"<button data-url="/player/one">Player 1</button>"# }),
        )
        .route(
          "/player/one",
          get(|| async { r#"<iframe src="/embed/850" w"# }),
        )
        .route(
          "/embed/850",
          get(move || {
            let page = xjz_embed_page(&format!("{base}/"));
            async move { page }
          }),
        )
        .route("/auth.php", get(|| async { "ok" }))
        .route(
          "/server_lookup.php",
          get(|| async { r#"{"server_key":"wind"}"# }),
        )
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&base, &dir);

    let stale = ResolvedStream {
      destination_url: format!("{base}/gone.m3u8"),
      request_headers: HashMap::new(),
      mediaflow_endpoint: MEDIAFLOW_ENDPOINT.to_string(),
      auth_data: AuthData {
        channel_key: "premium850".to_string(),
        auth_ts: "1".to_string(),
        auth_rnd: "2".to_string(),
        auth_sig: "3".to_string(),
        auth_host: format!("{base}/"),
        auth_php: "/auth.php".to_string(),
        iframe_url: format!("{base}/embed/850"),
      },
    };
    CacheStore::open(&config.cache_file)
      .insert("850".into(), stale)
      .await;

    let extractor = DlhdExtractor::new(config.clone());
    let stream = extractor
      .extract(&format!("{base}/stream/stream-850.php"), false)
      .await
      .unwrap();

    assert_eq!(
      stream.destination_url,
      "https://windnew.newkso.ru/wind/premium850/mono.m3u8"
    );

    // the stale entry must be gone from the persisted file as well
    let reopened = CacheStore::open(&config.cache_file);
    let cached = reopened.get(&"850".into()).await.unwrap();
    assert_eq!(cached.destination_url, stream.destination_url);
  }

  #[tokio::test]
  async fn test_force_refresh_skips_the_probe() {
    let probe_hits = Arc::new(AtomicUsize::new(0));

    let ph = probe_hits.clone();
    let base = spawn_with_base(move |base| {
      Router::new()
        .route("/", get(|| async { "up" }))
        .route("/mono.m3u8", counting(&ph, "#EXTM3U"))
        .route(
          "/stream/stream-850.php",
          get(|| async { r#"<button data-url="/player/one">Player 1</button>"# }),
        )
        .route(
          "/player/one",
          get(|| async { r#"<iframe src="/embed/850" w"# }),
        )
        .route(
          "/embed/850",
          get(move || {
            let page = xjz_embed_page(&format!("{base}/"));
            async move { page }
          }),
        )
        .route("/auth.php", get(|| async { "ok" }))
        .route(
          "/server_lookup.php",
          get(|| async { r#"{"server_key":"wind"}"# }),
        )
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&base, &dir);

    let fresh = ResolvedStream {
      destination_url: format!("{base}/mono.m3u8"),
      request_headers: HashMap::new(),
      mediaflow_endpoint: MEDIAFLOW_ENDPOINT.to_string(),
      auth_data: AuthData {
        channel_key: "premium850".to_string(),
        auth_ts: "1".to_string(),
        auth_rnd: "2".to_string(),
        auth_sig: "3".to_string(),
        auth_host: format!("{base}/"),
        auth_php: "/auth.php".to_string(),
        iframe_url: format!("{base}/embed/850"),
      },
    };
    CacheStore::open(&config.cache_file)
      .insert("850".into(), fresh)
      .await;

    let extractor = DlhdExtractor::new(config);
    let stream = extractor
      .extract(&format!("{base}/stream/stream-850.php"), true)
      .await
      .unwrap();

    assert_eq!(
      stream.destination_url,
      "https://windnew.newkso.ru/wind/premium850/mono.m3u8"
    );
    assert_eq!(probe_hits.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_legacy_anchor_and_atob_variables() {
    let base = spawn_with_base(move |base| {
      let legacy_page = format!(
        r#"var channelKey = "premium850";
           var a = atob("{}");
           var __b = atob("{}");
           var c = atob("{}");
           var d = atob("{}");
           var e = atob("{}");"#,
        b64(&base),
        b64("xx.php"),
        b64("1716200000"),
        b64("rnd42"),
        b64("sig")
      );
      let player_page = format!(r#"<iframe src="{base}/legacy-embed" w"#);
      let watch_page = format!(
        r#"<p>No buttons today.</p>
           <a class="l" href="{base}//cast/p2"><button class="b"> Player 2 </button></a>"#
      );
      Router::new()
        .route("/", get(|| async { "up" }))
        .route(
          "/stream/stream-850.php",
          get(move || {
            let page = watch_page.clone();
            async move { page }
          }),
        )
        .route(
          "/cast/p2",
          get(move || {
            let page = player_page.clone();
            async move { page }
          }),
        )
        .route(
          "/legacy-embed",
          get(move || {
            let page = legacy_page.clone();
            async move { page }
          }),
        )
        .route("/xx.php", get(|| async { "ok" }))
        .route(
          "/server_lookup.php",
          get(|| async { r#"{"server_key":"top1/cdn"}"# }),
        )
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let extractor = DlhdExtractor::new(test_config(&base, &dir));

    let stream = extractor
      .extract(&format!("{base}/stream/stream-850.php"), false)
      .await
      .unwrap();

    assert_eq!(
      stream.destination_url,
      "https://top1.newkso.ru/top1/cdn/premium850/mono.m3u8"
    );
    // scripts other than a.php keep their exact decoded value
    assert_eq!(stream.auth_data.auth_php, "xx.php");
    assert_eq!(stream.auth_data.iframe_url, format!("{base}/legacy-embed"));
  }

  #[tokio::test]
  async fn test_watch_pages_without_players_fail_with_context() {
    let base = spawn_with_base(|_| {
      Router::new()
        .route("/", get(|| async { "up" }))
        .route(
          "/stream/stream-3.php",
          get(|| async { "<html>maintenance</html>" }),
        )
        .route(
          "/cast/stream-3.php",
          get(|| async { "<html>maintenance</html>" }),
        )
        .route(
          "/player/stream-3.php",
          get(|| async { "<html>maintenance</html>" }),
        )
        .route(
          "/watch/stream-3.php",
          get(|| async { "<html>maintenance</html>" }),
        )
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let extractor = DlhdExtractor::new(test_config(&base, &dir));

    let err = extractor
      .extract(&format!("{base}/stream/stream-3.php"), false)
      .await
      .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("DLHD extraction failed"), "{message}");
    assert!(message.contains("all endpoints failed"), "{message}");
    assert!(message.contains("no player links found"), "{message}");
  }
}
