use base64::prelude::*;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::common::errors::ExtractorError;

/// The complete set of auth handshake parameters scraped from an iframe page.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthBundle {
    pub channel_key: String,
    pub auth_ts: String,
    pub auth_rnd: String,
    pub auth_sig: String,
    pub auth_host: String,
    pub auth_php: String,
}

/// What a single strategy managed to recover. Fields it could not find stay
/// `None` and are reported as missing after strategy selection.
#[derive(Debug, Default)]
struct DecodedParams {
    auth_host: Option<String>,
    auth_php: Option<String>,
    auth_ts: Option<String>,
    auth_rnd: Option<String>,
    auth_sig: Option<String>,
}

/// One way of hiding the auth parameters inside the player page.
///
/// Strategies are tried in this order and the first that yields anything
/// wins outright: a partial XJZ bundle is *not* topped up from legacy
/// variables that may also be present on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderStrategy {
    /// `const XJZ = "<base64 JSON>"` with base64-encoded values.
    Xjz,
    /// `const BUNDLE = "<base64 JSON>"`, same value encoding as XJZ.
    Bundle,
    /// Individual `var a = atob("...")` style variables.
    LegacyInline,
}

impl DecoderStrategy {
    pub const ALL: [DecoderStrategy; 3] = [
        DecoderStrategy::Xjz,
        DecoderStrategy::Bundle,
        DecoderStrategy::LegacyInline,
    ];
}

/// Decodes auth parameters out of iframe player pages.
pub struct ParamDecoder {
    xjz_re: Regex,
    bundle_res: [Regex; 3],
    channel_key_res: [Regex; 6],
    // (variable name, field patterns) for the legacy atob format
    legacy_res: Vec<(&'static str, [Regex; 3])>,
}

impl ParamDecoder {
    pub fn new() -> Self {
        let legacy_res = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|name| (*name, legacy_patterns(name)))
            .collect();

        Self {
            xjz_re: Regex::new(r#"(?:const|var|let)\s+XJZ\s*=\s*["']([^"']+)["']"#).unwrap(),
            bundle_res: [
                Regex::new(r#"const\s+BUNDLE\s*=\s*["']([^"']+)["']"#).unwrap(),
                Regex::new(r#"var\s+BUNDLE\s*=\s*["']([^"']+)["']"#).unwrap(),
                Regex::new(r#"let\s+BUNDLE\s*=\s*["']([^"']+)["']"#).unwrap(),
            ],
            channel_key_res: [
                Regex::new(r#"const\s+CHANNEL_KEY\s*=\s*["']([^"']+)["']"#).unwrap(),
                Regex::new(r#"var\s+CHANNEL_KEY\s*=\s*["']([^"']+)["']"#).unwrap(),
                Regex::new(r#"let\s+CHANNEL_KEY\s*=\s*["']([^"']+)["']"#).unwrap(),
                Regex::new(r#"channelKey\s*=\s*["']([^"']+)["']"#).unwrap(),
                Regex::new(r#"var\s+channelKey\s*=\s*["']([^"']+)["']"#).unwrap(),
                Regex::new(r#"(?:let|const)\s+channelKey\s*=\s*["']([^"']+)["']"#).unwrap(),
            ],
            legacy_res,
        }
    }

    /// Run the strategies in priority order and validate the result.
    ///
    /// Every missing (or empty) field is collected so the error names the
    /// full set, not just the first one encountered.
    pub fn decode(&self, page: &str) -> Result<AuthBundle, ExtractorError> {
        let channel_key = self.channel_key(page);

        let mut params = DecodedParams::default();
        for strategy in DecoderStrategy::ALL {
            if let Some(found) = self.try_strategy(strategy, page) {
                info!("Decoded auth parameters with strategy: {:?}", strategy);
                params = found;
                break;
            }
        }

        let mut missing = Vec::new();
        let bundle = AuthBundle {
            channel_key: require(channel_key, "channel_key", &mut missing),
            auth_ts: require(params.auth_ts, "auth_ts", &mut missing),
            auth_rnd: require(params.auth_rnd, "auth_rnd", &mut missing),
            auth_sig: require(params.auth_sig, "auth_sig", &mut missing),
            auth_host: require(params.auth_host, "auth_host", &mut missing),
            auth_php: require(params.auth_php, "auth_php", &mut missing),
        };

        if !missing.is_empty() {
            return Err(ExtractorError::MissingParameters { fields: missing });
        }
        Ok(bundle)
    }

    fn try_strategy(&self, strategy: DecoderStrategy, page: &str) -> Option<DecodedParams> {
        match strategy {
            DecoderStrategy::Xjz => self
                .xjz_re
                .captures(page)
                .and_then(|c| decode_bundle_blob(&c[1])),
            DecoderStrategy::Bundle => self
                .bundle_res
                .iter()
                .find_map(|re| re.captures(page).map(|c| c[1].to_string()))
                .and_then(|blob| decode_bundle_blob(&blob)),
            // terminal fallback: always yields, with whatever it found
            DecoderStrategy::LegacyInline => Some(DecodedParams {
                auth_ts: self.atob_var(page, "c"),
                auth_rnd: self.atob_var(page, "d"),
                auth_sig: self.atob_var(page, "e"),
                auth_host: self.atob_var(page, "a"),
                auth_php: self.atob_var(page, "b"),
            }),
        }
    }

    fn channel_key(&self, page: &str) -> Option<String> {
        self.channel_key_res
            .iter()
            .find_map(|re| re.captures(page).map(|c| c[1].to_string()))
    }

    /// Look up a legacy `var <name> = atob("...")` variable. A payload that
    /// fails to decode just moves on to the next pattern.
    fn atob_var(&self, page: &str, name: &str) -> Option<String> {
        let (_, patterns) = self.legacy_res.iter().find(|(n, _)| *n == name)?;
        for re in patterns {
            if let Some(caps) = re.captures(page) {
                if let Some(decoded) = decode_utf8(&caps[1]) {
                    return Some(decoded);
                }
            }
        }
        None
    }
}

impl Default for ParamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn legacy_patterns(name: &str) -> [Regex; 3] {
    [
        Regex::new(&format!(r#"var (?:__)?{name}\s*=\s*atob\("([^"]+)"\)"#)).unwrap(),
        Regex::new(&format!(r#"var (?:__)?{name}\s*=\s*atob\('([^']+)'\)"#)).unwrap(),
        Regex::new(&format!(
            r#"(?:var|let|const)\s+(?:__)?{name}\s*=\s*atob\("([^"]+)"\)"#
        ))
        .unwrap(),
    ]
}

/// Decode an XJZ/BUNDLE blob: base64 -> JSON object -> per-value base64.
/// Values that fail the inner decode are kept verbatim. An empty or
/// malformed blob yields nothing so the next strategy gets its turn.
fn decode_bundle_blob(blob: &str) -> Option<DecodedParams> {
    let bytes = BASE64_STANDARD.decode(blob).ok()?;
    let json = String::from_utf8(bytes).ok()?;
    let object = match serde_json::from_str::<Value>(&json).ok()? {
        Value::Object(map) => map,
        _ => return None,
    };
    if object.is_empty() {
        return None;
    }

    let field = |key: &str| -> Option<String> {
        let value = object.get(key)?;
        let Some(text) = value.as_str() else {
            debug!("Bundle key {} is not a string, skipping", key);
            return None;
        };
        Some(decode_utf8(text).unwrap_or_else(|| text.to_string()))
    };

    Some(DecodedParams {
        auth_host: field("b_host"),
        auth_php: field("b_script"),
        auth_ts: field("b_ts"),
        auth_rnd: field("b_rnd"),
        auth_sig: field("b_sig"),
    })
}

fn decode_utf8(encoded: &str) -> Option<String> {
    let bytes = BASE64_STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

fn require(
    value: Option<String>,
    name: &'static str,
    missing: &mut Vec<&'static str>,
) -> String {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => {
            missing.push(name);
            String::new()
        }
    }
}
