/// Browser User-Agent presented on every upstream request. The watch pages
/// fingerprint clients, so this stays pinned to a current desktop Chrome.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";
