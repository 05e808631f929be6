/// Boxed catch-all error for startup paths.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias over [`AnyError`].
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Numeric channel identifier as it appears in watch URLs (`stream-850.php`),
/// kept as a string because it is only ever compared and interpolated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::ops::Deref for ChannelId {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
