use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Base log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Extra per-target directives appended to the env filter,
    /// e.g. "hyper=warn,reqwest=info".
    pub filters: Option<String>,
    /// Path of an append-only log file. No file logging when unset.
    #[serde(default)]
    pub file: Option<String>,
}
