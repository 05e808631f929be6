use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;
use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  pub logging: Option<LoggingConfig>,
  #[serde(default)]
  pub dlhd: DlhdConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      server: ServerConfig::default(),
      logging: None,
      dlhd: DlhdConfig::default(),
    }
  }
}

impl Config {
  /// Load the first config file that exists: `$DLHD_CONFIG` if set, then
  /// `config.toml`, then the shipped `config.default.toml`.
  pub fn load() -> AnyResult<Self> {
    let candidates = [
      std::env::var("DLHD_CONFIG").ok(),
      Some("config.toml".to_string()),
      Some("config.default.toml".to_string()),
    ];
    let path = candidates
      .into_iter()
      .flatten()
      .find(|p| std::path::Path::new(p).exists())
      .ok_or("config.toml or config.default.toml not found")?;

    // the logger is not up yet at this point
    println!("Loading configuration from: {}", path);

    let raw = std::fs::read_to_string(&path)?;
    if raw.trim().is_empty() {
      return Err(format!("{path} is empty").into());
    }
    Ok(toml::from_str(&raw)?)
  }
}
