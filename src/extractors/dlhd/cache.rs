use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::prelude::*;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::common::types::ChannelId;
use crate::extractors::plugin::ResolvedStream;

/// Resolved streams keyed by channel, mirrored to a small file so restarts
/// do not have to re-run the whole handshake for channels that still work.
///
/// The file holds base64-wrapped JSON. Entries are validated with a HEAD
/// probe before reuse, so a stale file only costs one extra request.
pub struct CacheStore {
  path: PathBuf,
  entries: Mutex<HashMap<ChannelId, ResolvedStream>>,
}

impl CacheStore {
  pub fn open(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let entries = read_entries(&path);
    Self {
      path,
      entries: Mutex::new(entries),
    }
  }

  pub async fn get(&self, channel: &ChannelId) -> Option<ResolvedStream> {
    self.entries.lock().await.get(channel).cloned()
  }

  pub async fn insert(&self, channel: ChannelId, stream: ResolvedStream) {
    let mut entries = self.entries.lock().await;
    entries.insert(channel, stream);
    persist(&self.path, &entries);
  }

  /// Drop a channel from the cache. Returns whether anything was removed;
  /// the file is only rewritten when it was.
  pub async fn remove(&self, channel: &ChannelId) -> bool {
    let mut entries = self.entries.lock().await;
    let removed = entries.remove(channel).is_some();
    if removed {
      persist(&self.path, &entries);
    }
    removed
  }
}

fn read_entries(path: &Path) -> HashMap<ChannelId, ResolvedStream> {
  if !path.exists() {
    return HashMap::new();
  }
  let raw = match fs::read_to_string(path) {
    Ok(raw) => raw,
    Err(e) => {
      error!("Failed to read stream cache {}: {}", path.display(), e);
      return HashMap::new();
    }
  };
  let raw = raw.trim();
  if raw.is_empty() {
    return HashMap::new();
  }
  let bytes = match BASE64_STANDARD.decode(raw) {
    Ok(bytes) => bytes,
    Err(e) => {
      error!("Stream cache {} is not valid base64: {}", path.display(), e);
      return HashMap::new();
    }
  };
  match serde_json::from_slice::<HashMap<ChannelId, ResolvedStream>>(&bytes) {
    Ok(entries) => {
      debug!("Loaded {} cached stream(s) from {}", entries.len(), path.display());
      entries
    }
    Err(e) => {
      error!("Failed to parse stream cache {}: {}", path.display(), e);
      HashMap::new()
    }
  }
}

fn persist(path: &Path, entries: &HashMap<ChannelId, ResolvedStream>) {
  let json = match serde_json::to_string(entries) {
    Ok(json) => json,
    Err(e) => {
      error!("Failed to serialize stream cache: {}", e);
      return;
    }
  };
  if let Err(e) = fs::write(path, BASE64_STANDARD.encode(json)) {
    error!("Failed to write stream cache {}: {}", path.display(), e);
  }
}
