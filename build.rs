use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
  let build_time = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis())
    .unwrap_or(0);
  println!("cargo:rustc-env=BUILD_TIME={build_time}");

  println!("cargo:rerun-if-changed=.git/HEAD");
  println!(
    "cargo:rustc-env=GIT_COMMIT={}",
    git_commit().unwrap_or_else(|| "unknown".to_string())
  );
}

/// Commit hash via `git rev-parse`, or read from `.git` directly when the
/// git binary is unavailable.
fn git_commit() -> Option<String> {
  let from_binary = Command::new("git")
    .args(["rev-parse", "HEAD"])
    .output()
    .ok()
    .filter(|o| o.status.success())
    .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());
  if from_binary.is_some() {
    return from_binary;
  }

  let head = std::fs::read_to_string(".git/HEAD").ok()?;
  match head.strip_prefix("ref: ") {
    Some(ref_path) => std::fs::read_to_string(format!(".git/{}", ref_path.trim()))
      .ok()
      .map(|commit| commit.trim().to_string()),
    None => Some(head.trim().to_string()),
  }
}
