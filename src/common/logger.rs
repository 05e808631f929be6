use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::configs::Config;

/// Wire up the global subscriber from the `[logging]` config section.
///
/// `RUST_LOG` overrides the configured level and filters when set. A file
/// layer is added when `logging.file` names a path.
pub fn init(config: &Config) {
  let logging = config.logging.as_ref();

  let mut directives = logging
    .and_then(|l| l.level.as_deref())
    .unwrap_or("info")
    .to_string();
  if let Some(filters) = logging.and_then(|l| l.filters.as_deref()) {
    if !filters.is_empty() {
      directives = format!("{directives},{filters}");
    }
  }
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

  let stdout_layer = fmt::layer()
    .with_timer(LocalTime::rfc_3339())
    .with_target(true)
    .with_line_number(true)
    .with_file(false);

  let file_layer = logging
    .and_then(|l| l.file.as_deref())
    .and_then(|path| match AppendWriter::open(path) {
      Ok(writer) => Some(
        fmt::layer()
          .with_writer(writer)
          .with_timer(LocalTime::rfc_3339())
          .with_ansi(false),
      ),
      Err(e) => {
        eprintln!("Failed to open log file {path}: {e}");
        None
      }
    });

  tracing_subscriber::registry()
    .with(env_filter)
    .with(stdout_layer)
    .with(file_layer)
    .init();
}

/// Re-opens the log file on every write so external rotation keeps working.
#[derive(Clone)]
struct AppendWriter {
  path: Arc<PathBuf>,
}

impl AppendWriter {
  fn open(path: &str) -> io::Result<Self> {
    let path = PathBuf::from(path);
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)?;
      }
    }
    // fail now rather than on the first log line
    OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(Self {
      path: Arc::new(path),
    })
  }
}

impl Write for AppendWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(self.path.as_ref())?;
    file.write_all(buf)?;
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<'a> fmt::MakeWriter<'a> for AppendWriter {
  type Writer = Self;

  fn make_writer(&'a self) -> Self::Writer {
    self.clone()
  }
}
