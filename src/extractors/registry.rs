use crate::common::errors::ExtractorError;
use crate::configs::Config;
use crate::extractors::dlhd::DlhdExtractor;
use crate::extractors::plugin::{BoxedExtractor, Extractor, ResolvedStream};

/// Holds every registered extractor and dispatches URLs to the first one
/// that recognizes them.
pub struct ExtractorRegistry {
  pub extractors: Vec<BoxedExtractor>,
}

impl ExtractorRegistry {
  pub fn new(config: &Config) -> Self {
    let mut extractors: Vec<BoxedExtractor> = Vec::new();

    tracing::info!("Loaded extractor: DLHD");
    extractors.push(Box::new(DlhdExtractor::new(config.dlhd.clone())));

    Self { extractors }
  }

  /// Find the extractor responsible for a URL, if any.
  pub fn find(&self, url: &str) -> Option<&dyn Extractor> {
    self
      .extractors
      .iter()
      .find(|e| e.can_handle(url))
      .map(|e| e.as_ref())
  }

  /// Resolve a URL with the first matching extractor.
  pub async fn resolve(
    &self,
    url: &str,
    force_refresh: bool,
  ) -> Result<ResolvedStream, ExtractorError> {
    match self.find(url) {
      Some(extractor) => {
        tracing::trace!("Resolving '{}' with extractor: {}", url, extractor.name());
        extractor.extract(url, force_refresh).await
      }
      None => {
        tracing::debug!("No extractor could handle URL: {}", url);
        Err(ExtractorError::UnsupportedUrl(url.to_string()))
      }
    }
  }

  /// Get names of all registered extractors.
  pub fn extractor_names(&self) -> Vec<String> {
    self.extractors.iter().map(|e| e.name().to_string()).collect()
  }

  /// Shut down every extractor.
  pub async fn close_all(&self) {
    for extractor in &self.extractors {
      extractor.close().await;
    }
  }
}
