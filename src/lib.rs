pub mod common;
pub mod configs;
pub mod extractors;
pub mod server;

pub use extractors::{Extractor, ExtractorRegistry};
