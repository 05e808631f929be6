pub mod dlhd;
pub mod plugin;
pub mod registry;

pub use plugin::{AuthData, Extractor, ResolvedStream};
pub use registry::ExtractorRegistry;
