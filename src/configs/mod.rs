pub mod base;
pub mod dlhd;
pub mod logging;
pub mod server;

pub use base::*;
pub use dlhd::*;
pub use logging::*;
pub use server::*;
