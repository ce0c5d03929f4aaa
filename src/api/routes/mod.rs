//! Route handlers for the REST API
//!
//! - [`archive`] - work queue operations
//! - [`system`] - service status

mod archive;
mod system;

pub use archive::*;
pub use system::*;
