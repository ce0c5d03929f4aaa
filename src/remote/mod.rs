//! Remote archival store
//!
//! The pipeline talks to the archive through the [`ArchiveClient`] trait.
//! [`IaCliClient`] implements it with the `ia` command-line tool; tests use
//! in-memory implementations.

mod ia_cli;
pub mod metadata;
mod traits;

pub use ia_cli::IaCliClient;
pub use metadata::{PublishContext, build_metadata, reconcile_patch, scanner_string};
pub use traits::{ArchiveClient, Metadata, SubmitReceipt};
