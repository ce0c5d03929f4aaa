//! Traits and types for the remote archival store

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Item metadata as sent to and read from the remote store
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Result of a successful submission
#[must_use]
#[derive(Debug, Clone, Default)]
pub struct SubmitReceipt {
    /// Remote identifier the files were submitted to
    pub identifier: String,
    /// Remote names of the files that were transferred
    pub uploaded: Vec<String>,
}

/// Client of the remote archival store
///
/// The store is eventually consistent: an item may not be visible through
/// [`item_exists`](ArchiveClient::item_exists) for a while after
/// [`submit`](ArchiveClient::submit) returned.
///
/// Implementations report a policy rejection (content flagged as unwanted) as
/// [`RemoteError::PolicyRejected`](crate::error::RemoteError::PolicyRejected)
/// and temporary failures as
/// [`RemoteError::Transient`](crate::error::RemoteError::Transient).
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Whether the remote item exists
    async fn item_exists(&self, identifier: &str) -> crate::Result<bool>;

    /// Names of the files already stored in the remote item
    async fn list_remote_files(&self, identifier: &str) -> crate::Result<Vec<String>>;

    /// Upload `files` (remote name to local path) with `metadata`
    async fn submit(
        &self,
        identifier: &str,
        files: &BTreeMap<String, PathBuf>,
        metadata: &Metadata,
    ) -> crate::Result<SubmitReceipt>;

    /// Current metadata of the remote item
    async fn get_metadata(&self, identifier: &str) -> crate::Result<Metadata>;

    /// Overwrite the given metadata fields, leaving the others untouched
    async fn patch_metadata(&self, identifier: &str, patch: &Metadata) -> crate::Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
