//! Remote-existence cache backed by marker files

use crate::config::RetryConfig;
use crate::error::Result;
use crate::remote::ArchiveClient;
use crate::retry::with_retry;
use std::path::{Path, PathBuf};

/// Local memo of remote identifiers known to exist
///
/// Only positive answers are cached: a remote item never disappears for the
/// purposes of this pipeline, while a missing one may appear at any time.
#[derive(Debug, Clone)]
pub struct ExistCache {
    dir: PathBuf,
}

impl ExistCache {
    /// Cache stored in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn mark_path(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{identifier}.mark"))
    }

    /// Whether `identifier` was already seen to exist
    pub fn is_cached(&self, identifier: &str) -> bool {
        self.mark_path(identifier).is_file()
    }

    /// Remember that `identifier` exists
    pub fn record(&self, identifier: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.mark_path(identifier), b"")?;
        Ok(())
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `identifier` exists remotely, consulting the cache first
    pub async fn item_exists(
        &self,
        remote: &dyn ArchiveClient,
        identifier: &str,
        retry: &RetryConfig,
    ) -> Result<bool> {
        if self.is_cached(identifier) {
            tracing::debug!(identifier, "Remote item known to exist (cached)");
            return Ok(true);
        }

        let exists = with_retry(retry, || remote.item_exists(identifier)).await?;
        if exists {
            self.record(identifier)?;
        }
        Ok(exists)
    }
}
