//! Maintenance scans over local state

use super::{Archiver, BatchOptions, UploadOptions};
use crate::error::Result;
use crate::identifier::ExternalId;
use crate::store::{Mark, UploadLock, has_mark, read_mark};
use crate::types::{BatchReport, SkipReason};
use serde::Serialize;

/// Result of removing stale upload locks
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LockCleanup {
    /// Lock files removed
    pub files: usize,
    /// Bytes freed
    pub bytes: u64,
    /// Locks left alone because a live process holds them
    pub held: usize,
}

/// One `_download_error.mark`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    /// Item
    pub id: ExternalId,
    /// Part index, `None` for an item-level error
    pub part: Option<u32>,
    /// First line of the recorded error
    pub message: String,
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

impl Archiver {
    /// Remove lock files not held by a live process, then prune empty directories
    pub fn clean_locks(&self) -> Result<LockCleanup> {
        let mut cleanup = LockCleanup::default();
        let locks_dir = self.store.locks_dir();
        if !locks_dir.is_dir() {
            return Ok(cleanup);
        }

        for entry in std::fs::read_dir(&locks_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();

            let mut stale = Vec::new();
            for file in std::fs::read_dir(&dir)? {
                let file = file?;
                if file.file_type()?.is_file() {
                    stale.push((file.path(), file.metadata()?.len()));
                }
            }

            match UploadLock::try_acquire(&dir)? {
                None => {
                    tracing::info!(dir = %dir.display(), "Lock is held, leaving it");
                    cleanup.held += 1;
                    continue;
                }
                Some(lock) => drop(lock),
            }

            for file in std::fs::read_dir(&dir)? {
                let file = file?;
                if file.file_type()?.is_file() {
                    std::fs::remove_file(file.path())?;
                }
            }
            cleanup.files += stale.len();
            cleanup.bytes += stale.iter().map(|(_, len)| len).sum::<u64>();

            if std::fs::read_dir(&dir)?.next().is_none() {
                std::fs::remove_dir(&dir)?;
            }
        }

        tracing::info!(files = cleanup.files, bytes = cleanup.bytes, held = cleanup.held, "Lock files cleaned");
        Ok(cleanup)
    }

    /// Every recorded download error, item-level first, then per part
    pub fn list_errors(&self) -> Result<Vec<ErrorEntry>> {
        let mut entries = Vec::new();
        for id in self.store.local_items()? {
            let item = self.store.item(&id);
            if let Some(text) = read_mark(item.dir(), Mark::DownloadError) {
                entries.push(ErrorEntry {
                    id: id.clone(),
                    part: None,
                    message: first_line(&text),
                });
            }
            for (name, path) in item.part_dirs()? {
                if let Some(index) = item.part_index_of(&name)
                    && let Some(text) = read_mark(&path, Mark::DownloadError)
                {
                    entries.push(ErrorEntry {
                        id: id.clone(),
                        part: Some(index),
                        message: first_line(&text),
                    });
                }
            }
        }
        Ok(entries)
    }

    fn has_errors(&self, id: &ExternalId) -> Result<bool> {
        let item = self.store.item(id);
        if has_mark(item.dir(), Mark::DownloadError) {
            return Ok(true);
        }
        Ok(item
            .part_dirs()?
            .iter()
            .any(|(_, path)| has_mark(path, Mark::DownloadError)))
    }

    /// Resume every local item that is not fully downloaded
    ///
    /// Items carrying an error mark are reported and left for the operator.
    pub async fn try_download(&self, options: &BatchOptions) -> Result<BatchReport> {
        let mut pending = Vec::new();
        let mut errored = Vec::new();

        for id in self.store.local_items()? {
            let item = self.store.item(&id);
            item.migrate_legacy()?;
            if has_mark(item.dir(), Mark::AllDownloaded) {
                continue;
            }
            if self.has_errors(&id)? {
                errored.push(id);
            } else {
                tracing::info!(item = %id, "Found unfinished download");
                pending.push(id);
            }
        }

        if errored.is_empty() {
            tracing::info!("No download errors found");
        } else {
            tracing::warn!(
                count = errored.len(),
                items = %errored.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", "),
                "Items with download errors are not retried"
            );
        }

        let options = BatchOptions {
            skip_remote_check: true,
            skip_to: 0,
            ..options.clone()
        };
        let mut report = self.download_batch(&pending, &options).await?;
        report
            .skipped
            .extend(errored.into_iter().map(|id| (id, SkipReason::Errored)));
        Ok(report)
    }

    /// Upload every fully downloaded local item that still has work left
    pub async fn try_upload(&self, options: &UploadOptions) -> Result<BatchReport> {
        let mut ready = Vec::new();
        for id in self.store.local_items()? {
            let item = self.store.item(&id);
            if !has_mark(item.dir(), Mark::AllDownloaded) || has_mark(item.dir(), Mark::Spam) {
                continue;
            }
            let pending = item
                .part_dirs()?
                .iter()
                .any(|(name, path)| {
                    item.part_index_of(name).is_some() && !has_mark(path, Mark::Uploaded)
                });
            if pending || options.update_existing {
                ready.push(id);
            }
        }
        tracing::info!(count = ready.len(), "Items ready for upload");
        self.upload_batch(&ready, options).await
    }
}
