//! Per-item upload orchestrator

use super::Archiver;
use crate::config::{Config, RetryConfig};
use crate::error::{Error, RemoteError, Result, UploadError};
use crate::identifier::ExternalId;
use crate::remote::metadata::UPLOAD_STATE_UPLOADED;
use crate::remote::{Metadata, PublishContext, build_metadata, reconcile_patch, scanner_string};
use crate::retry::with_retry;
use crate::source::detail::ItemDetail;
use crate::store::{ItemLayout, Mark, PartLayout, UploadLock, has_mark, set_mark};
use crate::types::{Event, SkipReason, UploadOutcome, UploadReport};
use std::collections::BTreeMap;
use std::path::PathBuf;

const COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Options of one upload run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOptions {
    /// Process parts already marked uploaded, and skip the remote upload-state shortcut
    pub update_existing: bool,
    /// Remove the local item directory once every part is uploaded
    pub delete_after_upload: bool,
    /// Target collection
    pub collection: String,
    /// Upload downloaded parts of items whose all-downloaded mark is absent
    pub allow_partial: bool,
}

impl UploadOptions {
    /// Defaults for `config`: default collection, nothing forced
    pub fn from_config(config: &Config) -> Self {
        Self {
            update_existing: false,
            delete_after_upload: false,
            collection: config.upload.default_collection.clone(),
            allow_partial: false,
        }
    }
}

/// What happened to one part
enum PartResult {
    Uploaded { files: usize },
    AlreadyRemote,
    Skipped(SkipReason),
}

/// Files of one part to submit, keyed by remote name
///
/// Regular files directly in the part directory and in `extra/`, except
/// names starting with `_`. A cover image is also offered as
/// `<basename>_itemimage.<ext>`.
pub(crate) fn candidate_files(part: &PartLayout) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    for dir in [part.dir().to_path_buf(), part.extra_dir()] {
        if !dir.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('_') {
                continue;
            }
            files.insert(name, entry.path());
        }
    }

    let cover = COVER_EXTENSIONS.iter().find_map(|ext| {
        let name = format!("{}.{}", part.basename(), ext);
        files.get(&name).map(|path| (*ext, path.clone()))
    });
    if let Some((ext, path)) = cover {
        files.insert(format!("{}_itemimage.{}", part.basename(), ext), path);
    }
    Ok(files)
}

impl Archiver {
    /// Upload every downloaded part of one item
    ///
    /// Holds the item's upload lock for the whole run. Lock contention,
    /// missing downloads and earlier spam rejections are reported as skips.
    pub async fn upload_item(&self, id: &ExternalId, options: &UploadOptions) -> Result<UploadOutcome> {
        let Some(_lock) = UploadLock::try_acquire(&self.store.lock_dir(id))? else {
            tracing::warn!(item = %id, "Upload lock held by another process, skipping");
            return Ok(self.skip_item(id, SkipReason::Locked));
        };

        let item = self.store.item(id);
        item.migrate_legacy()?;

        if !item.dir().is_dir() {
            tracing::warn!(item = %id, "No local directory, nothing to upload");
            return Ok(self.skip_item(id, SkipReason::Missing));
        }
        if has_mark(item.dir(), Mark::Spam) {
            tracing::warn!(item = %id, "Item was rejected as spam before, skipping");
            return Ok(self.skip_item(id, SkipReason::Spam));
        }
        if !has_mark(item.dir(), Mark::AllDownloaded) {
            if !options.allow_partial {
                tracing::info!(item = %id, "Not fully downloaded yet, skipping upload");
                return Ok(self.skip_item(id, SkipReason::NotDownloaded));
            }
            tracing::info!(item = %id, "Uploading downloaded parts of an incomplete item");
        }

        match self.upload_parts(&item, options).await {
            Ok(report) => Ok(UploadOutcome::Processed(report)),
            Err(e) => {
                if e.is_policy_rejection() {
                    set_mark(item.dir(), Mark::Spam, &e.to_string())?;
                    tracing::error!(item = %id, error = %e, "Rejected by remote policy, spam mark written");
                    self.emit_event(Event::ItemRejected {
                        id: id.clone(),
                        message: e.to_string(),
                    });
                } else {
                    tracing::error!(item = %id, error = %e, "Upload failed");
                    self.emit_event(Event::UploadFailed {
                        id: id.clone(),
                        error: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    fn skip_item(&self, id: &ExternalId, reason: SkipReason) -> UploadOutcome {
        self.emit_event(Event::ItemSkipped {
            id: id.clone(),
            reason,
        });
        UploadOutcome::Skipped { reason }
    }

    async fn upload_parts(&self, item: &ItemLayout, options: &UploadOptions) -> Result<UploadReport> {
        let id = item.id();
        let mut report = UploadReport::default();
        let mut processed_any = false;

        let mut indices = Vec::new();
        for (name, _) in item.part_dirs()? {
            match item.part_index_of(&name) {
                Some(index) => indices.push(index),
                None => tracing::warn!(item = %id, dir = %name, "Skipping unexpected directory"),
            }
        }
        indices.sort_unstable();

        for index in indices {
            let part = item.part(index);

            let result = if part.has(Mark::Uploaded) && !options.update_existing {
                tracing::info!(item = %id, part = index, "Part already uploaded");
                PartResult::Skipped(SkipReason::AlreadyUploaded)
            } else if !part.has(Mark::Downloaded) {
                tracing::info!(item = %id, part = index, "Part not downloaded, skipping");
                PartResult::Skipped(SkipReason::NotDownloaded)
            } else {
                processed_any = true;
                self.upload_part(id, &part, options).await?
            };

            match result {
                PartResult::Uploaded { files } => {
                    report.uploaded.push(index);
                    self.emit_event(Event::PartUploaded {
                        id: id.clone(),
                        part: index,
                        identifier: part.remote_identifier().to_string(),
                        files,
                    });
                }
                PartResult::AlreadyRemote => {
                    report.skipped.push((index, SkipReason::AlreadyUploaded));
                    self.emit_event(Event::UploadSkipped {
                        id: id.clone(),
                        part: index,
                        reason: SkipReason::AlreadyUploaded,
                    });
                }
                PartResult::Skipped(reason) => {
                    report.skipped.push((index, reason));
                    self.emit_event(Event::UploadSkipped {
                        id: id.clone(),
                        part: index,
                        reason,
                    });
                }
            }
        }

        let wants_delete = options.delete_after_upload && processed_any;
        if wants_delete && !has_mark(item.dir(), Mark::AllDownloaded) {
            tracing::info!(item = %id, "Item not fully downloaded, keeping local copy");
        } else if wants_delete && all_parts_uploaded(item)? {
            std::fs::remove_dir_all(item.dir())?;
            report.removed_local = true;
            tracing::info!(item = %id, "Local copy removed after upload");
            self.emit_event(Event::LocalRemoved { id: id.clone() });
        }
        Ok(report)
    }

    async fn upload_part(
        &self,
        id: &ExternalId,
        part: &PartLayout,
        options: &UploadOptions,
    ) -> Result<PartResult> {
        let identifier = part.remote_identifier();
        let retry = &self.config.retry;

        if !options.update_existing
            && self
                .exist_cache
                .item_exists(self.remote.as_ref(), identifier, retry)
                .await?
        {
            let remote = with_retry(retry, || self.remote.get_metadata(identifier)).await?;
            if remote.get("upload-state").and_then(|v| v.as_str()) == Some(UPLOAD_STATE_UPLOADED) {
                tracing::info!(item = %id, identifier, "Remote item already uploaded, marking");
                part.set(Mark::Uploaded, "")?;
                return Ok(PartResult::AlreadyRemote);
            }
        }

        let raw = match tokio::fs::read_to_string(part.info_json()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(item = %id, part = part.index(), "Detail snapshot missing, skipping part");
                return Ok(PartResult::Skipped(SkipReason::MissingDetail));
            }
            Err(e) => return Err(e.into()),
        };
        let detail = ItemDetail::parse(id.as_str(), &raw)?;

        let mut files = candidate_files(part)?;
        if !files.keys().any(|name| part.is_media_name(name)) {
            return Err(UploadError::MediaMissing {
                identifier: identifier.to_string(),
                path: part.dir().to_path_buf(),
            }
            .into());
        }

        let remote_files = with_retry(retry, || self.remote.list_remote_files(identifier)).await?;
        for name in &remote_files {
            if files.remove(name).is_some() {
                tracing::debug!(identifier, file = %name, "Already stored remotely");
            }
        }

        let item_url = self.config.item_url(id.as_str());
        let scanner = scanner_string(&self.config.upload.scanner_name);
        let ctx = PublishContext {
            remote_identifier: identifier,
            part_index: part.index(),
            collection: &options.collection,
            item_url: &item_url,
            item_tag: &self.config.storage.item_tag,
            urn_namespace: &self.config.upload.urn_namespace,
            scanner: &scanner,
        };
        let metadata = build_metadata(&detail, &ctx)?;

        let submitted = files.len();
        if files.is_empty() {
            tracing::info!(identifier, "Every file already stored remotely");
        } else {
            self.submit(identifier, &files, &metadata).await?;
        }

        self.wait_materialized(identifier).await?;

        let remote = with_retry(retry, || self.remote.get_metadata(identifier)).await?;
        let patch = reconcile_patch(&remote, &metadata, &detail);
        if !patch.is_empty() {
            tracing::info!(identifier, fields = ?patch.keys().collect::<Vec<_>>(), "Reconciling remote metadata");
            with_retry(retry, || self.remote.patch_metadata(identifier, &patch)).await?;
        }

        part.set(Mark::Uploaded, "")?;
        self.exist_cache.record(identifier)?;
        tracing::info!(item = %id, part = part.index(), identifier, files = submitted, "Part uploaded");
        Ok(PartResult::Uploaded { files: submitted })
    }

    async fn submit(
        &self,
        identifier: &str,
        files: &BTreeMap<String, PathBuf>,
        metadata: &Metadata,
    ) -> Result<()> {
        let policy = RetryConfig::fixed(
            self.config.upload.submit_retries,
            self.config.retry.initial_delay,
        );
        tracing::info!(identifier, files = files.len(), "Submitting");

        match with_retry(&policy, || self.remote.submit(identifier, files, metadata)).await {
            Ok(receipt) => {
                tracing::debug!(identifier, uploaded = receipt.uploaded.len(), "Submission accepted");
                Ok(())
            }
            Err(Error::Remote(RemoteError::PolicyRejected(message))) => {
                Err(UploadError::PolicyRejected {
                    identifier: identifier.to_string(),
                    message,
                }
                .into())
            }
            Err(e) => Err(UploadError::SubmitFailed {
                identifier: identifier.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    /// Poll until the remote item is visible, with a fixed budget and delay
    async fn wait_materialized(&self, identifier: &str) -> Result<()> {
        let attempts = self.config.upload.materialize_poll_attempts;
        let interval = self.config.upload.materialize_poll_interval;

        for attempt in 1..=attempts {
            if with_retry(&self.config.retry, || self.remote.item_exists(identifier)).await? {
                return Ok(());
            }
            tracing::info!(identifier, attempt, attempts, "Waiting for remote item to appear");
            tokio::time::sleep(interval).await;
        }
        Err(UploadError::NotMaterialized {
            identifier: identifier.to_string(),
            attempts,
        }
        .into())
    }
}

/// Every part of a fully downloaded item carries the uploaded mark
fn all_parts_uploaded(item: &ItemLayout) -> Result<bool> {
    if !has_mark(item.dir(), Mark::AllDownloaded) {
        return Ok(false);
    }
    for (name, path) in item.part_dirs()? {
        if item.part_index_of(&name).is_some() && !has_mark(&path, Mark::Uploaded) {
            return Ok(false);
        }
    }
    Ok(true)
}
