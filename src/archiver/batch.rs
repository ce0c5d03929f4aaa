//! Batch loops: bounded-parallel downloads with free-space admission, sequential uploads

use super::{Archiver, UploadOptions};
use crate::error::{Error, Result};
use crate::identifier::ExternalId;
use crate::store::{Mark, has_mark};
use crate::types::{BatchReport, DownloadOutcome, Event, SkipReason, UploadOutcome};
use crate::utils::get_available_space;
use tokio::task::JoinSet;

/// Options of a download batch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Do not ask the remote store whether Part 1 already exists
    pub skip_remote_check: bool,
    /// Skip this many identifiers at the head of the list
    pub skip_to: usize,
    /// Free-space floor in bytes; `None` disables the check
    pub min_free_space: Option<u64>,
}

impl BatchOptions {
    /// Options taking the free-space floor from the configuration
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            min_free_space: config
                .disk_space
                .enabled
                .then_some(config.disk_space.min_free_space),
            ..Default::default()
        }
    }
}

type TaskResult = (ExternalId, Result<DownloadOutcome>);

fn record(report: &mut BatchReport, joined: std::result::Result<TaskResult, tokio::task::JoinError>) {
    match joined {
        Ok((id, Ok(DownloadOutcome::AlreadyComplete))) => {
            report.skipped.push((id, SkipReason::AlreadyDownloaded));
        }
        Ok((id, Ok(DownloadOutcome::Completed { .. }))) => report.completed.push(id),
        Ok((id, Err(e))) => report.failed.push((id, e.to_string())),
        Err(e) => tracing::error!(error = %e, "Download task panicked or was cancelled"),
    }
}

/// Wait for every in-flight download and record its result
async fn drain(tasks: &mut JoinSet<TaskResult>, report: &mut BatchReport) {
    while let Some(joined) = tasks.join_next().await {
        record(report, joined);
    }
}

impl Archiver {
    /// Download every identifier, at most `video_concurrency` at a time
    ///
    /// Items already complete locally, or whose first part exists remotely,
    /// are skipped before admission. When free space drops below the floor
    /// no new item is admitted, in-flight items finish, and
    /// [`Error::InsufficientSpace`] reports how many were drained.
    pub async fn download_batch(&self, ids: &[ExternalId], options: &BatchOptions) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();

        if options.skip_to > 0 {
            tracing::info!(skip_to = options.skip_to, "Skipping head of the identifier list");
        }

        for id in ids.iter().skip(options.skip_to) {
            if !self.is_accepting() {
                tracing::info!("Admission stopped, draining in-flight items");
                break;
            }

            while let Some(joined) = tasks.try_join_next() {
                record(&mut report, joined);
            }

            if let Some(reason) = self.pre_admission_skip(id, options).await {
                tracing::info!(item = %id, reason = %reason, "Skipping");
                self.emit_event(Event::ItemSkipped {
                    id: id.clone(),
                    reason,
                });
                report.skipped.push((id.clone(), reason));
                continue;
            }

            let Ok(permit) = self.admission.clone().acquire_owned().await else {
                tracing::warn!(in_flight = tasks.len(), "Admission closed, draining");
                drain(&mut tasks, &mut report).await;
                return Err(Error::ShuttingDown);
            };

            if let Some(required) = options.min_free_space {
                let available = match get_available_space(self.store.root()) {
                    Ok(available) => available,
                    Err(e) => {
                        drop(permit);
                        tracing::error!(error = %e, in_flight = tasks.len(), "Free-space check failed, draining");
                        drain(&mut tasks, &mut report).await;
                        return Err(Error::DiskSpaceCheckFailed(e.to_string()));
                    }
                };
                if available < required {
                    drop(permit);
                    tracing::warn!(available, required, in_flight = tasks.len(), "Free space below floor, draining");
                    self.emit_event(Event::Draining {
                        available,
                        required,
                    });
                    let drained = tasks.len();
                    drain(&mut tasks, &mut report).await;
                    return Err(Error::InsufficientSpace {
                        required,
                        available,
                        drained,
                    });
                }
            }

            let archiver = self.clone();
            let id = id.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = archiver.download_admitted(&id).await;
                (id, result)
            });
        }

        drain(&mut tasks, &mut report).await;

        tracing::info!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Download batch finished"
        );
        Ok(report)
    }

    async fn pre_admission_skip(&self, id: &ExternalId, options: &BatchOptions) -> Option<SkipReason> {
        let item = self.store.item(id);
        if has_mark(item.dir(), Mark::AllDownloaded) {
            return Some(SkipReason::AlreadyDownloaded);
        }
        if options.skip_remote_check {
            return None;
        }

        let first = item.part(1);
        match self
            .exist_cache
            .item_exists(self.remote.as_ref(), first.remote_identifier(), &self.config.retry)
            .await
        {
            Ok(true) => Some(SkipReason::ExistsRemotely),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(item = %id, error = %e, "Remote existence check failed, downloading anyway");
                None
            }
        }
    }

    /// Upload every identifier, one item at a time
    ///
    /// Failures are collected per item; the loop continues with the next one.
    pub async fn upload_batch(&self, ids: &[ExternalId], options: &UploadOptions) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for id in ids {
            if !self.is_accepting() {
                tracing::info!("Admission stopped, not starting further uploads");
                break;
            }
            match self.upload_item(id, options).await {
                Ok(UploadOutcome::Processed(_)) => report.completed.push(id.clone()),
                Ok(UploadOutcome::Skipped { reason }) => report.skipped.push((id.clone(), reason)),
                Err(e) => report.failed.push((id.clone(), e.to_string())),
            }
        }

        tracing::info!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Upload batch finished"
        );
        Ok(report)
    }
}
