//! Background worker draining the [`WorkQueue`]

use super::WorkQueue;
use crate::archiver::{Archiver, UploadOptions};
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::identifier::ExternalId;
use crate::types::{QueueStatus, UploadOutcome};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The two phases the worker runs for every item
#[async_trait]
pub trait ItemPipeline: Send + Sync {
    /// Bring the item to the all-downloaded state
    async fn download(&self, id: &ExternalId) -> Result<()>;

    /// Publish the downloaded item
    async fn upload(&self, id: &ExternalId) -> Result<()>;
}

#[async_trait]
impl ItemPipeline for Archiver {
    async fn download(&self, id: &ExternalId) -> Result<()> {
        self.download_item(id).await.map(|_| ())
    }

    async fn upload(&self, id: &ExternalId) -> Result<()> {
        let options = UploadOptions {
            delete_after_upload: self.config.queue.delete_after_upload,
            ..UploadOptions::from_config(&self.config)
        };
        match self.upload_item(id, &options).await? {
            UploadOutcome::Processed(_) => Ok(()),
            UploadOutcome::Skipped { reason } => {
                Err(Error::Other(format!("upload of {id} skipped: {reason}")))
            }
        }
    }
}

/// Attempts and fixed backoff for each phase
#[derive(Clone, Debug)]
pub struct PhasePolicy {
    /// Download attempts before the entry fails
    pub download_attempts: u32,
    /// Delay between download attempts
    pub download_backoff: Duration,
    /// Upload attempts before the entry fails
    pub upload_attempts: u32,
    /// Delay between upload attempts
    pub upload_backoff: Duration,
}

impl PhasePolicy {
    /// Policy from the `queue` config section
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            download_attempts: config.download_attempts,
            download_backoff: config.download_backoff,
            upload_attempts: config.upload_attempts,
            upload_backoff: config.upload_backoff,
        }
    }
}

/// Single consumer of the work queue
///
/// Items are processed strictly one at a time: download, then upload. A phase
/// that exhausts its attempts marks the entry failed and the worker moves on.
pub struct QueueWorker {
    queue: Arc<WorkQueue>,
    pipeline: Arc<dyn ItemPipeline>,
    policy: PhasePolicy,
}

impl QueueWorker {
    /// Create a worker over `queue`
    pub fn new(queue: Arc<WorkQueue>, pipeline: Arc<dyn ItemPipeline>, policy: PhasePolicy) -> Self {
        Self {
            queue,
            pipeline,
            policy,
        }
    }

    /// Run until `shutdown` is cancelled
    ///
    /// An item interrupted by shutdown is put back at the head of the pending
    /// queue.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Queue worker started");
        loop {
            let entry = tokio::select! {
                _ = shutdown.cancelled() => break,
                entry = self.queue.next() => entry,
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!(item = %entry.id, "Shutdown while processing, requeueing item");
                    self.queue.requeue_front(&entry.id).await;
                    break;
                }
                status = self.process(&entry.id) => {
                    info!(item = %entry.id, %status, "Queue item done");
                }
            }
        }
        info!("Queue worker stopped");
    }

    /// Run both phases for an entry already taken off the pending queue
    pub async fn process(&self, id: &ExternalId) -> QueueStatus {
        info!(item = %id, "Start downloading");
        let downloaded = run_phase(
            "download",
            id,
            self.policy.download_attempts,
            self.policy.download_backoff,
            || self.pipeline.download(id),
        )
        .await;
        if let Err(e) = downloaded {
            warn!(item = %id, error = %e, "Download failed, giving up");
            self.queue
                .set_status(id, QueueStatus::Failed, Some(e.to_string()))
                .await;
            return QueueStatus::Failed;
        }

        info!(item = %id, "Start uploading");
        self.queue.set_status(id, QueueStatus::Uploading, None).await;
        let uploaded = run_phase(
            "upload",
            id,
            self.policy.upload_attempts,
            self.policy.upload_backoff,
            || self.pipeline.upload(id),
        )
        .await;
        if let Err(e) = uploaded {
            warn!(item = %id, error = %e, "Upload failed, giving up");
            self.queue
                .set_status(id, QueueStatus::Failed, Some(e.to_string()))
                .await;
            return QueueStatus::Failed;
        }

        self.queue.set_status(id, QueueStatus::Finished, None).await;
        QueueStatus::Finished
    }
}

async fn run_phase<F, Fut>(
    phase: &'static str,
    id: &ExternalId,
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                warn!(
                    item = %id,
                    phase,
                    attempt,
                    attempts,
                    error = %e,
                    "Phase failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
