//! # vod-archiver
//!
//! Resumable pipeline that mirrors video-platform items into a remote
//! archival store.
//!
//! Each item goes through two orchestrators:
//! - **download** - enumerate the item's parts, pick the best encoding per
//!   part, fetch media and sidecars concurrently, and checkpoint every part
//!   with marker files under the storage home directory
//! - **upload** - publish every downloaded part as its own remote item,
//!   skipping files the remote already holds and reconciling metadata
//!
//! All state lives on disk as marker files, so any run can be interrupted and
//! resumed at part granularity. A [`queue::WorkQueue`] with an HTTP surface
//! ([`api`]) drives the same orchestrators one item at a time.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vod_archiver::archiver::BatchOptions;
//! use vod_archiver::remote::IaCliClient;
//! use vod_archiver::source::YtDlpSource;
//! use vod_archiver::{Archiver, Config, ExternalId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let source = Arc::new(YtDlpSource::from_config(&config)?);
//!     let remote = Arc::new(IaCliClient::from_path().ok_or("ia not found")?);
//!     let archiver = Archiver::new(config.clone(), source, remote)?;
//!
//!     let mut events = archiver.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let ids = vec![ExternalId::new("BV1xx411c7mD")?];
//!     let report = archiver
//!         .download_batch(&ids, &BatchOptions::from_config(&config))
//!         .await?;
//!     println!("{} downloaded", report.completed.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Download and upload orchestrators (decomposed into focused submodules)
pub mod archiver;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Identifier grammar and case-collision tags
pub mod identifier;
/// Work queue service
pub mod queue;
/// Remote archival store client
pub mod remote;
/// Retry logic with exponential backoff
pub mod retry;
/// Video platform client
pub mod source;
/// On-disk state store
pub mod store;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use archiver::Archiver;
pub use config::Config;
pub use error::{
    ApiError, DownloadError, Error, ErrorDetail, RemoteError, Result, SourceError, ToHttpStatus,
    UploadError,
};
pub use identifier::{ExternalId, IdGrammar, upper_part_tag};
pub use types::{
    BatchReport, DownloadOutcome, Event, QueueEntry, QueueStatus, SkipReason, UploadOutcome,
    UploadReport,
};

use tokio_util::sync::CancellationToken;

/// Stop the archiver gracefully on a termination signal.
///
/// Waits for a termination signal, then stops admitting new items (in-flight
/// items run to completion) and cancels `shutdown` so long-running loops such
/// as the queue worker and the API server can exit.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
/// use vod_archiver::{Archiver, run_with_shutdown};
///
/// # async fn example(archiver: Archiver) {
/// let shutdown = CancellationToken::new();
/// tokio::spawn(run_with_shutdown(archiver.clone(), shutdown.clone()));
/// shutdown.cancelled().await;
/// # }
/// ```
pub async fn run_with_shutdown(archiver: Archiver, shutdown: CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {}
        _ = shutdown.cancelled() => return,
    }
    archiver.stop_admission();
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
