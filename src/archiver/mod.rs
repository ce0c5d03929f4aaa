//! Archive pipeline orchestration split into focused submodules.
//!
//! The [`Archiver`] struct and its methods are organized by phase:
//! - [`download`] - per-item download state machine
//! - [`upload`] - per-item remote-idempotent publish
//! - [`batch`] - bounded-parallel batch loops with free-space admission
//! - [`maintenance`] - local state scans that re-drive both orchestrators

mod batch;
mod download;
mod maintenance;
mod upload;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests;

pub use batch::BatchOptions;
pub use maintenance::{ErrorEntry, LockCleanup};
pub use upload::UploadOptions;

use crate::config::Config;
use crate::error::Result;
use crate::remote::ArchiveClient;
use crate::source::{LanguageCode, MediaSource, SubtitleLanguage};
use crate::store::{ExistCache, StateStore};
use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Semaphore, broadcast};

/// Archive pipeline (cloneable - all shared state is Arc-wrapped)
#[derive(Clone)]
pub struct Archiver {
    /// Configuration, fixed for the lifetime of the archiver
    pub(crate) config: Arc<Config>,
    /// Video platform client
    pub(crate) source: Arc<dyn MediaSource>,
    /// Remote archive client
    pub(crate) remote: Arc<dyn ArchiveClient>,
    /// On-disk state
    pub(crate) store: StateStore,
    /// Remote existence memo
    pub(crate) exist_cache: ExistCache,
    /// Admission tokens for the download state machine (capacity = video_concurrency)
    pub(crate) admission: Arc<Semaphore>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Subtitle naming strategy handed to the source
    pub(crate) subtitle_language: Arc<dyn SubtitleLanguage>,
    /// Cleared on shutdown; batch loops stop admitting new items
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl Archiver {
    /// Create an archiver over the given collaborators
    ///
    /// Validates the configuration and creates the storage home directory.
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn MediaSource>,
        remote: Arc<dyn ArchiveClient>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage.storage_home_dir)?;

        let store = StateStore::from_config(&config);
        let exist_cache = ExistCache::new(store.exist_cache_dir());
        let (event_tx, _rx) = broadcast::channel(1000);

        tracing::info!(
            storage = %store.root().display(),
            source = source.name(),
            remote = remote.name(),
            video_concurrency = config.download.video_concurrency,
            "Archiver initialized"
        );

        Ok(Self {
            admission: Arc::new(Semaphore::new(config.download.video_concurrency)),
            config,
            source,
            remote,
            store,
            exist_cache,
            event_tx,
            subtitle_language: Arc::new(LanguageCode),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Replace the subtitle naming strategy
    pub fn with_subtitle_language(mut self, strategy: Arc<dyn SubtitleLanguage>) -> Self {
        self.subtitle_language = strategy;
        self
    }

    /// Subscribe to pipeline events
    ///
    /// Each subscriber receives all events independently. A subscriber that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Sender half of the event channel, for components publishing alongside the archiver
    pub fn event_sender(&self) -> broadcast::Sender<Event> {
        self.event_tx.clone()
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // No receivers is fine
        self.event_tx.send(event).ok();
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// On-disk state store
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Stop admitting new items; in-flight items run to completion
    pub fn stop_admission(&self) {
        if self.accepting_new.swap(false, Ordering::SeqCst) {
            tracing::info!("No longer admitting new items");
        }
    }

    /// Whether batch loops may admit new items
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }
}
