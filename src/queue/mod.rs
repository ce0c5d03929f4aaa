//! Work queue service
//!
//! Items are enqueued by identifier (usually over HTTP, see [`crate::api`])
//! and drained one at a time by a [`QueueWorker`], which runs the download
//! orchestrator and then the upload orchestrator for each item.
//!
//! Two collections back the queue:
//! - a pending queue, unbounded, in enqueue order
//! - a "recent" queue holding started and terminal entries, capped at
//!   `queue.recent_capacity` with the oldest entry evicted first
//!
//! Only pending entries are persisted across restarts ([`WorkQueue::save`]
//! and [`WorkQueue::load`]).

mod worker;

pub use worker::{ItemPipeline, PhasePolicy, QueueWorker};

use crate::error::Result;
use crate::identifier::ExternalId;
use crate::types::{Event, QueueEntry, QueueStatus};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::Path;
use tokio::sync::{Mutex, Notify, broadcast};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueEntry>,
    recent: VecDeque<QueueEntry>,
}

/// In-memory work queue shared by the HTTP surface and the worker
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    recent_capacity: usize,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl WorkQueue {
    /// Create an empty queue keeping at most `recent_capacity` started entries
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            recent_capacity: recent_capacity.max(1),
            event_tx: None,
        }
    }

    /// Broadcast [`Event::QueueStatusChanged`] on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    fn emit_status(&self, id: &ExternalId, status: QueueStatus) {
        if let Some(tx) = &self.event_tx {
            tx.send(Event::QueueStatusChanged {
                id: id.clone(),
                status,
            })
            .ok();
        }
    }

    /// Append `id` to the pending queue
    ///
    /// An id that is already pending is not queued twice; the existing entry
    /// is returned instead.
    pub async fn enqueue(&self, id: ExternalId) -> QueueEntry {
        let entry = {
            let mut state = self.state.lock().await;
            if let Some(existing) = state.pending.iter().find(|e| e.id == id) {
                tracing::debug!(item = %id, "Item already pending");
                return existing.clone();
            }
            let entry = QueueEntry {
                id,
                status: QueueStatus::Pending,
                added_at: Utc::now(),
                error: None,
            };
            state.pending.push_back(entry.clone());
            entry
        };

        tracing::info!(item = %entry.id, "Item queued");
        self.emit_status(&entry.id, QueueStatus::Pending);
        self.notify.notify_one();
        entry
    }

    /// Every entry, pending and recent, sorted by enqueue time
    pub async fn list(&self) -> Vec<QueueEntry> {
        let state = self.state.lock().await;
        let mut all: Vec<QueueEntry> = state
            .pending
            .iter()
            .chain(state.recent.iter())
            .cloned()
            .collect();
        all.sort_by_key(|e| e.added_at);
        all
    }

    /// Entry for `id` and its index in [`WorkQueue::list`]
    pub async fn get(&self, id: &ExternalId) -> Option<(QueueEntry, usize)> {
        self.list()
            .await
            .into_iter()
            .enumerate()
            .find(|(_, e)| &e.id == id)
            .map(|(index, e)| (e, index))
    }

    /// Remove a still-pending entry, returning its index in the pending queue
    ///
    /// Started and terminal entries cannot be removed.
    pub async fn remove_pending(&self, id: &ExternalId) -> Option<usize> {
        let mut state = self.state.lock().await;
        let index = state.pending.iter().position(|e| &e.id == id)?;
        state.pending.remove(index);
        tracing::info!(item = %id, index, "Pending item removed");
        Some(index)
    }

    /// Number of pending entries
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Wait for the next pending entry and move it to the recent queue as
    /// [`QueueStatus::Downloading`]
    pub async fn next(&self) -> QueueEntry {
        loop {
            if let Some(entry) = self.try_start().await {
                return entry;
            }
            self.notify.notified().await;
        }
    }

    async fn try_start(&self) -> Option<QueueEntry> {
        let entry = {
            let mut state = self.state.lock().await;
            let mut entry = state.pending.pop_front()?;
            entry.status = QueueStatus::Downloading;
            if state.recent.len() >= self.recent_capacity {
                state.recent.pop_front();
            }
            state.recent.push_back(entry.clone());
            entry
        };
        self.emit_status(&entry.id, QueueStatus::Downloading);
        Some(entry)
    }

    /// Update the status of a started entry
    pub async fn set_status(&self, id: &ExternalId, status: QueueStatus, error: Option<String>) {
        {
            let mut state = self.state.lock().await;
            let Some(entry) = state.recent.iter_mut().rev().find(|e| &e.id == id) else {
                tracing::warn!(item = %id, %status, "Status change for unknown queue entry");
                return;
            };
            entry.status = status;
            entry.error = error;
        }
        self.emit_status(id, status);
    }

    /// Put a started entry back at the head of the pending queue
    ///
    /// Used when the worker is stopped mid-item, so the item is persisted and
    /// picked up again after a restart.
    pub async fn requeue_front(&self, id: &ExternalId) {
        {
            let mut state = self.state.lock().await;
            let Some(index) = state.recent.iter().rposition(|e| &e.id == id) else {
                return;
            };
            let Some(mut entry) = state.recent.remove(index) else {
                return;
            };
            entry.status = QueueStatus::Pending;
            entry.error = None;
            state.pending.push_front(entry);
        }
        self.emit_status(id, QueueStatus::Pending);
        self.notify.notify_one();
    }

    /// Write the pending entries to `path` as `id<TAB>status` lines
    ///
    /// Returns the number of entries written.
    pub async fn save(&self, path: &Path) -> Result<usize> {
        let contents: String = {
            let state = self.state.lock().await;
            state
                .pending
                .iter()
                .map(|e| format!("{}\t{}\n", e.id, e.status))
                .collect()
        };
        let count = contents.lines().count();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;

        tracing::info!(path = %path.display(), count, "Queue saved");
        Ok(count)
    }

    /// Append the entries stored at `path` to the pending queue
    ///
    /// A missing file loads nothing. Lines with an invalid identifier are
    /// logged and skipped; every loaded entry is pending again whatever
    /// status was recorded.
    pub async fn load(&self, path: &Path) -> Result<usize> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut loaded = 0;
        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let raw = line.split('\t').next().unwrap_or_default();
            match ExternalId::new(raw) {
                Ok(id) => {
                    self.enqueue(id).await;
                    loaded += 1;
                }
                Err(e) => tracing::warn!(line, error = %e, "Skipping invalid queue line"),
            }
        }

        tracing::info!(path = %path.display(), count = loaded, "Queue loaded");
        Ok(loaded)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
