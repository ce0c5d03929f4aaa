//! Core types for vod-archiver

use crate::identifier::ExternalId;
use crate::source::CodecTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an item or part was passed over without error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Item-level all-downloaded mark present
    AlreadyDownloaded,
    /// Remote item already exists
    ExistsRemotely,
    /// Part already carries the uploaded mark, or the remote says it is uploaded
    AlreadyUploaded,
    /// Another process holds the upload lock
    Locked,
    /// Nothing downloaded yet
    NotDownloaded,
    /// No local directory for the item
    Missing,
    /// Item previously rejected as spam
    Spam,
    /// Item-detail snapshot absent for the part
    MissingDetail,
    /// Item carries a download error mark
    Errored,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::AlreadyDownloaded => "already downloaded",
            SkipReason::ExistsRemotely => "already exists remotely",
            SkipReason::AlreadyUploaded => "already uploaded",
            SkipReason::Locked => "upload lock held by another process",
            SkipReason::NotDownloaded => "not downloaded",
            SkipReason::Missing => "no local directory",
            SkipReason::Spam => "rejected as spam",
            SkipReason::MissingDetail => "item-detail snapshot missing",
            SkipReason::Errored => "download error mark present",
        };
        f.write_str(s)
    }
}

/// Event emitted while items move through the pipeline
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Item passed over before any work
    ItemSkipped {
        /// Item
        id: ExternalId,
        /// Reason
        reason: SkipReason,
    },

    /// Download state machine entered with an admission token held
    DownloadStarted {
        /// Item
        id: ExternalId,
    },

    /// Part already downloaded, left untouched
    PartSkipped {
        /// Item
        id: ExternalId,
        /// Part index
        part: u32,
    },

    /// Part fetched and marked downloaded
    PartDownloaded {
        /// Item
        id: ExternalId,
        /// Part index
        part: u32,
        /// Tier of the media actually kept, `None` for the fallback stream
        tier: Option<CodecTier>,
    },

    /// Preferred codec produced no media; retrying with another tier
    CodecFallback {
        /// Item
        id: ExternalId,
        /// Part index
        part: u32,
        /// Tier that failed
        from: CodecTier,
        /// Tier retried
        to: CodecTier,
    },

    /// Every part downloaded and the item marked complete
    ItemDownloaded {
        /// Item
        id: ExternalId,
        /// Parts fetched in this run
        fetched: u32,
    },

    /// Download aborted for the item
    DownloadFailed {
        /// Item
        id: ExternalId,
        /// Error message
        error: String,
    },

    /// Part passed over during upload
    UploadSkipped {
        /// Item
        id: ExternalId,
        /// Part index
        part: u32,
        /// Reason
        reason: SkipReason,
    },

    /// Part published and marked uploaded
    PartUploaded {
        /// Item
        id: ExternalId,
        /// Part index
        part: u32,
        /// Remote identifier
        identifier: String,
        /// Number of files submitted (0 when everything was already remote)
        files: usize,
    },

    /// Item rejected by remote policy, spam mark written
    ItemRejected {
        /// Item
        id: ExternalId,
        /// Rejection text
        message: String,
    },

    /// Upload aborted for the item
    UploadFailed {
        /// Item
        id: ExternalId,
        /// Error message
        error: String,
    },

    /// Local copy removed after upload
    LocalRemoved {
        /// Item
        id: ExternalId,
    },

    /// Free space below the floor; no new items are admitted
    Draining {
        /// Bytes available
        available: u64,
        /// Configured floor
        required: u64,
    },

    /// Work-queue entry changed status
    QueueStatusChanged {
        /// Item
        id: ExternalId,
        /// New status
        status: QueueStatus,
    },
}

/// Result of running the download state machine on one item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// All-downloaded mark was already present; nothing was done
    AlreadyComplete,
    /// Item is complete now
    Completed {
        /// Parts fetched in this run
        fetched: u32,
        /// Parts already downloaded by an earlier run
        skipped: u32,
    },
}

/// Per-item upload summary
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    /// Parts marked uploaded in this run
    pub uploaded: Vec<u32>,
    /// Parts passed over, with reason
    pub skipped: Vec<(u32, SkipReason)>,
    /// Local directory removed afterwards
    pub removed_local: bool,
}

/// Result of running the upload orchestrator on one item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Item passed over as a whole
    Skipped {
        /// Reason
        reason: SkipReason,
    },
    /// Parts were processed
    Processed(UploadReport),
}

/// Summary of a batch run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Items that completed
    pub completed: Vec<ExternalId>,
    /// Items passed over, with reason
    pub skipped: Vec<(ExternalId, SkipReason)>,
    /// Items that failed, with the error message
    pub failed: Vec<(ExternalId, String)>,
}

impl BatchReport {
    /// Whether any item failed
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Status of a work-queue entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for the scheduler
    Pending,
    /// Download phase running
    Downloading,
    /// Upload phase running
    Uploading,
    /// Both phases succeeded
    Finished,
    /// A phase exhausted its attempts
    Failed,
}

impl QueueStatus {
    /// Lowercase name used on disk and over HTTP
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Downloading => "downloading",
            QueueStatus::Uploading => "uploading",
            QueueStatus::Finished => "finished",
            QueueStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "downloading" => Ok(QueueStatus::Downloading),
            "uploading" => Ok(QueueStatus::Uploading),
            "finished" => Ok(QueueStatus::Finished),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("unknown queue status '{other}'")),
        }
    }
}

/// One work-queue entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Item
    pub id: ExternalId,
    /// Current status
    pub status: QueueStatus,
    /// Enqueue time
    pub added_at: DateTime<Utc>,
    /// Last error, for failed entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_status_round_trips_through_text() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Downloading,
            QueueStatus::Uploading,
            QueueStatus::Finished,
            QueueStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
        assert!("done".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn events_are_tagged() {
        let event = Event::PartSkipped {
            id: ExternalId::new("AB12CD34").unwrap(),
            part: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "part_skipped");
        assert_eq!(json["id"], "AB12CD34");
        assert_eq!(json["part"], 2);
    }

    #[test]
    fn skip_reasons_read_naturally() {
        assert_eq!(SkipReason::NotDownloaded.to_string(), "not downloaded");
        assert_eq!(
            serde_json::to_value(SkipReason::ExistsRemotely).unwrap(),
            "exists_remotely"
        );
    }
}
