//! Error types for vod-archiver
//!
//! This module provides the error taxonomy of the archive pipeline:
//! - Domain-specific error types (Download, Upload, Source, Remote)
//! - HTTP status code mapping for the work queue API
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vod-archiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vod-archiver
///
/// Each variant carries enough context to announce the failing identifier
/// and the reason without further lookups.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "video_concurrency")
        key: Option<String>,
    },

    /// Identifier does not match the configured identifier grammar
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Download orchestrator failure
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Upload orchestrator failure
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// Media source collaborator failure
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Archive collaborator failure
    #[error("remote archive error: {0}")]
    Remote(#[from] RemoteError),

    /// Both the legacy and the current item directory exist
    #[error(
        "legacy directory {} and current directory {} both exist; resolve manually",
        legacy.display(),
        current.display()
    )]
    MigrationConflict {
        /// Directory named under the previous naming scheme
        legacy: PathBuf,
        /// Directory named under the current naming scheme
        current: PathBuf,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Item or queue entry not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Insufficient disk space; the batch stopped admitting new items
    #[error(
        "insufficient disk space: need {required} bytes, have {available} bytes ({drained} in-flight items drained)"
    )]
    InsufficientSpace {
        /// Configured free-space floor in bytes
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
        /// Number of items that were allowed to finish after admission stopped
        drained: usize,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// External tool execution failed (yt-dlp, ia, ffmpeg)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, not implemented, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Download orchestrator errors. All of them abort the current item.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The source enumerated a part whose URL does not carry its expected index
    #[error("{id}: part {expected} has unexpected url {url}")]
    PartNumberMismatch {
        /// Item identifier
        id: String,
        /// Index the part was expected to carry
        expected: u32,
        /// URL reported by the source
        url: String,
    },

    /// Neither a tiered codec nor a fallback stream is advertised
    #[error("{id}: no viable codec for part {part}")]
    NoViableCodec {
        /// Item identifier
        id: String,
        /// Part index
        part: u32,
    },

    /// Primary media file still absent after every fallback
    #[error("{id}: primary media for part {part} missing at {}", path.display())]
    MediaMissing {
        /// Item identifier
        id: String,
        /// Part index
        part: u32,
        /// Part directory that was searched
        path: PathBuf,
    },

    /// The source returned an item detail that cannot be used
    #[error("{id}: invalid item detail: {reason}")]
    InvalidDetail {
        /// Item identifier
        id: String,
        /// What was wrong with the payload
        reason: String,
    },
}

/// Upload orchestrator errors
#[derive(Debug, Error)]
pub enum UploadError {
    /// The remote store classified the submission as unwanted content
    #[error("{identifier}: rejected by remote policy: {message}")]
    PolicyRejected {
        /// Remote identifier
        identifier: String,
        /// Rejection text returned by the remote store
        message: String,
    },

    /// A downloaded part has no primary media file in its candidate set
    #[error("{identifier}: downloaded mark present but no primary media in {}", path.display())]
    MediaMissing {
        /// Remote identifier
        identifier: String,
        /// Part directory
        path: PathBuf,
    },

    /// The remote item did not appear within the poll budget
    #[error("{identifier}: remote item not visible after {attempts} polls")]
    NotMaterialized {
        /// Remote identifier
        identifier: String,
        /// Number of existence polls performed
        attempts: u32,
    },

    /// Submission failed after the bounded retry budget
    #[error("{identifier}: submission failed: {reason}")]
    SubmitFailed {
        /// Remote identifier
        identifier: String,
        /// Last failure reason
        reason: String,
    },
}

/// Errors reported by a [`MediaSource`](crate::source::MediaSource)
#[derive(Debug, Error)]
pub enum SourceError {
    /// The advertised stream could not actually be retrieved
    #[error("stream unavailable for {url}: {reason}")]
    StreamUnavailable {
        /// Part URL
        url: String,
        /// Source-provided reason
        reason: String,
    },

    /// Platform API answered with an error payload
    #[error("platform API error {code} for {id}: {message}")]
    Api {
        /// Item identifier
        id: String,
        /// Platform error code
        code: i64,
        /// Platform error message
        message: String,
    },

    /// Output of the source tool could not be interpreted
    #[error("unexpected source output: {0}")]
    Malformed(String),
}

/// Errors reported by an [`ArchiveClient`](crate::remote::ArchiveClient)
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Remote store flagged the content as unwanted
    #[error("policy rejection: {0}")]
    PolicyRejected(String),

    /// Remote store rejected the request permanently
    #[error("rejected: {0}")]
    Rejected(String),

    /// Temporary remote failure (timeouts, 5xx, slow down)
    #[error("transient failure: {0}")]
    Transient(String),
}

impl Error {
    /// True when the error is a remote policy rejection, wherever it surfaced
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Error::Remote(RemoteError::PolicyRejected(_))
                | Error::Upload(UploadError::PolicyRejected { .. })
        )
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "BV1xx411c7mD not found",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::InvalidIdentifier(_) => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 409 Conflict - local state needs operator intervention
            Error::MigrationConflict { .. } => 409,

            // 422 Unprocessable Entity - the item cannot be archived as-is
            Error::Download(_) => 422,
            Error::Upload(UploadError::PolicyRejected { .. }) => 422,
            Error::Upload(UploadError::MediaMissing { .. }) => 422,
            Error::InsufficientSpace { .. } => 422,

            // 500 Internal Server Error - Server-side issues
            Error::Io(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::DiskSpaceCheckFailed(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - External service errors
            Error::Network(_) => 502,
            Error::Source(_) => 502,
            Error::Remote(_) => 502,
            Error::Upload(UploadError::SubmitFailed { .. }) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
            Error::ExternalTool(_) => 503,
            Error::Upload(UploadError::NotMaterialized { .. }) => 503,

            // 501 Not Implemented - Feature not supported
            Error::NotSupported(_) => 501,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidIdentifier(_) => "invalid_identifier",
            Error::Download(e) => match e {
                DownloadError::PartNumberMismatch { .. } => "part_number_mismatch",
                DownloadError::NoViableCodec { .. } => "no_viable_codec",
                DownloadError::MediaMissing { .. } => "media_missing",
                DownloadError::InvalidDetail { .. } => "invalid_detail",
            },
            Error::Upload(e) => match e {
                UploadError::PolicyRejected { .. } => "policy_rejected",
                UploadError::MediaMissing { .. } => "media_missing",
                UploadError::NotMaterialized { .. } => "not_materialized",
                UploadError::SubmitFailed { .. } => "submit_failed",
            },
            Error::Source(_) => "source_error",
            Error::Remote(_) => "remote_error",
            Error::MigrationConflict { .. } => "migration_conflict",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::DiskSpaceCheckFailed(_) => "disk_space_check_failed",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotSupported(_) => "not_supported",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Download(DownloadError::PartNumberMismatch { id, expected, url }) => {
                Some(serde_json::json!({
                    "id": id,
                    "expected_part": expected,
                    "url": url,
                }))
            }
            Error::Upload(UploadError::PolicyRejected { identifier, .. }) => {
                Some(serde_json::json!({
                    "identifier": identifier,
                }))
            }
            Error::MigrationConflict { legacy, current } => Some(serde_json::json!({
                "legacy": legacy,
                "current": current,
            })),
            Error::InsufficientSpace {
                required,
                available,
                drained,
            } => Some(serde_json::json!({
                "required_bytes": required,
                "available_bytes": available,
                "drained": drained,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
