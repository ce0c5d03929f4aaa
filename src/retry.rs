//! Bounded retry with backoff
//!
//! Every network-facing step of the pipeline (listing, comment snapshots,
//! existence checks, remote submission) goes through [`with_retry`]. The
//! retry budget is always finite; once it is spent the error escalates to
//! the caller's policy.
//!
//! # Example
//!
//! ```no_run
//! use vod_archiver::retry::{IsRetryable, with_retry};
//! use vod_archiver::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, RemoteError, SourceError, UploadError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, remote slow-downs) return `true`.
/// Permanent failures (policy rejections, missing media, bad configuration) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Remote(RemoteError::Transient(_)) => true,
            Error::Remote(_) => false,
            Error::Upload(UploadError::SubmitFailed { .. }) => true,
            Error::Upload(_) => false,
            // the platform answers rate limits with API error payloads
            Error::Source(SourceError::Api { code, .. }) => *code == -412 || *code == -509,
            Error::Source(_) => false,
            Error::ExternalTool(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("timed out")
                    || msg.contains("timeout")
                    || msg.contains("temporar")
                    || msg.contains("connection")
                    || msg.contains("503")
                    || msg.contains("slow down")
            }
            Error::Download(_)
            | Error::Config { .. }
            | Error::InvalidIdentifier(_)
            | Error::MigrationConflict { .. }
            | Error::NotFound(_)
            | Error::ShuttingDown
            | Error::Serialization(_)
            | Error::ApiServerError(_)
            | Error::InsufficientSpace { .. }
            | Error::DiskSpaceCheckFailed(_)
            | Error::NotSupported(_)
            | Error::Other(_) => false,
        }
    }
}

/// Execute an async operation, retrying transient failures
///
/// The operation runs at most `config.max_attempts + 1` times. Delays start at
/// `initial_delay` and grow by `backoff_multiplier` up to `max_delay`.
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter between 0% and 100% of `delay`
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
