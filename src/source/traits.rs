//! Traits and types for the media source

use super::select::MediaSelection;
use crate::identifier::ExternalId;
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One advertised video stream variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStream {
    /// Codec string as advertised, e.g. `hev1.1.6.L150.90`
    pub codec: String,
    /// Quality rank; higher is better
    pub quality: u32,
    /// Source-specific handle used to request exactly this stream
    pub format_id: String,
}

/// A subtitle track offered for a part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    /// Language code, e.g. `zh-CN`
    pub language_code: String,
    /// Human-readable language name, e.g. `中文（中国）`
    pub language_name: String,
}

/// Per-part media information, resolved fresh for every download attempt
#[derive(Debug, Clone, Default)]
pub struct PartInfo {
    /// Part title
    pub title: String,
    /// Tiered (adaptive) video streams
    pub streams: Vec<VideoStream>,
    /// Whether a non-tiered stream exists that the source can fetch on its own
    pub has_fallback_stream: bool,
    /// Uploader name
    pub owner: Option<String>,
    /// Co-author names
    pub staff: Vec<String>,
    /// Tags
    pub tags: Vec<String>,
    /// Publish time, seconds since the Unix epoch
    pub pubdate: Option<i64>,
    /// Subtitle tracks
    pub subtitles: Vec<SubtitleTrack>,
    /// Raw source response, kept verbatim
    pub raw_json: serde_json::Value,
}

/// Chooses the language label subtitle files are named with
pub trait SubtitleLanguage: Send + Sync + Debug {
    /// Label used in `<basename>.<label>.<ext>`
    fn label(&self, track: &SubtitleTrack) -> String;
}

/// Names subtitle files by language code (`zh-CN`), not by display name
#[derive(Debug, Clone, Copy, Default)]
pub struct LanguageCode;

impl SubtitleLanguage for LanguageCode {
    fn label(&self, track: &SubtitleTrack) -> String {
        track.language_code.clone()
    }
}

/// Everything needed to fetch the media of one part
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Part URL
    pub part_url: String,
    /// Chosen encoding
    pub selection: MediaSelection,
    /// Directory receiving the primary media file
    pub dest_dir: PathBuf,
    /// Directory receiving sidecars (cover, subtitles, rendered captions)
    pub extra_dir: PathBuf,
    /// Basename of every output file, without extension
    pub output_basename: String,
    /// Subtitle tracks offered for the part
    pub subtitle_tracks: Vec<SubtitleTrack>,
    /// Subtitle naming strategy
    pub subtitle_language: Arc<dyn SubtitleLanguage>,
    /// Concurrent fragment fetches
    pub concurrency: usize,
    /// Retries of a stalled stream
    pub stream_retries: u32,
}

/// Client of the video platform
///
/// Implementations must leave no background work behind when a returned
/// future is dropped, so a failed sibling can cancel an in-progress fetch.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// URLs of the parts of an item, in platform order
    async fn list_parts(&self, item_url: &str) -> crate::Result<Vec<String>>;

    /// Stream and descriptive information of one part
    async fn resolve_part(&self, part_url: &str) -> crate::Result<PartInfo>;

    /// Fetch primary media plus cover, subtitles and rendered caption track
    ///
    /// A stream that is advertised but cannot be retrieved is reported as
    /// [`SourceError::StreamUnavailable`](crate::error::SourceError::StreamUnavailable).
    async fn fetch_media(&self, request: &FetchRequest) -> crate::Result<()>;

    /// Fetch the raw caption track into `dest_dir`
    async fn fetch_raw_captions(
        &self,
        part_url: &str,
        dest_dir: &Path,
        output_basename: &str,
    ) -> crate::Result<()>;

    /// Item-detail snapshot, verbatim
    async fn fetch_item_detail(&self, id: &ExternalId) -> crate::Result<String>;

    /// Top `limit` comments of an item, verbatim
    async fn fetch_comments(&self, id: &ExternalId, limit: usize) -> crate::Result<String>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
