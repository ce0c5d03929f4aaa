//! Configuration types for vod-archiver
//!
//! The configuration is read once at process start (see [`Config::load_or_create`])
//! and shared read-only as `Arc<Config>`; nothing re-reads the file implicitly.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

/// Local storage layout and identifier settings
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the local archive (default: "bilibili_archive_dir/")
    #[serde(default = "default_storage_home_dir")]
    pub storage_home_dir: PathBuf,

    /// Prefix of every part directory and remote identifier (default: "BiliBili")
    #[serde(default = "default_item_tag")]
    pub item_tag: String,

    /// Regular expression every external identifier must match
    #[serde(default = "default_id_pattern")]
    pub id_pattern: String,

    /// Accepted primary media extensions, in preference order (default: ["mp4", "flv"])
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_home_dir: default_storage_home_dir(),
            item_tag: default_item_tag(),
            id_pattern: default_id_pattern(),
            media_extensions: default_media_extensions(),
        }
    }
}

/// Download behaviour (concurrency, stream retries, snapshot sources)
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Items allowed in the download orchestrator at once (default: 3)
    #[serde(default = "default_video_concurrency")]
    pub video_concurrency: usize,

    /// Concurrent fragment fetches within one media download (default: 10)
    #[serde(default = "default_part_concurrency")]
    pub part_concurrency: usize,

    /// Retries of a single media stream fetch inside the downloader (default: 20)
    #[serde(default = "default_stream_retry")]
    pub stream_retry: u32,

    /// Number of top-level comments kept in the comment snapshot (default: 100)
    #[serde(default = "default_comments_limit")]
    pub comments_limit: usize,

    /// Extra attempts for the best-effort comment snapshot (default: 3)
    #[serde(default = "default_comment_retries")]
    pub comment_retries: u32,

    /// Item page URL; `{id}` is replaced by the external identifier
    #[serde(default = "default_item_url_template")]
    pub item_url_template: String,

    /// Item detail API URL; `{id}` is replaced by the external identifier
    #[serde(default = "default_detail_api_url")]
    pub detail_api_url: String,

    /// Comment API URL; `{aid}` and `{limit}` are substituted
    #[serde(default = "default_comments_api_url")]
    pub comments_api_url: String,

    /// Netscape cookie file handed to the downloader
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            video_concurrency: default_video_concurrency(),
            part_concurrency: default_part_concurrency(),
            stream_retry: default_stream_retry(),
            comments_limit: default_comments_limit(),
            comment_retries: default_comment_retries(),
            item_url_template: default_item_url_template(),
            detail_api_url: default_detail_api_url(),
            comments_api_url: default_comments_api_url(),
            cookies_file: None,
        }
    }
}

/// Upload behaviour and publish metadata settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Collections the operator may choose from
    #[serde(default = "default_collections")]
    pub collections: Vec<String>,

    /// Collection used when none is chosen (default: "opensource_movies")
    #[serde(default = "default_collection")]
    pub default_collection: String,

    /// Attempts for one submission before giving up (default: 5)
    #[serde(default = "default_submit_retries")]
    pub submit_retries: u32,

    /// Existence polls after a submission (default: 100)
    #[serde(default = "default_poll_attempts")]
    pub materialize_poll_attempts: u32,

    /// Delay between existence polls (default: 30 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub materialize_poll_interval: Duration,

    /// Namespace used in external-identifier URNs (default: "bilibili")
    #[serde(default = "default_urn_namespace")]
    pub urn_namespace: String,

    /// Tool name written into the scanner metadata field
    #[serde(default = "default_scanner_name")]
    pub scanner_name: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            collections: default_collections(),
            default_collection: default_collection(),
            submit_retries: default_submit_retries(),
            materialize_poll_attempts: default_poll_attempts(),
            materialize_poll_interval: default_poll_interval(),
            urn_namespace: default_urn_namespace(),
            scanner_name: default_scanner_name(),
        }
    }
}

/// External tool paths
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Path to the `ia` command-line client (auto-detected if None)
    #[serde(default)]
    pub ia_path: Option<PathBuf>,

    /// Path to ffmpeg, required by yt-dlp for merging streams (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Credentials file passed to `ia --config-file`
    #[serde(default)]
    pub ia_config_file: Option<PathBuf>,
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fixed-delay policy: `retries` extra attempts, `delay` apart, no jitter
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            max_attempts: retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Disk space admission control
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Stop admitting new items below this many free bytes (default: 10 GiB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_free_space: default_min_free_space(),
        }
    }
}

/// Where the `get` command discovers items and writes identifier lists
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListingConfig {
    /// Directory identifier lists are written under (default: "bvids")
    #[serde(default = "default_listing_output_dir")]
    pub output_dir: PathBuf,

    /// Ranking board API; `{rid}` is the board id, 0 for site-wide
    #[serde(default = "default_ranking_api_url")]
    pub ranking_api_url: String,

    /// Weekly popular series API; `{number}` is the issue
    #[serde(default = "default_popular_series_api_url")]
    pub popular_series_api_url: String,

    /// Curated must-watch list API
    #[serde(default = "default_popular_precious_api_url")]
    pub popular_precious_api_url: String,

    /// Uploader page listed through yt-dlp; `{mid}` is the uploader id
    #[serde(default = "default_uploads_url_template")]
    pub uploads_url_template: String,

    /// Favorites folder listed through yt-dlp; `{fid}` is the folder id
    #[serde(default = "default_favorites_url_template")]
    pub favorites_url_template: String,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_listing_output_dir(),
            ranking_api_url: default_ranking_api_url(),
            popular_series_api_url: default_popular_series_api_url(),
            popular_precious_api_url: default_popular_precious_api_url(),
            uploads_url_template: default_uploads_url_template(),
            favorites_url_template: default_favorites_url_template(),
        }
    }
}

/// Work queue service settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// File the pending queue is persisted to (default: "queue.txt")
    #[serde(default = "default_queue_file")]
    pub queue_file: PathBuf,

    /// Capacity of the in-flight/terminal history (default: 250)
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,

    /// Attempts of the download phase per item (default: 2)
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,

    /// Delay between download attempts (default: 5 seconds)
    #[serde(default = "default_download_backoff", with = "duration_serde")]
    pub download_backoff: Duration,

    /// Attempts of the upload phase per item (default: 3)
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,

    /// Delay between upload attempts (default: 10 seconds)
    #[serde(default = "default_upload_backoff", with = "duration_serde")]
    pub upload_backoff: Duration,

    /// Remove the local copy once every part is uploaded (default: true)
    #[serde(default = "default_true")]
    pub delete_after_upload: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_file: default_queue_file(),
            recent_capacity: default_recent_capacity(),
            download_attempts: default_download_attempts(),
            download_backoff: default_download_backoff(),
            upload_attempts: default_upload_attempts(),
            upload_backoff: default_upload_backoff(),
            delete_after_upload: true,
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8000)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Main configuration
///
/// Storage and download settings are flattened so the file keeps the flat
/// `video_concurrency`/`storage_home_dir` keys at the top level; the other
/// groups live in nested objects.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local layout and identifier grammar
    #[serde(flatten)]
    pub storage: StorageConfig,

    /// Download behaviour
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Upload behaviour
    #[serde(default)]
    pub upload: UploadConfig,

    /// External tool paths
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Retry policy for transient network and remote failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Disk space admission control
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Item discovery
    #[serde(default)]
    pub listing: ListingConfig,

    /// Work queue service
    #[serde(default)]
    pub queue: QueueConfig,

    /// REST API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Load the configuration file, writing a default one first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "Created default configuration file");
            return Ok(config);
        }
        Self::load(path)
    }

    /// Load and validate the configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("{}: {e}", path.display()),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.video_concurrency == 0 {
            return Err(config_error("must be at least 1", "video_concurrency"));
        }
        if self.download.part_concurrency == 0 {
            return Err(config_error("must be at least 1", "part_concurrency"));
        }
        if self.storage.media_extensions.is_empty() {
            return Err(config_error("must not be empty", "media_extensions"));
        }
        if self.storage.item_tag.is_empty() || self.storage.item_tag.contains(['/', '\\']) {
            return Err(config_error("must be a plain non-empty name", "item_tag"));
        }
        if let Err(e) = regex::Regex::new(&self.storage.id_pattern) {
            return Err(config_error(&e.to_string(), "id_pattern"));
        }
        if !self
            .upload
            .collections
            .contains(&self.upload.default_collection)
        {
            return Err(config_error(
                "must be one of upload.collections",
                "upload.default_collection",
            ));
        }
        Ok(())
    }

    /// Item page URL for an external identifier
    pub fn item_url(&self, id: &str) -> String {
        self.download.item_url_template.replace("{id}", id)
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: format!("{key} {message}"),
        key: Some(key.to_string()),
    }
}

fn default_storage_home_dir() -> PathBuf {
    PathBuf::from("bilibili_archive_dir/")
}

fn default_item_tag() -> String {
    "BiliBili".to_string()
}

fn default_id_pattern() -> String {
    crate::identifier::BVID_PATTERN.to_string()
}

fn default_media_extensions() -> Vec<String> {
    vec!["mp4".to_string(), "flv".to_string()]
}

fn default_video_concurrency() -> usize {
    3
}

fn default_part_concurrency() -> usize {
    10
}

fn default_stream_retry() -> u32 {
    20
}

fn default_comments_limit() -> usize {
    100
}

fn default_comment_retries() -> u32 {
    3
}

fn default_item_url_template() -> String {
    "https://www.bilibili.com/video/{id}/".to_string()
}

fn default_detail_api_url() -> String {
    "https://api.bilibili.com/x/web-interface/view/detail?bvid={id}".to_string()
}

fn default_comments_api_url() -> String {
    "https://api.bilibili.com/x/v2/reply/main?type=1&oid={aid}&mode=3&ps={limit}".to_string()
}

fn default_collections() -> Vec<String> {
    vec![
        "opensource_movies".to_string(),
        "bilibili_videos".to_string(),
        "bilibili_videos_sub_1".to_string(),
    ]
}

fn default_collection() -> String {
    "opensource_movies".to_string()
}

fn default_submit_retries() -> u32 {
    5
}

fn default_poll_attempts() -> u32 {
    100
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_urn_namespace() -> String {
    "bilibili".to_string()
}

fn default_scanner_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_min_free_space() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}

fn default_listing_output_dir() -> PathBuf {
    PathBuf::from("bvids")
}

fn default_ranking_api_url() -> String {
    "https://api.bilibili.com/x/web-interface/ranking/v2?rid={rid}&type=all".to_string()
}

fn default_popular_series_api_url() -> String {
    "https://api.bilibili.com/x/web-interface/popular/series/one?number={number}".to_string()
}

fn default_popular_precious_api_url() -> String {
    "https://api.bilibili.com/x/web-interface/popular/precious".to_string()
}

fn default_uploads_url_template() -> String {
    "https://space.bilibili.com/{mid}/video".to_string()
}

fn default_favorites_url_template() -> String {
    "https://www.bilibili.com/medialist/detail/ml{fid}".to_string()
}

fn default_queue_file() -> PathBuf {
    PathBuf::from("queue.txt")
}

fn default_recent_capacity() -> usize {
    250
}

fn default_download_attempts() -> u32 {
    2
}

fn default_download_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_upload_attempts() -> u32 {
    3
}

fn default_upload_backoff() -> Duration {
    Duration::from_secs(10)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_keys_are_read_from_top_level() {
        let config: Config = serde_json::from_str(
            r#"{
                "video_concurrency": 5,
                "part_concurrency": 4,
                "stream_retry": 7,
                "storage_home_dir": "/srv/archive",
                "cookies_file": "cookies.txt"
            }"#,
        )
        .unwrap();

        assert_eq!(config.download.video_concurrency, 5);
        assert_eq!(config.download.part_concurrency, 4);
        assert_eq!(config.download.stream_retry, 7);
        assert_eq!(config.storage.storage_home_dir, PathBuf::from("/srv/archive"));
        assert_eq!(
            config.download.cookies_file,
            Some(PathBuf::from("cookies.txt"))
        );
        // untouched groups keep their defaults
        assert_eq!(config.storage.item_tag, "BiliBili");
        assert_eq!(config.queue.recent_capacity, 250);
        assert_eq!(config.upload.materialize_poll_attempts, 100);
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["upload"]["materialize_poll_interval"], 30);
        assert_eq!(json["queue"]["download_backoff"], 5);
        assert_eq!(json["queue"]["upload_backoff"], 10);
    }

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = Config::default();
        config.download.video_concurrency = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("video_concurrency")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_default_collection_is_rejected() {
        let mut config = Config::default();
        config.upload.default_collection = "nope".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_id_pattern_is_rejected() {
        let mut config = Config::default();
        config.storage.id_pattern = "([a-z".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_or_create_writes_defaults_then_reads_them_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(
            created.download.video_concurrency,
            loaded.download.video_concurrency
        );
        assert_eq!(created.storage.storage_home_dir, loaded.storage.storage_home_dir);
    }

    #[test]
    fn fixed_retry_has_no_backoff_growth() {
        let retry = RetryConfig::fixed(2, Duration::from_secs(5));
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.initial_delay, retry.max_delay);
        assert!(!retry.jitter);
    }

    #[test]
    fn item_url_substitutes_identifier() {
        let config = Config::default();
        assert_eq!(
            config.item_url("BV1HP411D7Rj"),
            "https://www.bilibili.com/video/BV1HP411D7Rj/"
        );
    }
}
