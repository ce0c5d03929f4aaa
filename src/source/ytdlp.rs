//! Media source backed by yt-dlp and the platform's public JSON API

use super::detail::DetailResponse;
use super::listing::{ItemLister, Listing, ListingSource};
use super::select::MediaSelection;
use super::traits::{FetchRequest, MediaSource, PartInfo, SubtitleTrack, VideoStream};
use crate::config::{Config, ListingConfig};
use crate::error::{Error, SourceError};
use crate::identifier::ExternalId;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// yt-dlp messages meaning the requested stream cannot be retrieved
const UNAVAILABLE_MARKERS: &[&str] = &[
    "Requested format is not available",
    "HTTP Error 404",
    "HTTP Error 403",
];

/// Subset of yt-dlp's `--dump-single-json` output
#[derive(Debug, Deserialize)]
struct YtInfo {
    #[serde(rename = "_type", default)]
    kind: Option<String>,
    #[serde(default)]
    entries: Vec<YtEntry>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    formats: Vec<YtFormat>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    subtitles: BTreeMap<String, Vec<YtSubtitle>>,
}

#[derive(Debug, Deserialize)]
struct YtEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YtFormat {
    format_id: String,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    quality: Option<f64>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct YtSubtitle {
    #[serde(default)]
    name: Option<String>,
}

impl YtFormat {
    fn has_video(&self) -> bool {
        self.vcodec.as_deref().is_some_and(|c| c != "none")
    }

    fn has_audio(&self) -> bool {
        self.acodec.as_deref().is_some_and(|c| c != "none")
    }
}

impl YtInfo {
    fn into_part_info(self, raw_json: serde_json::Value) -> PartInfo {
        let streams = self
            .formats
            .iter()
            .filter(|f| f.has_video() && !f.has_audio())
            .map(|f| VideoStream {
                codec: f.vcodec.clone().unwrap_or_default(),
                quality: f
                    .quality
                    .map(|q| q.max(0.0) as u32)
                    .or(f.height)
                    .unwrap_or(0),
                format_id: f.format_id.clone(),
            })
            .collect();
        let has_fallback_stream = self.formats.iter().any(|f| f.has_video() && f.has_audio());

        let subtitles = self
            .subtitles
            .into_iter()
            .map(|(code, variants)| SubtitleTrack {
                language_name: variants
                    .into_iter()
                    .find_map(|v| v.name)
                    .unwrap_or_else(|| code.clone()),
                language_code: code,
            })
            .collect();

        PartInfo {
            title: self.title,
            streams,
            has_fallback_stream,
            owner: self.uploader,
            staff: Vec::new(),
            tags: self.tags,
            pubdate: self.timestamp,
            subtitles,
            raw_json,
        }
    }
}

/// Media source that drives the `yt-dlp` binary
///
/// Part enumeration, stream resolution and all file transfers go through
/// yt-dlp subprocesses, which are killed when their future is dropped.
/// Item-detail and comment snapshots come straight from the platform API.
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    binary_path: PathBuf,
    cookies_file: Option<PathBuf>,
    ffmpeg_path: Option<PathBuf>,
    http: reqwest::Client,
    detail_api_url: String,
    comments_api_url: String,
    listing: ListingConfig,
}

/// Envelope of the platform's list endpoints
#[derive(Debug, Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    list: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    bvid: String,
}

impl YtDlpSource {
    /// Create a source with an explicit binary path and API URL templates
    pub fn new(
        binary_path: PathBuf,
        detail_api_url: impl Into<String>,
        comments_api_url: impl Into<String>,
    ) -> Self {
        Self {
            binary_path,
            cookies_file: None,
            ffmpeg_path: None,
            http: reqwest::Client::new(),
            detail_api_url: detail_api_url.into(),
            comments_api_url: comments_api_url.into(),
            listing: ListingConfig::default(),
        }
    }

    /// Use these listing endpoints and page templates
    pub fn with_listing(mut self, listing: ListingConfig) -> Self {
        self.listing = listing;
        self
    }

    /// Build from configuration, locating yt-dlp in PATH unless configured
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let binary_path = match &config.tools.ytdlp_path {
            Some(path) => path.clone(),
            None => which::which("yt-dlp")
                .map_err(|_| Error::NotSupported("yt-dlp not found in PATH".to_string()))?,
        };
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            binary_path,
            cookies_file: config.download.cookies_file.clone(),
            ffmpeg_path: config.tools.ffmpeg_path.clone(),
            http,
            detail_api_url: config.download.detail_api_url.clone(),
            comments_api_url: config.download.comments_api_url.clone(),
            listing: config.listing.clone(),
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("--no-warnings").arg("--no-progress");
        if let Some(cookies) = &self.cookies_file
            && cookies.is_file()
        {
            cmd.arg("--cookies").arg(cookies);
        }
        if let Some(ffmpeg) = &self.ffmpeg_path {
            cmd.arg("--ffmpeg-location").arg(ffmpeg);
        }
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, url: &str) -> crate::Result<Vec<u8>> {
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e)))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if UNAVAILABLE_MARKERS.iter().any(|m| stderr.contains(m)) {
            return Err(SourceError::StreamUnavailable {
                url: url.to_string(),
                reason: stderr,
            }
            .into());
        }
        Err(Error::ExternalTool(format!("yt-dlp failed for {url}: {stderr}")))
    }

    async fn dump_json(&self, url: &str, flat: bool) -> crate::Result<(YtInfo, serde_json::Value)> {
        let mut cmd = self.command();
        cmd.arg("--dump-single-json");
        if flat {
            cmd.arg("--flat-playlist");
        } else {
            cmd.arg("--no-playlist");
        }
        cmd.arg(url);

        let stdout = self.run(cmd, url).await?;
        let raw: serde_json::Value = serde_json::from_slice(&stdout)?;
        let info: YtInfo = serde_json::from_value(raw.clone())
            .map_err(|e| SourceError::Malformed(format!("{url}: {e}")))?;
        Ok((info, raw))
    }

    async fn get_api_json(&self, id: &str, url: &str) -> crate::Result<String> {
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        #[derive(Deserialize)]
        struct Envelope {
            code: i64,
            #[serde(default)]
            message: String,
        }
        let envelope: Envelope = serde_json::from_str(&body)?;
        if envelope.code != 0 {
            return Err(SourceError::Api {
                id: id.to_string(),
                code: envelope.code,
                message: envelope.message,
            }
            .into());
        }
        Ok(body)
    }

    /// yt-dlp format expression for a selection
    fn format_expr(selection: &MediaSelection) -> String {
        match selection {
            MediaSelection::Stream { format_id, .. } => format!("{format_id}+bestaudio"),
            MediaSelection::Fallback => "best".to_string(),
        }
    }

    fn rename_subtitles(request: &FetchRequest) -> crate::Result<()> {
        for track in &request.subtitle_tracks {
            let label = request.subtitle_language.label(track);
            if label == track.language_code {
                continue;
            }
            let prefix = format!("{}.{}.", request.output_basename, track.language_code);
            for entry in std::fs::read_dir(&request.extra_dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(ext) = name.strip_prefix(&prefix) {
                    let target = request
                        .extra_dir
                        .join(format!("{}.{}.{}", request.output_basename, label, ext));
                    std::fs::rename(entry.path(), target)?;
                }
            }
        }
        Ok(())
    }
}

/// `-o` template for one output type
fn template(dir: &Path, basename: &str) -> String {
    dir.join(format!("{basename}.%(ext)s"))
        .to_string_lossy()
        .into_owned()
}

#[async_trait]
impl MediaSource for YtDlpSource {
    async fn list_parts(&self, item_url: &str) -> crate::Result<Vec<String>> {
        let (info, _) = self.dump_json(item_url, true).await?;
        if info.kind.as_deref() != Some("playlist") || info.entries.is_empty() {
            return Ok(vec![format!("{item_url}?p=1")]);
        }
        info.entries
            .into_iter()
            .map(|e| {
                e.url.or(e.webpage_url).ok_or_else(|| {
                    SourceError::Malformed(format!("{item_url}: playlist entry without url")).into()
                })
            })
            .collect()
    }

    async fn resolve_part(&self, part_url: &str) -> crate::Result<PartInfo> {
        let (info, raw) = self.dump_json(part_url, false).await?;
        Ok(info.into_part_info(raw))
    }

    async fn fetch_media(&self, request: &FetchRequest) -> crate::Result<()> {
        std::fs::create_dir_all(&request.dest_dir)?;
        std::fs::create_dir_all(&request.extra_dir)?;

        let mut cmd = self.command();
        cmd.arg("--no-playlist")
            .arg("-f")
            .arg(Self::format_expr(&request.selection))
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--concurrent-fragments")
            .arg(request.concurrency.to_string())
            .arg("--retries")
            .arg(request.stream_retries.to_string())
            .arg("--fragment-retries")
            .arg(request.stream_retries.to_string())
            .arg("--write-thumbnail")
            .arg("--write-subs")
            .arg("--sub-langs")
            .arg("all")
            .arg("-o")
            .arg(template(&request.dest_dir, &request.output_basename))
            .arg("-o")
            .arg(format!(
                "thumbnail:{}",
                template(&request.extra_dir, &request.output_basename)
            ))
            .arg("-o")
            .arg(format!(
                "subtitle:{}",
                template(&request.extra_dir, &request.output_basename)
            ))
            .arg(&request.part_url);

        tracing::debug!(url = %request.part_url, selection = ?request.selection, "Fetching media");
        self.run(cmd, &request.part_url).await?;
        Self::rename_subtitles(request)
    }

    async fn fetch_raw_captions(
        &self,
        part_url: &str,
        dest_dir: &Path,
        output_basename: &str,
    ) -> crate::Result<()> {
        std::fs::create_dir_all(dest_dir)?;
        let mut cmd = self.command();
        cmd.arg("--no-playlist")
            .arg("--skip-download")
            .arg("--write-subs")
            .arg("--sub-langs")
            .arg("danmaku")
            .arg("-o")
            .arg(format!("subtitle:{}", template(dest_dir, output_basename)))
            .arg(part_url);
        self.run(cmd, part_url).await?;
        Ok(())
    }

    async fn fetch_item_detail(&self, id: &ExternalId) -> crate::Result<String> {
        let url = self.detail_api_url.replace("{id}", id.as_str());
        self.get_api_json(id.as_str(), &url).await
    }

    async fn fetch_comments(&self, id: &ExternalId, limit: usize) -> crate::Result<String> {
        let detail = self.fetch_item_detail(id).await?;
        let aid = serde_json::from_str::<DetailResponse>(&detail)?
            .data
            .map(|d| d.view.aid)
            .ok_or_else(|| SourceError::Malformed(format!("{id}: detail without data")))?;

        let url = self
            .comments_api_url
            .replace("{aid}", &aid.to_string())
            .replace("{limit}", &limit.to_string());
        self.get_api_json(id.as_str(), &url).await
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

#[async_trait]
impl ItemLister for YtDlpSource {
    async fn list_items(&self, listing: &Listing) -> crate::Result<Vec<String>> {
        match listing.source(&self.listing) {
            ListingSource::Api(url) => {
                let body = self.get_api_json(&listing.file_stem(), &url).await?;
                let response: ListResponse = serde_json::from_str(&body)
                    .map_err(|e| SourceError::Malformed(format!("{url}: {e}")))?;
                Ok(response.data.list.into_iter().map(|e| e.bvid).collect())
            }
            ListingSource::Playlist(url) => {
                let (info, _) = self.dump_json(&url, true).await?;
                tracing::debug!(url = %url, entries = info.entries.len(), "Playlist enumerated");
                Ok(info
                    .entries
                    .into_iter()
                    .filter_map(|e| e.id.or(e.url).or(e.webpage_url))
                    .collect())
            }
        }
    }
}
