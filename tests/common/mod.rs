//! Common test utilities for vod-archiver integration tests
//!
//! In-memory collaborators implemented against the public traits only.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use vod_archiver::config::RetryConfig;
use vod_archiver::remote::{ArchiveClient, Metadata, SubmitReceipt};
use vod_archiver::source::{FetchRequest, MediaSelection, MediaSource, PartInfo, VideoStream};
use vod_archiver::{Archiver, Config, Error, ExternalId, Result, SourceError};

/// Item-detail payload for `id` with `parts` pages
pub fn detail_json(id: &str, parts: u32) -> String {
    let pages: Vec<serde_json::Value> = (1..=parts)
        .map(|p| serde_json::json!({"cid": 900 + p, "page": p, "part": format!("part {p}")}))
        .collect();
    serde_json::json!({
        "code": 0,
        "message": "0",
        "data": {
            "View": {
                "aid": 4242,
                "bvid": id,
                "title": format!("Title of {id}"),
                "desc": "desc",
                "pubdate": 1_700_000_000,
                "owner": {"mid": 7, "name": "owner"},
                "staff": [],
                "pages": pages,
            },
            "Tags": [{"tag_name": "test"}],
        }
    })
    .to_string()
}

/// Platform fake: every item has `parts[id]` parts (default 1), modern and baseline streams
#[derive(Default)]
pub struct FakePlatform {
    pub parts: Mutex<HashMap<String, u32>>,
    /// Part URLs whose media fetch fails
    pub broken: Mutex<HashSet<String>>,
    pub media_fetches: Mutex<Vec<String>>,
    pub list_calls: AtomicUsize,
}

impl FakePlatform {
    pub fn with_parts(&self, id: &str, parts: u32) {
        self.parts.lock().unwrap().insert(id.to_string(), parts);
    }

    pub fn break_part(&self, part_url: &str) {
        self.broken.lock().unwrap().insert(part_url.to_string());
    }

    pub fn repair_all(&self) {
        self.broken.lock().unwrap().clear();
    }

    pub fn media_fetches(&self) -> Vec<String> {
        self.media_fetches.lock().unwrap().clone()
    }

    fn part_count(&self, item_url: &str) -> u32 {
        let parts = self.parts.lock().unwrap();
        parts
            .iter()
            .find(|(id, _)| item_url.contains(id.as_str()))
            .map(|(_, n)| *n)
            .unwrap_or(1)
    }
}

#[async_trait]
impl MediaSource for FakePlatform {
    async fn list_parts(&self, item_url: &str) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok((1..=self.part_count(item_url))
            .map(|p| format!("{item_url}?p={p}"))
            .collect())
    }

    async fn resolve_part(&self, _part_url: &str) -> Result<PartInfo> {
        Ok(PartInfo {
            title: "part".into(),
            streams: vec![
                VideoStream {
                    codec: "hev1.1.6.L150".into(),
                    quality: 80,
                    format_id: "30080".into(),
                },
                VideoStream {
                    codec: "avc1.640032".into(),
                    quality: 80,
                    format_id: "30064".into(),
                },
            ],
            ..Default::default()
        })
    }

    async fn fetch_media(&self, request: &FetchRequest) -> Result<()> {
        let format = match &request.selection {
            MediaSelection::Stream { format_id, .. } => format_id.clone(),
            MediaSelection::Fallback => "fallback".to_string(),
        };
        self.media_fetches
            .lock()
            .unwrap()
            .push(format!("{}#{}", request.part_url, format));
        if self.broken.lock().unwrap().contains(&request.part_url) {
            return Err(Error::ExternalTool("yt-dlp exited with status 1".into()));
        }
        std::fs::create_dir_all(&request.dest_dir)?;
        std::fs::create_dir_all(&request.extra_dir)?;
        std::fs::write(
            request.dest_dir.join(format!("{}.mp4", request.output_basename)),
            format.as_bytes(),
        )?;
        std::fs::write(
            request.extra_dir.join(format!("{}.jpg", request.output_basename)),
            b"cover",
        )?;
        Ok(())
    }

    async fn fetch_raw_captions(
        &self,
        _part_url: &str,
        dest_dir: &Path,
        output_basename: &str,
    ) -> Result<()> {
        std::fs::create_dir_all(dest_dir)?;
        std::fs::write(dest_dir.join(format!("{output_basename}.xml")), b"<i/>")?;
        Ok(())
    }

    async fn fetch_item_detail(&self, id: &ExternalId) -> Result<String> {
        let parts = self.part_count(id.as_str());
        Ok(detail_json(id.as_str(), parts))
    }

    async fn fetch_comments(&self, _id: &ExternalId, _limit: usize) -> Result<String> {
        Err(SourceError::Malformed("comments disabled".into()).into())
    }

    fn name(&self) -> &'static str {
        "fake-platform"
    }
}

/// Archive fake: items become visible immediately after submission
#[derive(Default)]
pub struct FakeArchive {
    pub items: Mutex<HashMap<String, (Vec<String>, Metadata)>>,
    pub submissions: Mutex<Vec<String>>,
}

impl FakeArchive {
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.items.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn metadata(&self, identifier: &str) -> Option<Metadata> {
        self.items
            .lock()
            .unwrap()
            .get(identifier)
            .map(|(_, m)| m.clone())
    }
}

#[async_trait]
impl ArchiveClient for FakeArchive {
    async fn item_exists(&self, identifier: &str) -> Result<bool> {
        Ok(self.items.lock().unwrap().contains_key(identifier))
    }

    async fn list_remote_files(&self, identifier: &str) -> Result<Vec<String>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(identifier)
            .map(|(files, _)| files.clone())
            .unwrap_or_default())
    }

    async fn submit(
        &self,
        identifier: &str,
        files: &BTreeMap<String, PathBuf>,
        metadata: &Metadata,
    ) -> Result<SubmitReceipt> {
        self.submissions.lock().unwrap().push(identifier.to_string());
        let names: Vec<String> = files.keys().cloned().collect();
        let mut items = self.items.lock().unwrap();
        let entry = items
            .entry(identifier.to_string())
            .or_insert_with(|| (Vec::new(), metadata.clone()));
        entry.0.extend(names.iter().cloned());
        Ok(SubmitReceipt {
            identifier: identifier.to_string(),
            uploaded: names,
        })
    }

    async fn get_metadata(&self, identifier: &str) -> Result<Metadata> {
        Ok(self.metadata(identifier).unwrap_or_default())
    }

    async fn patch_metadata(&self, identifier: &str, patch: &Metadata) -> Result<()> {
        if let Some((_, metadata)) = self.items.lock().unwrap().get_mut(identifier) {
            for (k, v) in patch {
                metadata.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake-archive"
    }
}

/// Archiver over fresh fakes in a temporary storage root
pub struct TestPipeline {
    pub dir: TempDir,
    pub archiver: Archiver,
    pub platform: Arc<FakePlatform>,
    pub archive: Arc<FakeArchive>,
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.storage_home_dir = root.to_path_buf();
    config.retry = RetryConfig::fixed(1, Duration::from_millis(1));
    config.download.comment_retries = 0;
    config.upload.materialize_poll_attempts = 2;
    config.upload.materialize_poll_interval = Duration::from_millis(1);
    config.disk_space.enabled = false;
    config.queue.download_backoff = Duration::from_millis(1);
    config.queue.upload_backoff = Duration::from_millis(1);
    config
}

pub fn pipeline() -> TestPipeline {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(dir.path()));
    let platform = Arc::new(FakePlatform::default());
    let archive = Arc::new(FakeArchive::default());
    let archiver = Archiver::new(config, platform.clone(), archive.clone()).unwrap();
    TestPipeline {
        dir,
        archiver,
        platform,
        archive,
    }
}

pub fn id(raw: &str) -> ExternalId {
    ExternalId::new(raw).unwrap()
}
