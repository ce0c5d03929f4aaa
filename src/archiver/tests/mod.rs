//! Shared fakes for archiver tests

mod batch;

use super::Archiver;
use crate::config::{Config, RetryConfig};
use crate::error::{RemoteError, Result, SourceError};
use crate::identifier::ExternalId;
use crate::remote::{ArchiveClient, Metadata, SubmitReceipt};
use crate::source::detail::tests::sample;
use crate::source::{FetchRequest, MediaSelection, MediaSource, PartInfo, VideoStream};
use crate::types::Event;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// What a fake media fetch does for one format
#[derive(Debug, Clone)]
pub(crate) enum MediaBehavior {
    /// Write media and cover
    Write,
    /// Create a zero-byte media file
    Empty,
    /// Report the stream as unavailable
    Unavailable,
    /// Sleep, then write media and cover
    Slow(Duration),
}

/// In-memory media source recording every call
#[derive(Default)]
pub(crate) struct FakeSource {
    pub(crate) parts: Mutex<HashMap<String, Vec<String>>>,
    pub(crate) infos: Mutex<HashMap<String, PartInfo>>,
    pub(crate) media: Mutex<HashMap<String, MediaBehavior>>,
    pub(crate) calls: Mutex<Vec<String>>,
    pub(crate) fail_detail: AtomicBool,
    pub(crate) fail_comments: AtomicBool,
    pub(crate) media_writes: AtomicUsize,
    /// Item URLs whose listing sleeps first
    pub(crate) list_delays: Mutex<HashMap<String, Duration>>,
    /// Item URLs whose listing deletes a directory, then fails
    pub(crate) vanish_on_list: Mutex<HashMap<String, PathBuf>>,
}

pub(crate) fn stream(codec: &str, quality: u32) -> VideoStream {
    VideoStream {
        codec: codec.to_string(),
        quality,
        format_id: format!("{}-{}", &codec[..3], quality),
    }
}

/// Modern codec at quality 80 plus a baseline at 64
pub(crate) fn modern_info() -> PartInfo {
    PartInfo {
        title: "part".into(),
        streams: vec![stream("hev1.1.6.L150", 80), stream("avc1.640032", 64)],
        ..Default::default()
    }
}

impl FakeSource {
    pub(crate) fn set_parts(&self, item_url: &str, urls: Vec<String>) {
        self.parts.lock().unwrap().insert(item_url.to_string(), urls);
    }

    pub(crate) fn set_part_count(&self, item_url: &str, count: u32) {
        let urls = (1..=count).map(|p| format!("{item_url}?p={p}")).collect();
        self.set_parts(item_url, urls);
    }

    pub(crate) fn set_info(&self, part_url: &str, info: PartInfo) {
        self.infos.lock().unwrap().insert(part_url.to_string(), info);
    }

    pub(crate) fn set_media(&self, format: &str, behavior: MediaBehavior) {
        self.media.lock().unwrap().insert(format.to_string(), behavior);
    }

    pub(crate) fn delay_listing(&self, item_url: &str, delay: Duration) {
        self.list_delays
            .lock()
            .unwrap()
            .insert(item_url.to_string(), delay);
    }

    pub(crate) fn remove_on_listing(&self, item_url: &str, dir: &Path) {
        self.vanish_on_list
            .lock()
            .unwrap()
            .insert(item_url.to_string(), dir.to_path_buf());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn write_media(&self, request: &FetchRequest, format: &str) {
        std::fs::create_dir_all(&request.dest_dir).unwrap();
        std::fs::create_dir_all(&request.extra_dir).unwrap();
        std::fs::write(
            request.dest_dir.join(format!("{}.mp4", request.output_basename)),
            format!("media:{format}"),
        )
        .unwrap();
        std::fs::write(
            request.extra_dir.join(format!("{}.jpg", request.output_basename)),
            b"cover",
        )
        .unwrap();
        self.media_writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn list_parts(&self, item_url: &str) -> Result<Vec<String>> {
        self.log(format!("list:{item_url}"));
        let vanish = self.vanish_on_list.lock().unwrap().get(item_url).cloned();
        if let Some(dir) = vanish {
            let _ = std::fs::remove_dir_all(dir);
            return Err(SourceError::Malformed("listing failed".into()).into());
        }
        let delay = self.list_delays.lock().unwrap().get(item_url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let parts = self.parts.lock().unwrap().get(item_url).cloned();
        Ok(parts.unwrap_or_else(|| vec![format!("{item_url}?p=1")]))
    }

    async fn resolve_part(&self, part_url: &str) -> Result<PartInfo> {
        self.log(format!("resolve:{part_url}"));
        let info = self.infos.lock().unwrap().get(part_url).cloned();
        Ok(info.unwrap_or_else(modern_info))
    }

    async fn fetch_media(&self, request: &FetchRequest) -> Result<()> {
        let format = match &request.selection {
            MediaSelection::Stream { format_id, .. } => format_id.clone(),
            MediaSelection::Fallback => "fallback".to_string(),
        };
        self.log(format!("media:{}:{}", request.part_url, format));
        let behavior = self
            .media
            .lock()
            .unwrap()
            .get(&format)
            .cloned()
            .unwrap_or(MediaBehavior::Write);

        match behavior {
            MediaBehavior::Write => self.write_media(request, &format),
            MediaBehavior::Empty => {
                std::fs::create_dir_all(&request.dest_dir).unwrap();
                std::fs::write(
                    request.dest_dir.join(format!("{}.mp4", request.output_basename)),
                    b"",
                )
                .unwrap();
            }
            MediaBehavior::Unavailable => {
                return Err(SourceError::StreamUnavailable {
                    url: request.part_url.clone(),
                    reason: "Requested format is not available".into(),
                }
                .into());
            }
            MediaBehavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                self.write_media(request, &format);
            }
        }
        Ok(())
    }

    async fn fetch_raw_captions(&self, part_url: &str, dest_dir: &Path, output_basename: &str) -> Result<()> {
        self.log(format!("captions:{part_url}"));
        std::fs::create_dir_all(dest_dir)?;
        std::fs::write(dest_dir.join(format!("{output_basename}.xml")), b"<i></i>")?;
        Ok(())
    }

    async fn fetch_item_detail(&self, id: &ExternalId) -> Result<String> {
        self.log(format!("detail:{id}"));
        if self.fail_detail.load(Ordering::SeqCst) {
            return Err(SourceError::Api {
                id: id.to_string(),
                code: -404,
                message: "gone".into(),
            }
            .into());
        }
        Ok(sample(false))
    }

    async fn fetch_comments(&self, id: &ExternalId, _limit: usize) -> Result<String> {
        self.log(format!("comments:{id}"));
        if self.fail_comments.load(Ordering::SeqCst) {
            return Err(SourceError::Malformed("comments down".into()).into());
        }
        Ok(r#"{"code":0,"data":{"replies":[]}}"#.to_string())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// One remote item held by [`FakeRemote`]
#[derive(Debug, Clone, Default)]
pub(crate) struct RemoteItem {
    pub(crate) files: Vec<String>,
    pub(crate) metadata: Metadata,
}

/// In-memory archive store
#[derive(Default)]
pub(crate) struct FakeRemote {
    pub(crate) items: Mutex<HashMap<String, RemoteItem>>,
    pub(crate) submissions: Mutex<Vec<(String, Vec<String>, Metadata)>>,
    pub(crate) patches: Mutex<Vec<(String, Metadata)>>,
    pub(crate) reject_spam: AtomicBool,
    pub(crate) invisible: AtomicBool,
    pub(crate) exists_calls: AtomicUsize,
}

impl FakeRemote {
    pub(crate) fn insert(&self, identifier: &str, item: RemoteItem) {
        self.items.lock().unwrap().insert(identifier.to_string(), item);
    }

    pub(crate) fn submissions(&self) -> Vec<(String, Vec<String>, Metadata)> {
        self.submissions.lock().unwrap().clone()
    }

    pub(crate) fn patches(&self) -> Vec<(String, Metadata)> {
        self.patches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveClient for FakeRemote {
    async fn item_exists(&self, identifier: &str) -> Result<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.invisible.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.items.lock().unwrap().contains_key(identifier))
    }

    async fn list_remote_files(&self, identifier: &str) -> Result<Vec<String>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(identifier)
            .map(|item| item.files.clone())
            .unwrap_or_default())
    }

    async fn submit(
        &self,
        identifier: &str,
        files: &BTreeMap<String, PathBuf>,
        metadata: &Metadata,
    ) -> Result<SubmitReceipt> {
        if self.reject_spam.load(Ordering::SeqCst) {
            return Err(RemoteError::PolicyRejected(
                "Your upload of BiliBili-x appears to be spam.".into(),
            )
            .into());
        }
        let names: Vec<String> = files.keys().cloned().collect();
        self.submissions.lock().unwrap().push((
            identifier.to_string(),
            names.clone(),
            metadata.clone(),
        ));
        let mut items = self.items.lock().unwrap();
        let item = items.entry(identifier.to_string()).or_default();
        item.files.extend(names.iter().cloned());
        for (k, v) in metadata {
            item.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Ok(SubmitReceipt {
            identifier: identifier.to_string(),
            uploaded: names,
        })
    }

    async fn get_metadata(&self, identifier: &str) -> Result<Metadata> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(identifier)
            .map(|item| item.metadata.clone())
            .unwrap_or_default())
    }

    async fn patch_metadata(&self, identifier: &str, patch: &Metadata) -> Result<()> {
        self.patches
            .lock()
            .unwrap()
            .push((identifier.to_string(), patch.clone()));
        if let Some(item) = self.items.lock().unwrap().get_mut(identifier) {
            for (k, v) in patch {
                item.metadata.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub(crate) struct Harness {
    pub(crate) _dir: TempDir,
    pub(crate) archiver: Archiver,
    pub(crate) source: Arc<FakeSource>,
    pub(crate) remote: Arc<FakeRemote>,
}

impl Harness {
    pub(crate) fn item_url(&self, id: &ExternalId) -> String {
        self.archiver.config().item_url(id.as_str())
    }
}

pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.storage_home_dir = root.to_path_buf();
    config.retry = RetryConfig::fixed(1, Duration::from_millis(1));
    config.download.comment_retries = 1;
    config.download.video_concurrency = 3;
    config.upload.materialize_poll_attempts = 3;
    config.upload.materialize_poll_interval = Duration::from_millis(1);
    config.disk_space.enabled = false;
    config
}

pub(crate) fn harness_with(tweak: impl FnOnce(&mut Config)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    tweak(&mut config);
    let source = Arc::new(FakeSource::default());
    let remote = Arc::new(FakeRemote::default());
    let archiver = Archiver::new(Arc::new(config), source.clone(), remote.clone()).unwrap();
    Harness {
        _dir: dir,
        archiver,
        source,
        remote,
    }
}

pub(crate) fn harness() -> Harness {
    harness_with(|_| {})
}

pub(crate) fn id(raw: &str) -> ExternalId {
    ExternalId::new(raw).unwrap()
}

/// Events received so far
pub(crate) fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
