//! Per-item download state machine

use super::Archiver;
use crate::error::{DownloadError, Error, Result, SourceError};
use crate::identifier::ExternalId;
use crate::retry::with_retry;
use crate::source::detail::ItemDetail;
use crate::source::{CodecTier, FetchRequest, MediaSelection, PartInfo, select_encoding, select_tier};
use crate::store::{ItemLayout, Mark, PartLayout, clear_mark, has_mark, set_mark};
use crate::types::{DownloadOutcome, Event, SkipReason};

/// Check that the `n`-th part URL carries `p=n`
pub(crate) fn check_part_urls(id: &ExternalId, urls: &[String]) -> Result<()> {
    for (i, raw) in urls.iter().enumerate() {
        let expected = (i + 1) as u32;
        let carried = url::Url::parse(raw).ok().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "p")
                .and_then(|(_, v)| v.parse::<u32>().ok())
        });
        if carried != Some(expected) {
            return Err(DownloadError::PartNumberMismatch {
                id: id.to_string(),
                expected,
                url: raw.clone(),
            }
            .into());
        }
    }
    Ok(())
}

impl Archiver {
    /// Download one item, waiting for an admission token first
    pub async fn download_item(&self, id: &ExternalId) -> Result<DownloadOutcome> {
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| Error::ShuttingDown)?;
        self.download_admitted(id).await
    }

    /// Run the download state machine; the caller holds an admission token
    pub(crate) async fn download_admitted(&self, id: &ExternalId) -> Result<DownloadOutcome> {
        let item = self.store.item(id);
        item.migrate_legacy()?;

        if has_mark(item.dir(), Mark::AllDownloaded) {
            tracing::info!(item = %id, "All parts already downloaded, skipping");
            self.emit_event(Event::ItemSkipped {
                id: id.clone(),
                reason: SkipReason::AlreadyDownloaded,
            });
            return Ok(DownloadOutcome::AlreadyComplete);
        }

        self.emit_event(Event::DownloadStarted { id: id.clone() });
        tracing::info!(item = %id, "Download started");

        match self.download_parts(&item).await {
            Ok((fetched, skipped)) => {
                set_mark(item.dir(), Mark::AllDownloaded, "")?;
                tracing::info!(item = %id, fetched, skipped, "All parts downloaded");
                self.emit_event(Event::ItemDownloaded {
                    id: id.clone(),
                    fetched,
                });
                Ok(DownloadOutcome::Completed { fetched, skipped })
            }
            Err(e) => {
                tracing::error!(item = %id, error = %e, "Download aborted");
                self.emit_event(Event::DownloadFailed {
                    id: id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn download_parts(&self, item: &ItemLayout) -> Result<(u32, u32)> {
        let id = item.id();
        let item_url = self.config.item_url(id.as_str());
        let part_urls =
            with_retry(&self.config.retry, || self.source.list_parts(&item_url)).await?;

        if let Err(e) = check_part_urls(id, &part_urls) {
            set_mark(item.dir(), Mark::DownloadError, &e.to_string())?;
            return Err(e);
        }
        tracing::debug!(item = %id, parts = part_urls.len(), "Parts enumerated");

        let mut fetched = 0;
        let mut skipped = 0;
        for (i, part_url) in part_urls.iter().enumerate() {
            let part = item.part((i + 1) as u32);

            if part.has(Mark::Downloaded) {
                if part.find_media().is_some() {
                    tracing::info!(item = %id, part = part.index(), "Part already downloaded");
                    self.emit_event(Event::PartSkipped {
                        id: id.clone(),
                        part: part.index(),
                    });
                    skipped += 1;
                    continue;
                }
                tracing::warn!(
                    item = %id,
                    part = part.index(),
                    "Downloaded mark without media file, downloading again"
                );
                clear_mark(part.dir(), Mark::Downloaded)?;
            }

            match self.download_part(id, &part, part_url).await {
                Ok(tier) => {
                    part.set(Mark::Downloaded, "")?;
                    clear_mark(part.dir(), Mark::DownloadError)?;
                    self.emit_event(Event::PartDownloaded {
                        id: id.clone(),
                        part: part.index(),
                        tier,
                    });
                    fetched += 1;
                }
                Err(e) => {
                    if let Err(mark_err) = part.set(Mark::DownloadError, &e.to_string()) {
                        tracing::warn!(item = %id, part = part.index(), error = %mark_err, "Failed to write error mark");
                    }
                    return Err(e);
                }
            }
        }
        Ok((fetched, skipped))
    }

    async fn download_part(
        &self,
        id: &ExternalId,
        part: &PartLayout,
        part_url: &str,
    ) -> Result<Option<CodecTier>> {
        std::fs::create_dir_all(part.dir())?;
        part.clear_cache()?;

        let info = with_retry(&self.config.retry, || self.source.resolve_part(part_url)).await?;
        let selection = select_encoding(&info).ok_or_else(|| DownloadError::NoViableCodec {
            id: id.to_string(),
            part: part.index(),
        })?;
        tracing::info!(item = %id, part = part.index(), selection = ?selection, "Encoding selected");

        self.fetch_part(id, part, part_url, &info, &selection).await?;
        let mut kept = selection.tier();

        if part.find_media().is_none()
            && kept == Some(CodecTier::Modern)
            && let Some(baseline) = select_tier(&info, CodecTier::Baseline)
        {
            tracing::warn!(
                item = %id,
                part = part.index(),
                "Modern codec produced no media, retrying with baseline codec"
            );
            self.emit_event(Event::CodecFallback {
                id: id.clone(),
                part: part.index(),
                from: CodecTier::Modern,
                to: CodecTier::Baseline,
            });
            part.clear_cache()?;
            let request = self.fetch_request(part, part_url, &info, baseline);
            self.source.fetch_media(&request).await?;
            kept = Some(CodecTier::Baseline);
        }

        if part.find_media().is_none() {
            return Err(DownloadError::MediaMissing {
                id: id.to_string(),
                part: part.index(),
                path: part.dir().to_path_buf(),
            }
            .into());
        }
        Ok(kept)
    }

    fn fetch_request(
        &self,
        part: &PartLayout,
        part_url: &str,
        info: &PartInfo,
        selection: MediaSelection,
    ) -> FetchRequest {
        FetchRequest {
            part_url: part_url.to_string(),
            selection,
            dest_dir: part.dir().to_path_buf(),
            extra_dir: part.extra_dir(),
            output_basename: part.basename().to_string(),
            subtitle_tracks: info.subtitles.clone(),
            subtitle_language: self.subtitle_language.clone(),
            concurrency: self.config.download.part_concurrency,
            stream_retries: self.config.download.stream_retry,
        }
    }

    /// Fetch media, raw captions, detail and comments concurrently
    ///
    /// The first failing branch drops the others, which kills their
    /// subprocesses and stops their writes.
    async fn fetch_part(
        &self,
        id: &ExternalId,
        part: &PartLayout,
        part_url: &str,
        info: &PartInfo,
        selection: &MediaSelection,
    ) -> Result<()> {
        let request = self.fetch_request(part, part_url, info, selection.clone());
        let extra_dir = part.extra_dir();

        let media = async {
            match self.source.fetch_media(&request).await {
                Err(Error::Source(SourceError::StreamUnavailable { reason, .. }))
                    if selection.tier() == Some(CodecTier::Modern) =>
                {
                    tracing::warn!(item = %id, part = part.index(), reason, "Modern stream advertised but unavailable");
                    Ok(())
                }
                other => other,
            }
        };
        let captions = self
            .source
            .fetch_raw_captions(part_url, &extra_dir, part.basename());
        let detail = self.snapshot_detail(id, part);
        let comments = self.snapshot_comments(id, part);

        tokio::try_join!(media, captions, detail, comments)?;
        Ok(())
    }

    /// Item-detail snapshot, fetched once and never overwritten
    async fn snapshot_detail(&self, id: &ExternalId, part: &PartLayout) -> Result<()> {
        let path = part.info_json();
        if path.is_file() {
            tracing::debug!(item = %id, part = part.index(), "Detail snapshot present");
            return Ok(());
        }

        let raw = with_retry(&self.config.retry, || self.source.fetch_item_detail(id)).await?;
        ItemDetail::parse(id.as_str(), &raw)?;

        tokio::fs::create_dir_all(part.extra_dir()).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Top-N comment snapshot; failures are logged, never fatal
    async fn snapshot_comments(&self, id: &ExternalId, part: &PartLayout) -> Result<()> {
        let limit = self.config.download.comments_limit;
        let retries = self.config.download.comment_retries;

        for attempt in 0..=retries {
            match self.source.fetch_comments(id, limit).await {
                Ok(raw) => {
                    tokio::fs::create_dir_all(part.extra_dir()).await?;
                    tokio::fs::write(part.replies_json(), raw.as_bytes()).await?;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(item = %id, part = part.index(), attempt = attempt + 1, error = %e, "Comment fetch failed");
                    if attempt < retries {
                        tokio::time::sleep(self.config.retry.initial_delay).await;
                    }
                }
            }
        }
        tracing::warn!(item = %id, part = part.index(), "Giving up on comments");
        Ok(())
    }
}
