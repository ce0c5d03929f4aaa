//! On-disk state store
//!
//! Pipeline state lives entirely in the directory tree under the storage
//! home directory. Marker files record completed steps:
//!
//! ```text
//! <root>/videos/<id>-<upper>/
//!   _all_downloaded.mark
//!   <tag>-<id>_p<N>/
//!     _downloaded.mark
//!     _uploaded.mark
//!     _download_error.mark
//!     <id>_p<N>.<ext>
//!     extra/
//!       <id>_p<N>.info.json
//!       <id>_p<N>.replies.json
//! <root>/.locks/<id>/_uploading.lock
//! <root>/ia_item_exist_cache/<remote identifier>.mark
//! ```
//!
//! Marks are checkpoints, not transactions: a crash between writing a file
//! and writing its mark is repaired by re-verifying on the next run.

mod exist_cache;
mod lock;

pub use exist_cache::ExistCache;
pub use lock::UploadLock;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identifier::ExternalId;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the per-part sidecar subdirectory
pub const EXTRA_DIR: &str = "extra";

/// Marker files understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    /// Item level: every part was downloaded
    AllDownloaded,
    /// Part level: primary media and sidecars are on disk
    Downloaded,
    /// Part level: the remote item holds this part
    Uploaded,
    /// Part or item level: the last download attempt failed; holds the error text
    DownloadError,
    /// Item level: the remote store rejected the item as unwanted content
    Spam,
}

impl Mark {
    /// File name of the marker
    pub fn file_name(self) -> &'static str {
        match self {
            Mark::AllDownloaded => "_all_downloaded.mark",
            Mark::Downloaded => "_downloaded.mark",
            Mark::Uploaded => "_uploaded.mark",
            Mark::DownloadError => "_download_error.mark",
            Mark::Spam => "_spam.mark",
        }
    }
}

/// Whether `mark` is present in `dir`
pub fn has_mark(dir: &Path, mark: Mark) -> bool {
    dir.join(mark.file_name()).is_file()
}

/// Create or truncate `mark` in `dir`, write `payload` and flush it to disk
pub fn set_mark(dir: &Path, mark: Mark, payload: &str) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = std::fs::File::create(dir.join(mark.file_name()))?;
    file.write_all(payload.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Remove `mark` from `dir`; absent marks are fine
pub fn clear_mark(dir: &Path, mark: Mark) -> Result<()> {
    match std::fs::remove_file(dir.join(mark.file_name())) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Contents of a text mark, if present
pub fn read_mark(dir: &Path, mark: Mark) -> Option<String> {
    std::fs::read_to_string(dir.join(mark.file_name())).ok()
}

/// Resolves every path of the local archive
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
    item_tag: String,
    media_extensions: Vec<String>,
}

impl StateStore {
    /// Create a store rooted at `root`
    pub fn new(
        root: impl Into<PathBuf>,
        item_tag: impl Into<String>,
        media_extensions: Vec<String>,
    ) -> Self {
        Self {
            root: root.into(),
            item_tag: item_tag.into(),
            media_extensions,
        }
    }

    /// Store described by the storage section of `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.storage.storage_home_dir.clone(),
            config.storage.item_tag.clone(),
            config.storage.media_extensions.clone(),
        )
    }

    /// Storage home directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Prefix shared by part directories and remote identifiers
    pub fn item_tag(&self) -> &str {
        &self.item_tag
    }

    /// Parent of every item directory
    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("videos")
    }

    /// Root of the per-item upload lock directories
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }

    /// Upload lock directory of one item
    pub fn lock_dir(&self, id: &ExternalId) -> PathBuf {
        self.locks_dir().join(id.as_str())
    }

    /// Remote-existence cache directory
    pub fn exist_cache_dir(&self) -> PathBuf {
        self.root.join("ia_item_exist_cache")
    }

    /// Layout of one item
    pub fn item(&self, id: &ExternalId) -> ItemLayout {
        let videos = self.videos_dir();
        ItemLayout {
            id: id.clone(),
            dir: videos.join(format!("{}-{}", id, id.upper_part_tag())),
            legacy_dir: videos.join(id.as_str()),
            item_tag: self.item_tag.clone(),
            media_extensions: self.media_extensions.clone(),
        }
    }

    /// Identifiers of every item directory under `videos/`, sorted
    ///
    /// Directories under both the current and the legacy naming scheme are
    /// listed; names that are not valid identifiers are skipped with a warning.
    pub fn local_items(&self) -> Result<Vec<ExternalId>> {
        let videos = self.videos_dir();
        if !videos.is_dir() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&videos)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let raw = name.split_once('-').map_or(name.as_str(), |(id, _)| id);
            match ExternalId::new(raw) {
                Ok(id) => ids.push(id),
                Err(_) => tracing::warn!(dir = %name, "Skipping unrecognised item directory"),
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// Paths of one item
#[derive(Debug, Clone)]
pub struct ItemLayout {
    id: ExternalId,
    dir: PathBuf,
    legacy_dir: PathBuf,
    item_tag: String,
    media_extensions: Vec<String>,
}

impl ItemLayout {
    /// Identifier of the item
    pub fn id(&self) -> &ExternalId {
        &self.id
    }

    /// Current item directory `videos/<id>-<upper>`
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory name used before the case-collision suffix was introduced
    pub fn legacy_dir(&self) -> &Path {
        &self.legacy_dir
    }

    /// Rename the legacy directory to the current name if needed
    ///
    /// Returns `true` when a rename happened. Repeated calls are no-ops. If both
    /// directories exist the item needs manual attention and
    /// [`Error::MigrationConflict`] is returned.
    pub fn migrate_legacy(&self) -> Result<bool> {
        if !self.legacy_dir.is_dir() {
            return Ok(false);
        }
        if self.dir.exists() {
            return Err(Error::MigrationConflict {
                legacy: self.legacy_dir.clone(),
                current: self.dir.clone(),
            });
        }
        std::fs::rename(&self.legacy_dir, &self.dir)?;
        tracing::info!(
            item = %self.id,
            from = %self.legacy_dir.display(),
            to = %self.dir.display(),
            "Migrated legacy item directory"
        );
        Ok(true)
    }

    /// Layout of part `index` (1-based)
    pub fn part(&self, index: u32) -> PartLayout {
        let basename = format!("{}_p{}", self.id, index);
        let local_identifier = format!("{}-{}", self.item_tag, basename);
        PartLayout {
            index,
            dir: self.dir.join(&local_identifier),
            remote_identifier: format!("{}-{}", local_identifier, self.id.upper_part_tag()),
            local_identifier,
            basename,
            media_extensions: self.media_extensions.clone(),
        }
    }

    /// Part subdirectories present on disk, sorted by name
    pub fn part_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Part index encoded in a part directory name, if it belongs to this item
    pub fn part_index_of(&self, dir_name: &str) -> Option<u32> {
        let prefix = format!("{}-{}_p", self.item_tag, self.id);
        dir_name.strip_prefix(&prefix)?.parse().ok()
    }
}

/// Paths and names of one part
#[derive(Debug, Clone)]
pub struct PartLayout {
    index: u32,
    dir: PathBuf,
    basename: String,
    local_identifier: String,
    remote_identifier: String,
    media_extensions: Vec<String>,
}

impl PartLayout {
    /// Part index, starting at 1
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Part directory `<tag>-<id>_p<N>`
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sidecar subdirectory
    pub fn extra_dir(&self) -> PathBuf {
        self.dir.join(EXTRA_DIR)
    }

    /// File basename `<id>_p<N>` shared by the media and every sidecar
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Local storage name `<tag>-<id>_p<N>`
    pub fn local_identifier(&self) -> &str {
        &self.local_identifier
    }

    /// Remote identifier `<tag>-<id>_p<N>-<upper>`
    pub fn remote_identifier(&self) -> &str {
        &self.remote_identifier
    }

    /// Item-detail snapshot path
    pub fn info_json(&self) -> PathBuf {
        self.extra_dir().join(format!("{}.info.json", self.basename))
    }

    /// Comment snapshot path
    pub fn replies_json(&self) -> PathBuf {
        self.extra_dir().join(format!("{}.replies.json", self.basename))
    }

    /// Whether `file_name` is a primary media file of this part
    pub fn is_media_name(&self, file_name: &str) -> bool {
        self.media_extensions
            .iter()
            .any(|ext| file_name == format!("{}.{}", self.basename, ext))
    }

    /// Primary media file, checked in extension preference order
    ///
    /// Zero-byte files are treated as absent.
    pub fn find_media(&self) -> Option<PathBuf> {
        self.media_extensions
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", self.basename, ext)))
            .find(|path| std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0))
    }

    /// Whether a mark is present in the part directory
    pub fn has(&self, mark: Mark) -> bool {
        has_mark(&self.dir, mark)
    }

    /// Write a mark into the part directory
    pub fn set(&self, mark: Mark, payload: &str) -> Result<()> {
        set_mark(&self.dir, mark, payload)
    }

    /// Delete partial artifacts of an interrupted download
    ///
    /// Removes every regular file directly in the part directory whose name
    /// starts with the part basename. Marks and `extra/` are left alone.
    pub fn clear_cache(&self) -> Result<usize> {
        if !self.dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(&self.basename)
            {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(part = %self.local_identifier, removed, "Cleared stale download cache");
        }
        Ok(removed)
    }
}
