//! Item discovery: turn a platform listing into an identifier-list file
//!
//! A [`Listing`] names where items come from (a ranking board, an
//! uploader's page, a favorites folder, a collection, the weekly popular
//! series or the curated list). An [`ItemLister`] enumerates it, and
//! [`save_listing`] writes the validated, de-duplicated identifiers one per
//! line so `down --input <file>` can read them back.

use crate::config::ListingConfig;
use crate::error::{Error, Result};
use crate::identifier::{ExternalId, IdGrammar};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A listing argument given either as a page URL or as a bare numeric id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlOrId {
    /// Full page URL, handed to the lister as is
    Url(String),
    /// Numeric id, expanded through a URL template
    Id(String),
}

impl UrlOrId {
    /// Accept `http(s)://...` or a string of digits; `what` names the argument in errors
    pub fn parse(raw: &str, what: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Url(raw.to_string()));
        }
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(Self::Id(raw.to_string()));
        }
        Err(Error::InvalidIdentifier(format!(
            "{what} must be a URL or a number, got '{raw}'"
        )))
    }

    fn expand(&self, template: &str, placeholder: &str) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Id(id) => template.replace(placeholder, id),
        }
    }

    /// Numeric id, taken from the URL with `pattern` when given as a URL
    fn numeric(&self, pattern: &str) -> Option<String> {
        match self {
            Self::Id(id) => Some(id.clone()),
            Self::Url(url) => Regex::new(pattern)
                .ok()?
                .captures(url)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        }
    }
}

/// Where a batch of items is discovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    /// Ranking board; `rid` 0 is the site-wide board
    Ranking {
        /// Board (category) id
        rid: u32,
    },
    /// Everything one uploader published
    Uploads(UrlOrId),
    /// One favorites folder
    Favorites(UrlOrId),
    /// A collection or video series page
    Series(String),
    /// One issue of the weekly popular series
    PopularSeries {
        /// Issue number, starting at 1
        number: u32,
    },
    /// Curated must-watch list
    PopularPrecious,
}

/// How a listing is enumerated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingSource {
    /// Platform JSON endpoint answering `{"code": 0, "data": {"list": [{"bvid": ...}]}}`
    Api(String),
    /// Playlist page enumerated by the downloader
    Playlist(String),
}

impl Listing {
    /// A collection must be addressed by its page URL, which also names its owner
    pub fn series(raw: &str) -> Result<Self> {
        match UrlOrId::parse(raw, "series")? {
            UrlOrId::Url(url) => Ok(Self::Series(url)),
            UrlOrId::Id(_) => Err(Error::InvalidIdentifier(format!(
                "series must be given as its page URL, got '{raw}'"
            ))),
        }
    }

    /// Endpoint or playlist page for this listing
    pub fn source(&self, config: &ListingConfig) -> ListingSource {
        match self {
            Self::Ranking { rid } => {
                ListingSource::Api(config.ranking_api_url.replace("{rid}", &rid.to_string()))
            }
            Self::PopularSeries { number } => ListingSource::Api(
                config
                    .popular_series_api_url
                    .replace("{number}", &number.to_string()),
            ),
            Self::PopularPrecious => ListingSource::Api(config.popular_precious_api_url.clone()),
            Self::Uploads(target) => {
                ListingSource::Playlist(target.expand(&config.uploads_url_template, "{mid}"))
            }
            Self::Favorites(target) => {
                ListingSource::Playlist(target.expand(&config.favorites_url_template, "{fid}"))
            }
            Self::Series(url) => ListingSource::Playlist(url.clone()),
        }
    }

    /// Relative file name, without timestamp and extension
    pub fn file_stem(&self) -> String {
        match self {
            Self::Ranking { rid } => format!("by-ranking/rid-{rid}/rid-{rid}"),
            Self::Uploads(target) => {
                let mid = target.numeric(r"space\.bilibili\.com/(\d+)");
                format!("by-up_videos/mid-{}", mid.as_deref().unwrap_or("url"))
            }
            Self::Favorites(target) => {
                let fid = target.numeric(r"(?:fid=|ml)(\d+)");
                format!("by-favour/fid-{}", fid.as_deref().unwrap_or("url"))
            }
            Self::Series(url) => {
                let sid = UrlOrId::Url(url.clone()).numeric(r"(?:sid=|lists/)(\d+)");
                format!("by-space_fav_season/sid-{}", sid.as_deref().unwrap_or("url"))
            }
            Self::PopularSeries { number } => format!("by-popular_series/s{number}"),
            Self::PopularPrecious => "by-popular_precious/precious".to_string(),
        }
    }
}

/// Enumerates the items of a listing
#[async_trait]
pub trait ItemLister: Send + Sync {
    /// Raw identifiers (or item URLs) in listing order
    async fn list_items(&self, listing: &Listing) -> Result<Vec<String>>;
}

/// Result of [`save_listing`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedListing {
    /// File the identifiers were written to
    pub path: PathBuf,
    /// Identifiers written
    pub ids: Vec<ExternalId>,
    /// Entries that did not yield a valid identifier
    pub rejected: usize,
}

/// First identifier in `entry`: the entry itself, or an id embedded in a URL
fn extract_id(entry: &str, grammar: &IdGrammar) -> Option<ExternalId> {
    if let Ok(id) = grammar.parse(entry) {
        return Some(id);
    }
    entry
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|token| grammar.parse(token).ok())
}

/// Enumerate `listing` and write its identifiers under `out_dir`
///
/// The file is `<out_dir>/<stem>-<unix seconds>.txt`, one identifier per
/// line in listing order, duplicates dropped.
pub async fn save_listing(
    lister: &dyn ItemLister,
    listing: &Listing,
    grammar: &IdGrammar,
    out_dir: &Path,
) -> Result<SavedListing> {
    let entries = lister.list_items(listing).await?;

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut rejected = 0;
    for entry in &entries {
        match extract_id(entry, grammar) {
            Some(id) => {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            None => {
                tracing::warn!(entry = %entry, "Listing entry is not a valid identifier, dropping");
                rejected += 1;
            }
        }
    }
    if ids.is_empty() {
        tracing::warn!(listing = ?listing, "Listing yielded no identifiers");
    }

    let path = out_dir.join(format!(
        "{}-{}.txt",
        listing.file_stem(),
        chrono::Utc::now().timestamp()
    ));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut body = String::new();
    for id in &ids {
        body.push_str(id.as_str());
        body.push('\n');
    }
    std::fs::write(&path, body)?;

    tracing::info!(path = %path.display(), count = ids.len(), rejected, "Identifier list saved");
    Ok(SavedListing {
        path,
        ids,
        rejected,
    })
}
