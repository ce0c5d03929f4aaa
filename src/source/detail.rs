//! Item-detail snapshot
//!
//! The snapshot is stored verbatim as `extra/<basename>.info.json`; these
//! types read the fields the upload metadata is built from.

use crate::error::{DownloadError, Result};
use serde::Deserialize;

/// Envelope of the item-detail API
#[derive(Debug, Clone, Deserialize)]
pub struct DetailResponse {
    /// Platform status code, 0 on success
    pub code: i64,
    /// Platform status message
    #[serde(default)]
    pub message: String,
    /// Payload, absent on error
    #[serde(default)]
    pub data: Option<ItemDetail>,
}

/// Item-level detail
#[derive(Debug, Clone, Deserialize)]
pub struct ItemDetail {
    /// Core item information
    #[serde(rename = "View")]
    pub view: View,
    /// Tags attached to the item
    #[serde(rename = "Tags", default)]
    pub tags: Vec<Tag>,
}

/// Core item information
#[derive(Debug, Clone, Deserialize)]
pub struct View {
    /// Numeric item identifier
    pub aid: u64,
    /// External identifier
    pub bvid: String,
    /// Item title
    pub title: String,
    /// Item description
    #[serde(default)]
    pub desc: String,
    /// Publish time, seconds since the Unix epoch (UTC)
    pub pubdate: i64,
    /// Uploader
    pub owner: Person,
    /// Co-authors, when the item was created by a team
    #[serde(default)]
    pub staff: Vec<Person>,
    /// Parts of the item
    #[serde(default)]
    pub pages: Vec<Page>,
}

/// A contributor
#[derive(Debug, Clone, Deserialize)]
pub struct Person {
    /// Numeric user identifier
    pub mid: u64,
    /// Display name
    pub name: String,
}

/// One part of an item
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    /// Internal content identifier of the part
    pub cid: u64,
    /// Part index, starting at 1
    pub page: u32,
    /// Part title
    #[serde(default)]
    pub part: String,
}

/// A tag
#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    /// Tag text
    pub tag_name: String,
}

impl ItemDetail {
    /// Parse a stored or freshly fetched snapshot, rejecting error payloads
    pub fn parse(id: &str, raw: &str) -> Result<Self> {
        let response: DetailResponse = serde_json::from_str(raw)?;
        if response.code != 0 {
            return Err(DownloadError::InvalidDetail {
                id: id.to_string(),
                reason: format!("code {}: {}", response.code, response.message),
            }
            .into());
        }
        response.data.ok_or_else(|| {
            DownloadError::InvalidDetail {
                id: id.to_string(),
                reason: "missing data".to_string(),
            }
            .into()
        })
    }

    /// The page entry of part `index`
    pub fn page(&self, index: u32) -> Option<&Page> {
        self.view.pages.iter().find(|p| p.page == index)
    }

    /// Contributors, preferring the staff list over the single owner
    pub fn contributors(&self) -> Vec<&Person> {
        if self.view.staff.is_empty() {
            vec![&self.view.owner]
        } else {
            self.view.staff.iter().collect()
        }
    }
}
