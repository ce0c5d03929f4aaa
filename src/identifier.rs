//! External identifiers and the storage names derived from them
//!
//! Remote archives are case-insensitive while platform identifiers are not.
//! [`upper_part_tag`] turns the case pattern of an identifier into a short
//! suffix so that two identifiers differing only by case never share a remote
//! name, without the suffix itself looking like another identifier.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grammar of the platform's `BV` identifiers
pub const BVID_PATTERN: &str = "^BV[0-9A-Za-z]{10}$";

/// Longest identifier accepted by [`ExternalId`] regardless of grammar
const MAX_ID_LEN: usize = 64;

/// Encode the positions of uppercase ASCII letters of `id`.
///
/// Scans `id` from the end; every uppercase letter emits the number of
/// non-uppercase characters skipped since the previous uppercase letter
/// (omitted when zero) followed by the letter itself. Runs longer than nine
/// are written as multi-digit numbers.
///
/// ```
/// use vod_archiver::identifier::upper_part_tag;
/// assert_eq!(upper_part_tag("BV1HP411D7Rj"), "1R1D3PH1VB");
/// assert_eq!(upper_part_tag("abc"), "");
/// ```
pub fn upper_part_tag(id: &str) -> String {
    let mut tag = String::new();
    let mut steps: usize = 0;
    for c in id.chars().rev() {
        if c.is_ascii_uppercase() {
            if steps > 0 {
                tag.push_str(&steps.to_string());
            }
            tag.push(c);
            steps = 0;
        } else {
            steps += 1;
        }
    }
    tag
}

/// A validated platform identifier
///
/// Only ASCII alphanumerics are accepted, so an `ExternalId` can always be
/// used as a path component.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalId(String);

impl ExternalId {
    /// Validate the structural rules shared by every grammar
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_ID_LEN || !id.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::InvalidIdentifier(id));
        }
        Ok(Self(id))
    }

    /// The identifier as given by the platform
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-collision suffix of this identifier
    pub fn upper_part_tag(&self) -> String {
        upper_part_tag(&self.0)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExternalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExternalId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ExternalId> for String {
    fn from(id: ExternalId) -> Self {
        id.0
    }
}

/// Identifier grammar of the platform being archived
#[derive(Clone, Debug)]
pub struct IdGrammar {
    pattern: Regex,
}

impl IdGrammar {
    /// Compile a grammar from a regular expression
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| Error::Config {
            message: format!("invalid id_pattern: {e}"),
            key: Some("id_pattern".to_string()),
        })?;
        Ok(Self { pattern })
    }

    /// Grammar of `BV` identifiers
    pub fn bvid() -> Result<Self> {
        Self::new(BVID_PATTERN)
    }

    /// Validate `raw` against this grammar
    pub fn parse(&self, raw: &str) -> Result<ExternalId> {
        let id = ExternalId::new(raw.trim())?;
        if !self.pattern.is_match(id.as_str()) {
            return Err(Error::InvalidIdentifier(raw.to_string()));
        }
        Ok(id)
    }
}
