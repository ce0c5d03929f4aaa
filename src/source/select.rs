//! Encoding selection

use super::traits::{PartInfo, VideoStream};
use serde::{Deserialize, Serialize};

/// Codec families in descending preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecTier {
    /// Dolby Vision / HDR (`dvh`)
    Hdr,
    /// HEVC (`hev`)
    Modern,
    /// AVC (`avc`)
    Baseline,
}

impl CodecTier {
    /// Preference order
    pub const PREFERENCE: [CodecTier; 3] = [CodecTier::Hdr, CodecTier::Modern, CodecTier::Baseline];

    /// Codec string prefix of the tier
    pub fn prefix(self) -> &'static str {
        match self {
            CodecTier::Hdr => "dvh",
            CodecTier::Modern => "hev",
            CodecTier::Baseline => "avc",
        }
    }

    fn matches(self, stream: &VideoStream) -> bool {
        stream.codec.starts_with(self.prefix())
    }
}

/// Encoding handed to [`MediaSource::fetch_media`](super::MediaSource::fetch_media)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSelection {
    /// A specific tiered stream
    Stream {
        /// Tier the codec belongs to
        tier: CodecTier,
        /// Exact codec string
        codec: String,
        /// Quality rank
        quality: u32,
        /// Source handle of the stream
        format_id: String,
    },
    /// Let the source pick from its non-tiered stream at default quality
    Fallback,
}

impl MediaSelection {
    /// Tier of the selection, `None` for the fallback stream
    pub fn tier(&self) -> Option<CodecTier> {
        match self {
            MediaSelection::Stream { tier, .. } => Some(*tier),
            MediaSelection::Fallback => None,
        }
    }
}

/// Highest-quality stream of `tier`, if any is advertised
pub fn select_tier(info: &PartInfo, tier: CodecTier) -> Option<MediaSelection> {
    info.streams
        .iter()
        .filter(|s| tier.matches(s))
        .max_by_key(|s| s.quality)
        .map(|s| MediaSelection::Stream {
            tier,
            codec: s.codec.clone(),
            quality: s.quality,
            format_id: s.format_id.clone(),
        })
}

/// Best encoding for a part
///
/// Takes the first tier of [`CodecTier::PREFERENCE`] with any advertised
/// stream and its highest quality. Without tiered streams the fallback
/// stream is used when present. `None` means no viable codec.
pub fn select_encoding(info: &PartInfo) -> Option<MediaSelection> {
    CodecTier::PREFERENCE
        .iter()
        .find_map(|tier| select_tier(info, *tier))
        .or_else(|| info.has_fallback_stream.then_some(MediaSelection::Fallback))
}
