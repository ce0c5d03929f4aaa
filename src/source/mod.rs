//! Media source: the video platform as seen by the download orchestrator
//!
//! [`MediaSource`] is the seam; [`YtDlpSource`] implements it on top of
//! yt-dlp. Encoding choice lives in [`select`], independent of any source.
//! Item discovery for identifier lists lives in [`listing`].

pub mod detail;
pub mod listing;
pub mod select;
mod traits;
mod ytdlp;

pub use listing::{ItemLister, Listing, ListingSource, SavedListing, UrlOrId, save_listing};
pub use select::{CodecTier, MediaSelection, select_encoding, select_tier};
pub use traits::{
    FetchRequest, LanguageCode, MediaSource, PartInfo, SubtitleLanguage, SubtitleTrack,
    VideoStream,
};
pub use ytdlp::YtDlpSource;
