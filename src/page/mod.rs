//! Site-specific page structure.
//!
//! The pipeline never looks at markup itself; everything it needs from a page
//! goes through [`PageModel`].

pub mod khinsider;

use crate::error::ParseError;
use crate::model::AlbumPage;

pub use khinsider::{KHINSIDER_BASE_URL, KhinsiderPageModel};

/// What a url given by the user asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// Every track of an album.
    Album { key: String },
    /// One track. Its album page is still read for the track's position
    /// and name, so the file matches a whole-album download.
    Track {
        album_key: String,
        album_url: String,
        track_url: String,
    },
}

impl PageRequest {
    /// Name of the album's output directory.
    pub fn album_key(&self) -> &str {
        match self {
            PageRequest::Album { key } => key,
            PageRequest::Track { album_key, .. } => album_key,
        }
    }
}

pub trait PageModel: Send + Sync {
    /// Validates an album page url and returns a key naming the album's
    /// output directory. Called before any network activity.
    fn album_key(&self, album_url: &str) -> Result<String, ParseError>;

    /// Accepts album urls and, where the site has them, single-track urls.
    /// Models without track urls keep the default.
    fn classify(&self, url: &str) -> Result<PageRequest, ParseError> {
        self.album_key(url).map(|key| PageRequest::Album { key })
    }

    /// Album metadata and the ordered track list.
    fn parse_album_page(&self, html: &str) -> Result<AlbumPage, ParseError>;

    /// Direct file url found on a track page.
    fn parse_track_page(&self, html: &str) -> Result<String, ParseError>;
}
