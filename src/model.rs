use serde::Serialize;
use std::path::PathBuf;

use crate::error::FailureKind;

/// One track as listed on an album page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackReference {
    /// 1-based position in the album listing
    pub position: usize,
    pub display_name: String,
    pub page_url: String,
}

/// Descriptive details from the album page, carried into the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlbumInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cover_urls: Vec<String>,
}

/// Album metadata and ordered track list extracted from an album page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlbumPage {
    pub title: Option<String>,
    pub info: AlbumInfo,
    pub tracks: Vec<TrackReference>,
}

/// A resolved track, ready to be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadTarget {
    pub file_name: String,
    pub direct_url: String,
    pub destination_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadResult {
    Success {
        track: TrackReference,
        path: PathBuf,
        bytes: u64,
    },
    Failure {
        track: TrackReference,
        kind: FailureKind,
        message: String,
    },
}

impl DownloadResult {
    pub fn failure(track: TrackReference, kind: FailureKind, message: impl ToString) -> Self {
        DownloadResult::Failure {
            track,
            kind,
            message: message.to_string(),
        }
    }

    pub fn track(&self) -> &TrackReference {
        match self {
            DownloadResult::Success { track, .. } | DownloadResult::Failure { track, .. } => track,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DownloadResult::Success { .. })
    }
}

/// Album-level failure that prevented any track work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumSummary {
    pub album_url: String,
    pub title: Option<String>,
    pub info: AlbumInfo,
    pub total_tracks: usize,
    pub results: Vec<DownloadResult>,
    pub failure: Option<AlbumFailure>,
}

impl AlbumSummary {
    pub fn failed_album(album_url: impl Into<String>, kind: FailureKind, message: impl ToString) -> Self {
        Self {
            album_url: album_url.into(),
            title: None,
            info: AlbumInfo::default(),
            total_tracks: 0,
            results: Vec::new(),
            failure: Some(AlbumFailure {
                kind,
                message: message.to_string(),
            }),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn bytes_written(&self) -> u64 {
        self.results
            .iter()
            .map(|r| match r {
                DownloadResult::Success { bytes, .. } => *bytes,
                DownloadResult::Failure { .. } => 0,
            })
            .sum()
    }

    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.album_url)
    }
}

/// Outcome of a whole run, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub albums: Vec<AlbumSummary>,
}

impl BatchSummary {
    pub fn total_tracks(&self) -> usize {
        self.albums.iter().map(|a| a.total_tracks).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.albums.iter().map(AlbumSummary::succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.albums.iter().map(AlbumSummary::failed).sum()
    }

    pub fn bytes_written(&self) -> u64 {
        self.albums.iter().map(AlbumSummary::bytes_written).sum()
    }

    /// True when no album got past its album page.
    pub fn all_albums_failed(&self) -> bool {
        !self.albums.is_empty() && self.albums.iter().all(|a| a.failure.is_some())
    }
}
