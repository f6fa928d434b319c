use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// How a fetch failed, as seen by callers of the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Expected to go away on retry (timeout, reset, 5xx, rate limit).
    Transient,
    /// Retrying cannot help (404, undecodable response).
    Permanent,
    /// Transient failures outlasted the retry budget.
    Exhausted,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchErrorKind::Transient => "transient",
            FetchErrorKind::Permanent => "permanent",
            FetchErrorKind::Exhausted => "exhausted",
        })
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} failure fetching {url}{}: {message}", status_suffix(.status))]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    pub status: Option<u16>,
    pub attempts: u32,
    pub message: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

impl FetchError {
    pub fn transient(url: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            url: url.into(),
            status,
            attempts: 1,
            message: message.into(),
        }
    }

    pub fn permanent(url: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            url: url.into(),
            status,
            attempts: 1,
            message: message.into(),
        }
    }

    /// Marks a transient error as final after `attempts` tries.
    pub fn exhausted(self, attempts: u32) -> Self {
        Self {
            kind: FetchErrorKind::Exhausted,
            attempts,
            ..self
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("page reports that the requested item does not exist")]
    NotFound,
    #[error("expected element not found in page: {0}")]
    MissingElement(&'static str),
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to fetch track page: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to read track page: {0}")]
    Parse(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to fetch file: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure of an album as a whole, before any track work is attempted.
#[derive(Debug, Error)]
pub enum AlbumError {
    #[error("failed to fetch album page: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to read album page: {0}")]
    Parse(#[from] ParseError),
    #[error("run was interrupted before the album started")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("no album urls given")]
    NoUrls,
    #[error("cannot read url list {path}: {source}")]
    UrlFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not an album url: {0}")]
    InvalidAlbumUrl(#[from] ParseError),
    #[error("invalid config {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

/// Flat classification carried by failed results and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Permanent,
    Exhausted,
    Parse,
    Io,
    Cancelled,
    Worker,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Permanent => "permanent fetch error",
            FailureKind::Exhausted => "retries exhausted",
            FailureKind::Parse => "parse error",
            FailureKind::Io => "i/o error",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Worker => "worker failure",
        })
    }
}

impl From<&FetchError> for FailureKind {
    fn from(err: &FetchError) -> Self {
        match err.kind {
            FetchErrorKind::Permanent => FailureKind::Permanent,
            // a bare transient error only escapes the fetcher when retries are off
            FetchErrorKind::Transient | FetchErrorKind::Exhausted => FailureKind::Exhausted,
        }
    }
}

impl From<&ResolveError> for FailureKind {
    fn from(err: &ResolveError) -> Self {
        match err {
            ResolveError::Fetch(e) => e.into(),
            ResolveError::Parse(_) => FailureKind::Parse,
        }
    }
}

impl From<&DownloadError> for FailureKind {
    fn from(err: &DownloadError) -> Self {
        match err {
            DownloadError::Fetch(e) => e.into(),
            DownloadError::Io { .. } => FailureKind::Io,
        }
    }
}

impl From<&AlbumError> for FailureKind {
    fn from(err: &AlbumError) -> Self {
        match err {
            AlbumError::Fetch(e) => e.into(),
            AlbumError::Parse(_) => FailureKind::Parse,
            AlbumError::Cancelled => FailureKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display_includes_status() {
        let err = FetchError::permanent("http://x/a", Some(404), "not found");
        assert_eq!(
            err.to_string(),
            "permanent failure fetching http://x/a (HTTP 404): not found"
        );

        let err = FetchError::transient("http://x/a", None, "timed out").exhausted(5);
        assert_eq!(err.kind, FetchErrorKind::Exhausted);
        assert_eq!(err.attempts, 5);
        assert_eq!(
            err.to_string(),
            "exhausted failure fetching http://x/a: timed out"
        );
    }

    #[test]
    fn test_failure_kind_classification() {
        let fetch = FetchError::permanent("u", Some(403), "forbidden");
        assert_eq!(
            FailureKind::from(&ResolveError::Fetch(fetch)),
            FailureKind::Permanent
        );
        assert_eq!(
            FailureKind::from(&ResolveError::Parse(ParseError::NotFound)),
            FailureKind::Parse
        );
        let io = DownloadError::Io {
            path: PathBuf::from("a"),
            source: io::Error::other("disk full"),
        };
        assert_eq!(FailureKind::from(&io), FailureKind::Io);
        assert_eq!(
            FailureKind::from(&AlbumError::Cancelled),
            FailureKind::Cancelled
        );
    }
}
