use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::RetryConfig;
use crate::error::{DownloadError, FailureKind, FetchError};
use crate::fetcher::retry::with_retry;
use crate::fetcher::{BodyStream, Fetcher};
use crate::model::{DownloadResult, DownloadTarget, TrackReference};

/// Streams resolved targets to disk.
#[derive(Clone)]
pub struct Downloader {
    fetcher: Arc<dyn Fetcher>,
    retry: RetryConfig,
}

impl Downloader {
    pub fn new(fetcher: Arc<dyn Fetcher>, retry: RetryConfig) -> Self {
        Self { fetcher, retry }
    }

    pub async fn download(&self, track: &TrackReference, target: &DownloadTarget) -> DownloadResult {
        match with_retry(&self.retry, || self.attempt(target)).await {
            Ok(bytes) => {
                tracing::debug!(
                    path = %target.destination_path.display(),
                    bytes,
                    "saved track"
                );
                DownloadResult::Success {
                    track: track.clone(),
                    path: target.destination_path.clone(),
                    bytes,
                }
            }
            Err(err) => {
                tracing::warn!(
                    position = track.position,
                    track = track.display_name.as_str(),
                    error = %err,
                    "download failed"
                );
                DownloadResult::failure(track.clone(), FailureKind::from(&err), &err)
            }
        }
    }

    /// One transfer from the first byte; a retry starts a fresh staging file.
    async fn attempt(&self, target: &DownloadTarget) -> Result<u64, DownloadError> {
        let body = self.fetcher.open(&target.direct_url).await?;
        write_atomically(&target.destination_path, body).await
    }
}

/// Hidden sibling the content is staged in before the rename.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.part", name))
}

/// Streams `body` so that `path` either holds the complete data or is left
/// as it was. Parent directories are created as needed. Returns the number
/// of bytes written.
pub async fn write_atomically(path: &Path, body: BodyStream) -> Result<u64, DownloadError> {
    let io_error = |source: std::io::Error| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    let BodyStream {
        url,
        content_length,
        mut chunks,
    } = body;
    let staging = staging_path(path);
    let written = async {
        let mut file = fs::File::create(&staging).await.map_err(io_error)?;
        let mut total: u64 = 0;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_error)?;
            total += chunk.len() as u64;
        }
        if let Some(expected) = content_length {
            if total < expected {
                return Err(DownloadError::Fetch(FetchError::transient(
                    url.as_str(),
                    None,
                    format!("truncated body: got {} of {} bytes", total, expected),
                )));
            }
        }
        file.flush().await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        drop(file);
        fs::rename(&staging, path).await.map_err(io_error)?;
        Ok(total)
    }
    .await;

    if written.is_err() {
        if let Err(cleanup) = fs::remove_file(&staging).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %staging.display(), error = %cleanup, "failed to remove partial file");
            }
        }
    }
    written
}
