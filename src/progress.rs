use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::time::Duration;

use crate::model::{AlbumSummary, BatchSummary, DownloadResult, TrackReference};

/// Receives progress notifications from the pipeline. Implementations must
/// not block; the pipeline ignores anything they do.
pub trait ProgressObserver: Send + Sync {
    fn on_album_started(&self, _album_url: &str, _title: Option<&str>, _track_count: usize) {}

    fn on_track_complete(&self, album_url: &str, track: &TrackReference, result: &DownloadResult);

    fn on_album_finished(&self, _summary: &AlbumSummary) {}
}

pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_track_complete(&self, _: &str, _: &TrackReference, _: &DownloadResult) {}
}

/// Terminal progress bar over all tracks of the run.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tracks {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_album_started(&self, album_url: &str, title: Option<&str>, track_count: usize) {
        self.bar.inc_length(track_count as u64);
        self.bar.println(format!(
            "{}: {} tracks",
            title.unwrap_or(album_url),
            track_count
        ));
    }

    fn on_track_complete(&self, _album_url: &str, track: &TrackReference, result: &DownloadResult) {
        self.bar.inc(1);
        match result {
            DownloadResult::Success { .. } => self.bar.set_message(track.display_name.clone()),
            DownloadResult::Failure { kind, message, .. } => self.bar.println(format!(
                "  failed: {:02}. {} ({}): {}",
                track.position, track.display_name, kind, message
            )),
        }
    }

    fn on_album_finished(&self, summary: &AlbumSummary) {
        if let Some(failure) = &summary.failure {
            self.bar.println(format!(
                "{}: album failed ({}): {}",
                summary.album_url, failure.kind, failure.message
            ));
        }
    }
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Human-readable end-of-run report, one block per album plus totals.
pub fn render_summary(summary: &BatchSummary, elapsed: Duration) -> String {
    let mut out = String::new();
    for album in &summary.albums {
        match &album.failure {
            Some(failure) => {
                let _ = writeln!(out, "{}: failed ({})", album.display_name(), failure.message);
            }
            None => {
                let _ = writeln!(
                    out,
                    "{}: downloaded {}/{} tracks, {:.2} MB",
                    album.display_name(),
                    album.succeeded(),
                    album.total_tracks,
                    megabytes(album.bytes_written())
                );
            }
        }
    }
    let _ = writeln!(
        out,
        "Downloaded {}/{} tracks from {} albums",
        summary.succeeded(),
        summary.total_tracks(),
        summary.albums.len()
    );
    let _ = writeln!(out, "Download size: {:.2} MB", megabytes(summary.bytes_written()));
    let _ = write!(out, "Took {:.2} seconds", elapsed.as_secs_f64());
    out
}
