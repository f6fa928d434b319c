//! Fakes shared by the unit tests: a scripted fetcher that records how many
//! calls overlap, a line-based page model, and a recording observer.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{FetchError, ParseError};
use crate::fetcher::{BodyStream, FetchMode, Fetcher};
use crate::model::{AlbumPage, AlbumSummary, DownloadResult, TrackReference};
use crate::page::PageModel;
use crate::progress::ProgressObserver;

#[derive(Clone)]
enum Reply {
    Body(Bytes),
    Fail(FetchError),
}

#[derive(Default)]
pub struct ScriptedFetcher {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    cuts: Mutex<HashMap<String, usize>>,
    default_delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: &str, body: impl Into<Bytes>) -> Self {
        self.replies.insert(url.to_string(), Reply::Body(body.into()));
        self
    }

    pub fn fail(mut self, url: &str, err: FetchError) -> Self {
        self.replies.insert(url.to_string(), Reply::Fail(err));
        self
    }

    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// The next `times` streamed bodies of `url` break off halfway.
    pub fn cut(self, url: &str, times: usize) -> Self {
        self.cuts.lock().unwrap().insert(url.to_string(), times);
        self
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    fn take_cut(&self, url: &str) -> bool {
        let mut cuts = self.cuts.lock().unwrap();
        match cuts.get_mut(url) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    async fn reply(&self, url: &str) -> Result<Bytes, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.get(url).copied().unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.replies.get(url) {
            Some(Reply::Body(body)) => Ok(body.clone()),
            Some(Reply::Fail(err)) => Err(err.clone()),
            None => Err(FetchError::permanent(url, Some(404), "not scripted")),
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _mode: FetchMode) -> Result<Bytes, FetchError> {
        self.reply(url).await
    }

    async fn open(&self, url: &str) -> Result<BodyStream, FetchError> {
        let body = self.reply(url).await?;
        if !self.take_cut(url) {
            return Ok(BodyStream::from_bytes(url, body, 2));
        }
        let half = body.slice(..body.len() / 2);
        let chunks = vec![
            Ok(half),
            Err(FetchError::transient(url, None, "connection reset mid-body")),
        ];
        Ok(BodyStream {
            url: url.to_string(),
            content_length: Some(body.len() as u64),
            chunks: stream::iter(chunks).boxed(),
        })
    }
}

/// Retry policy with delays short enough for tests.
pub fn quick_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(2),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Album pages are `name|url` lines, track pages hold the direct url.
/// A page containing `#missing` does not exist.
pub struct LinePageModel;

impl PageModel for LinePageModel {
    fn album_key(&self, album_url: &str) -> Result<String, ParseError> {
        album_url
            .rsplit('/')
            .next()
            .filter(|key| !key.is_empty() && !album_url.starts_with("bad:"))
            .map(str::to_string)
            .ok_or_else(|| ParseError::InvalidUrl {
                url: album_url.to_string(),
                reason: "no album key".to_string(),
            })
    }

    fn parse_album_page(&self, html: &str) -> Result<AlbumPage, ParseError> {
        if html.contains("#missing") {
            return Err(ParseError::NotFound);
        }
        let tracks: Vec<TrackReference> = html
            .lines()
            .filter_map(|line| line.split_once('|'))
            .enumerate()
            .map(|(i, (name, url))| TrackReference {
                position: i + 1,
                display_name: name.trim().to_string(),
                page_url: url.trim().to_string(),
            })
            .collect();
        if tracks.is_empty() {
            return Err(ParseError::MissingElement("track lines"));
        }
        Ok(AlbumPage {
            title: html
                .lines()
                .find_map(|line| line.strip_prefix("title:"))
                .map(|t| t.trim().to_string()),
            tracks,
            ..AlbumPage::default()
        })
    }

    fn parse_track_page(&self, html: &str) -> Result<String, ParseError> {
        let url = html.trim();
        if url.is_empty() || url.contains("#missing") {
            Err(ParseError::MissingElement("direct url"))
        } else {
            Ok(url.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started(String, usize),
    Track(String, usize, bool),
    Finished(String, usize),
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn track_events(&self, album_url: &str) -> Vec<(usize, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Track(url, position, ok) if url == album_url => Some((position, ok)),
                _ => None,
            })
            .collect()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_album_started(&self, album_url: &str, _title: Option<&str>, track_count: usize) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Started(album_url.to_string(), track_count));
    }

    fn on_track_complete(&self, album_url: &str, track: &TrackReference, result: &DownloadResult) {
        self.events.lock().unwrap().push(Event::Track(
            album_url.to_string(),
            track.position,
            result.is_success(),
        ));
    }

    fn on_album_finished(&self, summary: &AlbumSummary) {
        self.events.lock().unwrap().push(Event::Finished(
            summary.album_url.clone(),
            summary.succeeded(),
        ));
    }
}
