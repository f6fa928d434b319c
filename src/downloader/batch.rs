use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::downloader::pipeline::{AlbumPipeline, PipelineContext};
use crate::fetcher::Fetcher;
use crate::model::BatchSummary;
use crate::page::{PageModel, PageRequest};
use crate::progress::ProgressObserver;
use crate::utils::limited_spawner::LimitedSpawner;

/// Runs many albums at once over a single worker pool.
pub struct BatchRunner {
    pipeline: AlbumPipeline,
    page_model: Arc<dyn PageModel>,
    spawner: Arc<LimitedSpawner>,
}

impl BatchRunner {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        page_model: Arc<dyn PageModel>,
        observer: Arc<dyn ProgressObserver>,
        shutdown: CancellationToken,
    ) -> Self {
        let spawner = Arc::new(LimitedSpawner::with_shutdown(
            config.max_concurrency,
            shutdown,
        ));
        let ctx = PipelineContext {
            fetcher,
            page_model: page_model.clone(),
            spawner: spawner.clone(),
            observer,
            output_dir: config.output_dir.clone(),
            retry: config.retry.clone(),
        };
        Self {
            pipeline: AlbumPipeline::new(ctx),
            page_model,
            spawner,
        }
    }

    /// Stops starting new work; anything already running completes.
    pub fn shutdown(&self) {
        self.spawner.shutdown();
    }

    /// Runs every request and returns the summaries in input order.
    /// Requests naming the same album (or the same track) run once, and a
    /// track request is dropped when its whole album is requested too.
    pub async fn run_all(&self, urls: &[String]) -> BatchSummary {
        let unique = self.unique_requests(urls);
        if unique.len() < urls.len() {
            tracing::info!(
                skipped = urls.len() - unique.len(),
                "ignoring repeated requests"
            );
        }

        tracing::info!(albums = unique.len(), "starting batch");
        let albums =
            futures::future::join_all(unique.into_iter().map(|url| self.pipeline.run(url))).await;

        let summary = BatchSummary { albums };
        tracing::info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            bytes = summary.bytes_written(),
            "batch finished"
        );
        summary
    }

    fn unique_requests<'a>(&self, urls: &'a [String]) -> Vec<&'a str> {
        let requests: Vec<(&'a str, Option<PageRequest>)> = urls
            .iter()
            .map(|url| url.trim())
            .map(|url| (url, self.page_model.classify(url).ok()))
            .collect();

        let whole_albums: HashSet<&str> = requests
            .iter()
            .filter_map(|(_, request)| match request {
                Some(PageRequest::Album { key }) => Some(key.as_str()),
                _ => None,
            })
            .collect();

        let mut seen = HashSet::new();
        requests
            .iter()
            .filter(|(url, request)| {
                // unparsable urls keep their text as identity and fail later
                let identity = match request {
                    Some(PageRequest::Album { key }) => format!("album {key}"),
                    Some(PageRequest::Track {
                        album_key,
                        track_url,
                        ..
                    }) => {
                        if whole_albums.contains(album_key.as_str()) {
                            tracing::debug!(url, "track already covered by its album");
                            return false;
                        }
                        format!("track {track_url}")
                    }
                    None => format!("url {url}"),
                };
                seen.insert(identity)
            })
            .map(|(url, _)| *url)
            .collect()
    }
}
