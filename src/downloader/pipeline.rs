use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;

use crate::config::RetryConfig;
use crate::downloader::executor::Downloader;
use crate::downloader::resolver::TrackResolver;
use crate::error::{AlbumError, FailureKind, ParseError};
use crate::fetcher::Fetcher;
use crate::model::{AlbumPage, AlbumSummary, DownloadResult, DownloadTarget, TrackReference};
use crate::page::{PageModel, PageRequest};
use crate::progress::ProgressObserver;
use crate::utils::limited_spawner::{LimitedSpawner, SpawnError};

/// Collaborators shared by every album of a run.
#[derive(Clone)]
pub struct PipelineContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub page_model: Arc<dyn PageModel>,
    pub spawner: Arc<LimitedSpawner>,
    pub observer: Arc<dyn ProgressObserver>,
    pub output_dir: PathBuf,
    /// Retry budget for streamed file downloads.
    pub retry: RetryConfig,
}

/// Downloads one album, or one track of it: album page, then the track
/// pages, then the files.
pub struct AlbumPipeline {
    ctx: PipelineContext,
    resolver: TrackResolver,
    downloader: Downloader,
}

impl AlbumPipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        let resolver = TrackResolver::new(ctx.fetcher.clone(), ctx.page_model.clone());
        let downloader = Downloader::new(ctx.fetcher.clone(), ctx.retry.clone());
        Self {
            ctx,
            resolver,
            downloader,
        }
    }

    pub async fn run(&self, url: &str) -> AlbumSummary {
        let span = tracing::info_span!("album", url);
        let summary = self.run_request(url).instrument(span).await;
        self.ctx.observer.on_album_finished(&summary);
        summary
    }

    async fn run_request(&self, url: &str) -> AlbumSummary {
        let request = match self.ctx.page_model.classify(url) {
            Ok(request) => request,
            Err(err) => return failed_album(url, AlbumError::Parse(err)),
        };
        let album_dir = self.ctx.output_dir.join(request.album_key());
        let album_page_url = match &request {
            PageRequest::Album { .. } => url,
            PageRequest::Track { album_url, .. } => album_url.as_str(),
        };

        let page = match self.fetch_album_page(album_page_url).await {
            Ok(page) => page,
            Err(err) => return failed_album(url, err),
        };

        let selected: Vec<TrackReference> = match &request {
            PageRequest::Album { .. } => page.tracks.clone(),
            PageRequest::Track { track_url, .. } => match find_listed(&page.tracks, track_url) {
                Some(track) => vec![track.clone()],
                None => {
                    let missing = ParseError::MissingElement("requested track in album listing");
                    return failed_album(url, AlbumError::Parse(missing));
                }
            },
        };

        tracing::info!(
            title = page.title.as_deref().unwrap_or("<untitled>"),
            year = page.info.year.as_deref().unwrap_or("?"),
            listed = page.tracks.len(),
            selected = selected.len(),
            dir = %album_dir.display(),
            "album page parsed"
        );
        self.ctx
            .observer
            .on_album_started(url, page.title.as_deref(), selected.len());

        let request_url: Arc<str> = Arc::from(url);
        // numbering width follows the full listing, as for a whole-album run
        let resolved = self
            .resolve_all(&request_url, &selected, page.tracks.len(), album_dir)
            .await;
        let results = self.download_all(&request_url, resolved).await;

        let summary = AlbumSummary {
            album_url: url.to_string(),
            title: page.title,
            info: page.info,
            total_tracks: selected.len(),
            results,
            failure: None,
        };
        tracing::info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            bytes = summary.bytes_written(),
            "album finished"
        );
        summary
    }

    async fn fetch_album_page(&self, album_url: &str) -> Result<AlbumPage, AlbumError> {
        let html = self
            .ctx
            .spawner
            .run(self.ctx.fetcher.fetch_html(album_url))
            .await
            .map_err(|_| AlbumError::Cancelled)??;
        Ok(self.ctx.page_model.parse_album_page(&html)?)
    }

    /// Track page of every track, one pool unit each. Failures are final
    /// results and have already been reported to the observer.
    async fn resolve_all(
        &self,
        album_url: &Arc<str>,
        tracks: &[TrackReference],
        track_count: usize,
        album_dir: PathBuf,
    ) -> Vec<(TrackReference, Result<DownloadTarget, DownloadResult>)> {
        let jobs: Vec<_> = tracks
            .iter()
            .map(|track| {
                let resolver = self.resolver.clone();
                let observer = self.ctx.observer.clone();
                let album_url = album_url.clone();
                let album_dir = album_dir.clone();
                let job_track = track.clone();
                let job = async move {
                    resolver
                        .resolve(&job_track, &album_dir, track_count)
                        .await
                        .map_err(|err| {
                            tracing::warn!(
                                position = job_track.position,
                                track = job_track.display_name.as_str(),
                                error = %err,
                                "could not resolve track"
                            );
                            let failure = DownloadResult::failure(
                                job_track.clone(),
                                FailureKind::from(&err),
                                &err,
                            );
                            observer.on_track_complete(&album_url, &job_track, &failure);
                            failure
                        })
                };
                (track.clone(), job)
            })
            .collect();

        self.spawn_in_order(album_url, jobs)
            .await
            .into_iter()
            .map(|(track, outcome)| (track, outcome.and_then(|resolved| resolved)))
            .collect()
    }

    async fn download_all(
        &self,
        album_url: &Arc<str>,
        resolved: Vec<(TrackReference, Result<DownloadTarget, DownloadResult>)>,
    ) -> Vec<DownloadResult> {
        let mut results: Vec<Option<DownloadResult>> = vec![None; resolved.len()];
        let mut slots = Vec::new();
        let mut jobs = Vec::new();

        for (slot, (track, outcome)) in resolved.into_iter().enumerate() {
            match outcome {
                Ok(target) => {
                    let downloader = self.downloader.clone();
                    let observer = self.ctx.observer.clone();
                    let album_url = album_url.clone();
                    let job_track = track.clone();
                    slots.push(slot);
                    jobs.push((
                        track,
                        async move {
                            let result = downloader.download(&job_track, &target).await;
                            observer.on_track_complete(&album_url, &job_track, &result);
                            result
                        },
                    ));
                }
                Err(failure) => results[slot] = Some(failure),
            }
        }

        let downloaded = self.spawn_in_order(album_url, jobs).await;
        for (slot, (_, outcome)) in slots.into_iter().zip(downloaded) {
            results[slot] = Some(outcome.unwrap_or_else(|failure| failure));
        }

        results.into_iter().flatten().collect()
    }

    /// Runs each job as one pool unit and returns the outputs in job order.
    /// Jobs that never started (shutdown) or died are turned into failures
    /// here and reported to the observer.
    async fn spawn_in_order<T, Fut>(
        &self,
        album_url: &str,
        jobs: Vec<(TrackReference, Fut)>,
    ) -> Vec<(TrackReference, Result<T, DownloadResult>)>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut pending = Vec::with_capacity(jobs.len());
        for (track, job) in jobs {
            let handle = self.ctx.spawner.spawn(job).await;
            pending.push((track, handle));
        }

        let mut outputs = Vec::with_capacity(pending.len());
        for (track, handle) in pending {
            let outcome = match handle {
                Ok(handle) => handle.await.map_err(|err| {
                    tracing::error!(position = track.position, error = %err, "worker task failed");
                    DownloadResult::failure(track.clone(), FailureKind::Worker, err)
                }),
                Err(SpawnError::Cancelled) => Err(DownloadResult::failure(
                    track.clone(),
                    FailureKind::Cancelled,
                    "not started: run was interrupted",
                )),
                Err(err) => Err(DownloadResult::failure(track.clone(), FailureKind::Cancelled, err)),
            };
            if let Err(failure) = &outcome {
                self.ctx.observer.on_track_complete(album_url, &track, failure);
            }
            outputs.push((track, outcome));
        }
        outputs
    }
}

fn find_listed<'a>(tracks: &'a [TrackReference], track_url: &str) -> Option<&'a TrackReference> {
    let wanted = track_url.trim_end_matches('/');
    tracks
        .iter()
        .find(|track| track.page_url.trim_end_matches('/') == wanted)
}

fn failed_album(album_url: &str, err: AlbumError) -> AlbumSummary {
    tracing::warn!(error = %err, "album failed");
    AlbumSummary::failed_album(album_url, FailureKind::from(&err), &err)
}
