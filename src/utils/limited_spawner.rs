use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("shutting down, no new work is started")]
    Cancelled,
    #[error("worker pool closed: {0}")]
    Closed(#[from] AcquireError),
}

/// Bounded worker pool shared by every network unit of work.
///
/// A permit is held for the whole lifetime of a unit, so at most
/// `max_concurrent` units run at once. Once the shutdown token fires no new
/// unit starts; units already holding a permit run to completion.
pub struct LimitedSpawner {
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl LimitedSpawner {
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_shutdown(max_concurrent, CancellationToken::new())
    }

    pub fn with_shutdown(max_concurrent: usize, shutdown: CancellationToken) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            shutdown,
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, SpawnError> {
        if self.shutdown.is_cancelled() {
            return Err(SpawnError::Cancelled);
        }
        let semaphore = Arc::clone(&self.semaphore);
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(SpawnError::Cancelled),
            permit = semaphore.acquire_owned() => Ok(permit?),
        }
    }

    /// Waits for a free slot, then runs `f` on its own task.
    pub async fn spawn<F>(&self, f: F) -> Result<tokio::task::JoinHandle<F::Output>, SpawnError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self.acquire().await?;
        let handle = tokio::spawn(async move {
            let _permit = permit;
            f.await
        });
        Ok(handle)
    }

    /// Waits for a free slot, then runs `f` inline on the calling task.
    pub async fn run<F>(&self, f: F) -> Result<F::Output, SpawnError>
    where
        F: Future,
    {
        let _permit = self.acquire().await?;
        Ok(f.await)
    }
}
