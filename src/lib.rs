pub mod config;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod input;
pub mod model;
pub mod page;
pub mod progress;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use downloader::BatchRunner;
pub use error::{FailureKind, UsageError};
pub use model::{AlbumSummary, BatchSummary, DownloadResult};
