pub mod batch;
pub mod executor;
pub mod pipeline;
pub mod resolver;

pub use batch::BatchRunner;
pub use executor::{Downloader, write_atomically};
pub use pipeline::{AlbumPipeline, PipelineContext};
pub use resolver::TrackResolver;
