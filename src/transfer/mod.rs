//! File transfer module
//!
//! Moves remote blobs into order directories:
//! - Backend contract and size-based dispatch between the two transports
//! - Bounded worker pool shared by batch operations
//! - Batch pipeline with per-file outcomes and checksums

mod checksum;
mod fetcher;
mod pipeline;
mod pool;

pub use checksum::{checksum_bytes, file_checksum, Checksum};
pub use fetcher::{BlobFetcher, FetchError, Fetchers, Sink};
pub use pipeline::{
    is_valid_file_name, BatchReport, FailureKind, FetchPipeline, FetchRequest, FetchResult,
    FetchStream, FileError, DEFAULT_FETCH_WORKERS,
};
pub use pool::WorkerPool;
