//! Blob fetcher contract and backend dispatch

use crate::fileid::DecodeError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWrite;

/// Destination a fetcher streams into
pub type Sink<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Why a single blob could not be fetched
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("identifier rejected: {0}")]
    Decode(#[from] DecodeError),

    /// Remote-reported size is above what the backend may move
    #[error("blob is {size} bytes, over the {limit} byte limit")]
    Oversize { size: u64, limit: u64 },

    #[error("remote answered with status {0}")]
    BadStatus(u16),

    #[error("transport failure: {0}")]
    Transport(String),

    /// Remote procedure call returned an error
    #[error("remote call failed: {0}")]
    Rpc(String),

    /// The backend cannot address this kind of blob
    #[error("unsupported by backend: {0}")]
    Unsupported(String),

    #[error("writing fetched bytes failed: {0}")]
    Sink(#[from] std::io::Error),

    #[error("fetch cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::BadStatus(status.as_u16()),
            None => FetchError::Transport(e.to_string()),
        }
    }
}

/// A transport able to stream a remote blob into a sink
///
/// Implementations decode the identifier before building any request and
/// never buffer the whole blob. They do not retry. Cancellation is dropping
/// the returned future.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Stream the blob behind `identifier` into `sink`, returning bytes written
    async fn fetch(&self, identifier: &str, sink: Sink<'_>) -> Result<u64, FetchError>;
}

/// The two backends plus the size cutoff choosing between them
pub struct Fetchers {
    low_capacity: Arc<dyn BlobFetcher>,
    high_capacity: Arc<dyn BlobFetcher>,
    /// Files at or below this size use the low-capacity backend
    threshold: u64,
}

impl Fetchers {
    pub fn new(
        low_capacity: Arc<dyn BlobFetcher>,
        high_capacity: Arc<dyn BlobFetcher>,
        threshold: u64,
    ) -> Self {
        Fetchers {
            low_capacity,
            high_capacity,
            threshold,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Pick a backend for a declared size
    ///
    /// Unknown sizes go to the high-capacity backend, which has no cap.
    pub fn select(&self, size: Option<u64>) -> &Arc<dyn BlobFetcher> {
        match size {
            Some(size) if size <= self.threshold => &self.low_capacity,
            _ => &self.high_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl BlobFetcher for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn fetch(&self, _identifier: &str, _sink: Sink<'_>) -> Result<u64, FetchError> {
            Ok(0)
        }
    }

    #[test]
    fn test_select_by_threshold() {
        let fetchers = Fetchers::new(Arc::new(Named("http")), Arc::new(Named("mtproto")), 100);

        assert_eq!(fetchers.select(Some(0)).name(), "http");
        assert_eq!(fetchers.select(Some(100)).name(), "http");
        assert_eq!(fetchers.select(Some(101)).name(), "mtproto");
        assert_eq!(fetchers.select(None).name(), "mtproto");
        assert_eq!(fetchers.threshold(), 100);
    }
}
