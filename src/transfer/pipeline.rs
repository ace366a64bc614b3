//! Concurrent batch fetching into an order directory

use super::checksum::{file_checksum, Checksum};
use super::fetcher::{FetchError, Fetchers};
use super::pool::WorkerPool;
use crate::orders::OrderFileRecord;
use futures::stream::{self, BoxStream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of concurrent fetches
pub const DEFAULT_FETCH_WORKERS: usize = 5;

/// One file to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Destination file name, a single path segment
    pub name: String,
    /// Remote file identifier
    pub identifier: String,
    /// Size declared by the sender, used to pick a backend
    pub size: Option<u64>,
}

impl FetchRequest {
    pub fn new(name: impl Into<String>, identifier: impl Into<String>, size: Option<u64>) -> Self {
        FetchRequest {
            name: name.into(),
            identifier: identifier.into(),
            size,
        }
    }
}

/// Why a single file in a batch failed
#[derive(Debug, Error)]
pub enum FileError {
    #[error("invalid file name {0:?}")]
    InvalidName(String),

    /// Destination already present; fetches never overwrite
    #[error("file already exists: {0}")]
    FileExists(PathBuf),

    #[error("could not prepare destination: {0}")]
    PrepareDestination(std::io::Error),

    /// Download failed; `cleanup` is set when removing the partial file also failed
    #[error("download failed: {source}")]
    Download {
        source: FetchError,
        cleanup: Option<String>,
    },

    /// The file arrived and was kept, but could not be checksummed
    #[error("could not verify integrity: {0}")]
    Checksum(std::io::Error),

    /// Batch was cancelled before this file started
    #[error("cancelled before start")]
    Cancelled,
}

/// Coarse failure classes shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    AlreadyExists,
    Integrity,
    Destination,
    Download,
    Cancelled,
    Other,
}

impl FailureKind {
    pub fn describe(self) -> &'static str {
        match self {
            FailureKind::AlreadyExists => "file already exists",
            FailureKind::Integrity => "could not verify integrity",
            FailureKind::Destination => "could not prepare destination",
            FailureKind::Download => "download failed, try a smaller file",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Other => "something went wrong",
        }
    }
}

impl FileError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FileError::FileExists(_) => FailureKind::AlreadyExists,
            FileError::Checksum(_) => FailureKind::Integrity,
            FileError::InvalidName(_) | FileError::PrepareDestination(_) => FailureKind::Destination,
            FileError::Cancelled => FailureKind::Cancelled,
            FileError::Download { source, .. } => match source {
                FetchError::Cancelled => FailureKind::Cancelled,
                FetchError::Oversize { .. }
                | FetchError::BadStatus(_)
                | FetchError::Transport(_)
                | FetchError::Rpc(_)
                | FetchError::Sink(_) => FailureKind::Download,
                FetchError::Decode(_) | FetchError::Unsupported(_) => FailureKind::Other,
            },
        }
    }

    /// The bytes are on disk even though the file counts as failed
    pub fn keeps_file(&self) -> bool {
        matches!(self, FileError::Checksum(_))
    }
}

/// Outcome of one request
#[derive(Debug)]
pub struct FetchResult {
    pub name: String,
    pub identifier: String,
    /// Content checksum, present on success
    pub checksum: Option<Checksum>,
    /// 1-based position in completion order
    pub index: usize,
    /// Number of requests in the batch
    pub total: usize,
    pub error: Option<FileError>,
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Metadata record for a successfully fetched file
    pub fn record(&self) -> Option<OrderFileRecord> {
        match (self.checksum, &self.error) {
            (Some(checksum), None) => Some(OrderFileRecord {
                name: self.name.clone(),
                checksum,
                identifier: Some(self.identifier.clone()),
            }),
            _ => None,
        }
    }
}

/// Stream of per-file results; ends after the last one
pub type FetchStream = BoxStream<'static, FetchResult>;

struct Outcome {
    request: FetchRequest,
    result: Result<Checksum, FileError>,
}

/// Fetches batches of files with bounded parallelism
pub struct FetchPipeline {
    fetchers: Arc<Fetchers>,
    pool: WorkerPool,
}

impl FetchPipeline {
    pub fn new(fetchers: Fetchers, workers: usize) -> Self {
        FetchPipeline {
            fetchers: Arc::new(fetchers),
            pool: WorkerPool::new(workers),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Fetch every request into `dir`
    ///
    /// Yields exactly one result per request, in completion order, also
    /// when `cancel` fires mid-batch. Names must be unique within a batch.
    pub fn submit(
        &self,
        dir: impl Into<PathBuf>,
        requests: Vec<FetchRequest>,
        cancel: CancellationToken,
    ) -> FetchStream {
        let total = requests.len();
        if total == 0 {
            return stream::empty().boxed();
        }

        let dir = Arc::new(dir.into());
        info!("Fetching {} files into {:?}", total, dir);

        let fetchers = self.fetchers.clone();
        let job_cancel = cancel.clone();
        let rx = self.pool.run(
            requests,
            cancel,
            move |request: FetchRequest| {
                let fetchers = fetchers.clone();
                let dir = dir.clone();
                let cancel = job_cancel.clone();
                async move {
                    let result = fetch_one(&fetchers, &dir, &request, &cancel).await;
                    Outcome { request, result }
                }
            },
            |request| Outcome {
                request,
                result: Err(FileError::Cancelled),
            },
        );

        ReceiverStream::new(rx)
            .enumerate()
            .map(move |(i, outcome)| {
                let (checksum, error) = match outcome.result {
                    Ok(checksum) => (Some(checksum), None),
                    Err(e) => {
                        warn!("Fetching {} failed: {}", outcome.request.name, e);
                        (None, Some(e))
                    }
                };
                FetchResult {
                    name: outcome.request.name,
                    identifier: outcome.request.identifier,
                    checksum,
                    index: i + 1,
                    total,
                    error,
                }
            })
            .boxed()
    }
}

/// A name usable as one path segment inside the order directory
pub fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

async fn fetch_one(
    fetchers: &Fetchers,
    dir: &Path,
    request: &FetchRequest,
    cancel: &CancellationToken,
) -> Result<Checksum, FileError> {
    if !is_valid_file_name(&request.name) {
        return Err(FileError::InvalidName(request.name.clone()));
    }

    let path = dir.join(&request.name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(FileError::PrepareDestination)?;
    }

    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(FileError::FileExists(path));
        }
        Err(e) => return Err(FileError::PrepareDestination(e)),
    };

    let fetcher = fetchers.select(request.size);
    debug!("Fetching {} via {}", request.name, fetcher.name());

    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        res = async {
            let written = fetcher.fetch(&request.identifier, &mut file).await?;
            file.flush().await?;
            Ok::<u64, FetchError>(written)
        } => res,
    };
    drop(file);

    match fetched {
        Ok(written) => debug!("Fetched {} ({} bytes)", request.name, written),
        Err(source) => {
            let cleanup = match tokio::fs::remove_file(&path).await {
                Ok(()) => None,
                Err(e) => {
                    warn!("Failed to remove partial file {:?}: {}", path, e);
                    Some(e.to_string())
                }
            };
            return Err(FileError::Download { source, cleanup });
        }
    }

    file_checksum(&path).await.map_err(FileError::Checksum)
}

/// All results of one batch, for "N of M failed" style reporting
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<FetchResult>,
}

impl BatchReport {
    /// Drain a fetch stream
    pub async fn collect(mut stream: FetchStream) -> Self {
        let mut results = Vec::new();
        while let Some(result) = stream.next().await {
            results.push(result);
        }
        BatchReport { results }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FetchResult> {
        self.results.iter().filter(|r| !r.is_ok())
    }

    /// Records for every file that arrived intact
    pub fn records(&self) -> Vec<OrderFileRecord> {
        self.results.iter().filter_map(FetchResult::record).collect()
    }

    pub fn summary(&self) -> String {
        let failed = self.failures().count();
        if failed == 0 {
            format!("all {} files fetched", self.total())
        } else {
            format!("{} of {} files failed", failed, self.total())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::checksum::checksum_bytes;
    use crate::transfer::{BlobFetcher, Sink};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves payloads from memory; unknown identifiers fail with 404
    #[derive(Default)]
    struct MemoryFetcher {
        name: &'static str,
        blobs: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl MemoryFetcher {
        fn with(name: &'static str, blobs: &[(&str, &str)]) -> Self {
            MemoryFetcher {
                name,
                blobs: blobs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BlobFetcher for MemoryFetcher {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, identifier: &str, sink: Sink<'_>) -> Result<u64, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let blob = self.blobs.get(identifier).ok_or(FetchError::BadStatus(404))?;
            // Write in two halves so failures can leave partial files
            let (head, tail) = blob.split_at(blob.len() / 2);
            sink.write_all(head).await?;
            sink.write_all(tail).await?;
            Ok(blob.len() as u64)
        }
    }

    /// Writes a few bytes, then fails
    struct BrokenFetcher;

    #[async_trait]
    impl BlobFetcher for BrokenFetcher {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn fetch(&self, _identifier: &str, sink: Sink<'_>) -> Result<u64, FetchError> {
            sink.write_all(b"partial").await?;
            Err(FetchError::Transport("connection reset".to_string()))
        }
    }

    /// Writes the blob, then swaps the destination for a directory
    struct SwappingFetcher {
        destination: PathBuf,
    }

    #[async_trait]
    impl BlobFetcher for SwappingFetcher {
        fn name(&self) -> &'static str {
            "swapping"
        }

        async fn fetch(&self, _identifier: &str, sink: Sink<'_>) -> Result<u64, FetchError> {
            sink.write_all(b"layer data").await?;
            sink.flush().await?;
            std::fs::remove_file(&self.destination)?;
            std::fs::create_dir(&self.destination)?;
            Ok(10)
        }
    }

    fn pipeline(low: MemoryFetcher, high: MemoryFetcher, workers: usize) -> FetchPipeline {
        FetchPipeline::new(Fetchers::new(Arc::new(low), Arc::new(high), 10), workers)
    }

    #[tokio::test]
    async fn test_submit_fetches_and_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let low = MemoryFetcher::with("http", &[("small", "tiny")]);
        let high = MemoryFetcher::with("mtproto", &[("big", "a much bigger payload")]);
        let p = pipeline(low, high, 5);

        let report = BatchReport::collect(p.submit(
            dir.path(),
            vec![
                FetchRequest::new("a.stl", "small", Some(4)),
                FetchRequest::new("b.stl", "big", Some(21)),
            ],
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(report.total(), 2);
        assert_eq!(report.failures().count(), 0);
        assert_eq!(report.summary(), "all 2 files fetched");

        let mut indices: Vec<_> = report.results.iter().map(|r| (r.index, r.total)).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![(1, 2), (2, 2)]);

        let a = report.results.iter().find(|r| r.name == "a.stl").unwrap();
        assert_eq!(a.checksum, Some(checksum_bytes(b"tiny")));
        assert_eq!(std::fs::read(dir.path().join("a.stl")).unwrap(), b"tiny");

        let records = report.records();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .any(|r| r.name == "b.stl" && r.identifier.as_deref() == Some("big")));
    }

    #[tokio::test]
    async fn test_dispatch_by_declared_size() {
        let dir = tempfile::tempdir().unwrap();
        let low = Arc::new(MemoryFetcher::with("http", &[("x", "1"), ("y", "2"), ("z", "3")]));
        let high = Arc::new(MemoryFetcher::with("mtproto", &[("x", "1"), ("y", "2"), ("z", "3")]));
        let p = FetchPipeline::new(Fetchers::new(low.clone(), high.clone(), 10), 2);

        let report = BatchReport::collect(p.submit(
            dir.path(),
            vec![
                FetchRequest::new("1", "x", Some(10)),
                FetchRequest::new("2", "y", Some(11)),
                FetchRequest::new("3", "z", None),
            ],
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(report.failures().count(), 0);
        assert_eq!(low.calls.load(Ordering::SeqCst), 1);
        assert_eq!(high.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"original").unwrap();

        let low = MemoryFetcher::with("http", &[("id1", "new"), ("id2", "other")]);
        let p = pipeline(low, MemoryFetcher::default(), 5);

        let report = BatchReport::collect(p.submit(
            dir.path(),
            vec![
                FetchRequest::new("keep.txt", "id1", Some(3)),
                FetchRequest::new("fresh.txt", "id2", Some(5)),
            ],
            CancellationToken::new(),
        ))
        .await;

        let kept = report.results.iter().find(|r| r.name == "keep.txt").unwrap();
        assert!(matches!(kept.error, Some(FileError::FileExists(_))));
        assert_eq!(kept.error.as_ref().unwrap().kind(), FailureKind::AlreadyExists);
        assert_eq!(std::fs::read(dir.path().join("keep.txt")).unwrap(), b"original");

        let fresh = report.results.iter().find(|r| r.name == "fresh.txt").unwrap();
        assert!(fresh.is_ok());
        assert_eq!(report.summary(), "1 of 2 files failed");
    }

    #[tokio::test]
    async fn test_failed_download_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = FetchPipeline::new(
            Fetchers::new(Arc::new(BrokenFetcher), Arc::new(BrokenFetcher), 10),
            5,
        );

        let report = BatchReport::collect(p.submit(
            dir.path(),
            vec![FetchRequest::new("broken.bin", "whatever", Some(1))],
            CancellationToken::new(),
        ))
        .await;

        let result = &report.results[0];
        assert_eq!(result.checksum, None);
        match &result.error {
            Some(FileError::Download { source, cleanup }) => {
                assert!(matches!(source, FetchError::Transport(_)));
                assert!(cleanup.is_none());
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(result.error.as_ref().unwrap().kind(), FailureKind::Download);
        assert!(!dir.path().join("broken.bin").exists());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let low = MemoryFetcher::with("http", &[("ok1", "1"), ("ok2", "22")]);
        let p = pipeline(low, MemoryFetcher::default(), 2);

        let report = BatchReport::collect(p.submit(
            dir.path(),
            vec![
                FetchRequest::new("one", "ok1", Some(1)),
                FetchRequest::new("missing", "nope", Some(1)),
                FetchRequest::new("two", "ok2", Some(2)),
                FetchRequest::new("../escape", "ok1", Some(1)),
            ],
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(report.total(), 4);
        assert_eq!(report.failures().count(), 2);
        let escape = report.results.iter().find(|r| r.name == "../escape").unwrap();
        assert!(matches!(escape.error, Some(FileError::InvalidName(_))));
        assert!(dir.path().join("one").exists());
        assert!(dir.path().join("two").exists());
    }

    #[tokio::test]
    async fn test_cancellation_still_yields_every_result() {
        let dir = tempfile::tempdir().unwrap();
        let blobs: Vec<(String, Vec<u8>)> =
            (0..8).map(|i| (format!("id{i}"), vec![i as u8; 16])).collect();
        let mut low = MemoryFetcher::with("http", &[]);
        low.blobs = blobs.into_iter().collect();
        low.delay = Some(Duration::from_millis(200));
        let p = pipeline(low, MemoryFetcher::default(), 2);

        let cancel = CancellationToken::new();
        let requests = (0..8)
            .map(|i| FetchRequest::new(format!("f{i}"), format!("id{i}"), Some(4)))
            .collect();
        let stream = p.submit(dir.path(), requests, cancel.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let report = BatchReport::collect(stream).await;
        assert_eq!(report.total(), 8);
        assert!(report
            .failures()
            .all(|r| r.error.as_ref().unwrap().kind() == FailureKind::Cancelled));
        assert!(report.failures().count() >= 6);

        // Nothing half-written is left behind
        for result in report.failures() {
            assert!(!dir.path().join(&result.name).exists());
        }
    }

    #[tokio::test]
    async fn test_unreadable_download_is_an_integrity_failure() {
        let dir = tempfile::tempdir().unwrap();
        let swapping = Arc::new(SwappingFetcher {
            destination: dir.path().join("plate.gcode"),
        });
        let p = FetchPipeline::new(Fetchers::new(swapping.clone(), swapping, 10), 1);

        let report = BatchReport::collect(p.submit(
            dir.path(),
            vec![FetchRequest::new("plate.gcode", "any", Some(1))],
            CancellationToken::new(),
        ))
        .await;

        let result = &report.results[0];
        assert!(result.checksum.is_none());
        let error = result.error.as_ref().unwrap();
        assert!(matches!(error, FileError::Checksum(_)));
        assert_eq!(error.kind(), FailureKind::Integrity);
        assert!(error.keeps_file());
        // Not treated as a partial download
        assert!(dir.path().join("plate.gcode").exists());
        assert_eq!(report.summary(), "1 of 1 files failed");
    }

    #[tokio::test]
    async fn test_empty_submit_closes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(MemoryFetcher::default(), MemoryFetcher::default(), 5);
        let report =
            BatchReport::collect(p.submit(dir.path(), Vec::new(), CancellationToken::new())).await;
        assert_eq!(report.total(), 0);
    }

    #[tokio::test]
    async fn test_refetch_gives_same_checksum() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let payload = "unchanged remote blob";

        let mut checksums = Vec::new();
        for dir in [&first, &second] {
            let low = MemoryFetcher::with("http", &[("same", payload)]);
            let p = pipeline(low, MemoryFetcher::default(), 1);
            let report = BatchReport::collect(p.submit(
                dir.path(),
                vec![FetchRequest::new("part.stl", "same", Some(5))],
                CancellationToken::new(),
            ))
            .await;
            checksums.push(report.results[0].checksum);
        }

        assert_eq!(checksums[0], checksums[1]);
        assert_eq!(checksums[0], Some(checksum_bytes(payload.as_bytes())));
    }

    #[test]
    fn test_file_name_validation() {
        assert!(is_valid_file_name("model.stl"));
        assert!(is_valid_file_name("photo 2024-01-01.jpg"));
        assert!(!is_valid_file_name(""));
        assert!(!is_valid_file_name("."));
        assert!(!is_valid_file_name(".."));
        assert!(!is_valid_file_name("a/b"));
        assert!(!is_valid_file_name("a\\b"));
    }
}
