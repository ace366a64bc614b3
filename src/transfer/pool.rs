//! Bounded worker pool
//!
//! Fans a batch of jobs out over at most `size` concurrent tasks and fans
//! their outputs back in on one channel. Jobs that have not started when the
//! cancellation token fires are not run; they are handed to a `skipped`
//! callback so every item still produces exactly one output.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Counting-semaphore worker pool
#[derive(Clone)]
pub struct WorkerPool {
    /// Maximum concurrent jobs
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool running at most `size` jobs at once (minimum 1)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        WorkerPool {
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of jobs currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Run `job` over every item
    ///
    /// Outputs arrive in completion order. The receiver closes once every
    /// item has produced its output.
    pub fn run<I, T, F, Fut, S>(
        &self,
        items: Vec<I>,
        cancel: CancellationToken,
        job: F,
        skipped: S,
    ) -> mpsc::Receiver<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        S: Fn(I) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        let permits = self.permits.clone();
        let job = Arc::new(job);

        tokio::spawn(async move {
            for item in items {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = permits.clone().acquire_owned() => permit.ok(),
                };

                let Some(permit) = permit else {
                    // Receiver may already be gone; nothing else to do then
                    let _ = tx.send(skipped(item)).await;
                    continue;
                };

                let tx = tx.clone();
                let job = job.clone();
                tokio::spawn(async move {
                    let output = job(item).await;
                    drop(permit);
                    if tx.send(output).await.is_err() {
                        debug!("Worker pool output dropped, receiver closed");
                    }
                });
            }
        });

        rx
    }
}
