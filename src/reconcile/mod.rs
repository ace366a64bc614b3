//! Disk/metadata reconciliation
//!
//! Keeps the persisted file list of every active order in line with what is
//! actually in the order's directory:
//! - files on disk without a record get a record (no identifier)
//! - records whose file changed on disk get the new checksum, identifier dropped
//! - records whose file is gone are deleted
//!
//! A full sweep also deletes directories under the orders root that belong
//! to no active order.
//!
//! Reconciling an order must not overlap a fetch batch writing into the same
//! directory. Both sides serialize on [`OrderLocks`].

mod locks;

pub use locks::{OrderGuard, OrderLocks};

use crate::error::{Error, Result};
use crate::orders::{folder_order_id, Order, OrderFileRecord, OrderId, OrderStore};
use crate::transfer::{file_checksum, Checksum, WorkerPool};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default number of orders reconciled concurrently
pub const DEFAULT_RECONCILE_WORKERS: usize = 10;

/// Default pause between background sweeps
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Corrections computed (and applied) for one order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub order_id: OrderId,
    /// New records for files found on disk
    pub added: Vec<OrderFileRecord>,
    /// Names of records whose file is gone
    pub removed: Vec<String>,
    /// Records whose file content changed
    pub updated: Vec<OrderFileRecord>,
    /// Repair calls that failed, with their error
    pub failed_repairs: Vec<String>,
}

impl ReconcileReport {
    /// Disk and metadata already agreed
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Outcome of a full sweep over all active orders
#[derive(Debug, Default)]
pub struct SweepReport {
    pub reports: Vec<ReconcileReport>,
    /// Orders that could not be reconciled at all
    pub failed_orders: Vec<(OrderId, String)>,
    /// Orphaned entries deleted from the orders root
    pub removed_orphans: Vec<PathBuf>,
}

/// Reconciles order directories against the metadata store
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn OrderStore>,
    orders_dir: PathBuf,
    pool: WorkerPool,
    locks: OrderLocks,
    interval: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn OrderStore>, orders_dir: impl Into<PathBuf>) -> Self {
        Reconciler {
            store,
            orders_dir: orders_dir.into(),
            pool: WorkerPool::new(DEFAULT_RECONCILE_WORKERS),
            locks: OrderLocks::default(),
            interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.pool = WorkerPool::new(workers);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Share per-order locks with fetch callers
    pub fn with_locks(mut self, locks: OrderLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &OrderLocks {
        &self.locks
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn order_dir(&self, order: &Order) -> PathBuf {
        self.orders_dir.join(&order.folder)
    }

    /// Reconcile a single order
    ///
    /// Loading failures abort with an error. Repair failures do not: each of
    /// the three repair calls is attempted and failures are collected in the
    /// report.
    pub async fn reconcile_one(&self, order_id: OrderId) -> Result<ReconcileReport> {
        let _guard = self.locks.lock(order_id).await;

        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(Error::OrderNotFound(order_id))?;
        let records = self.store.list_files(order_id).await?;
        let on_disk = scan_directory(&self.order_dir(&order)).await?;

        let mut report = diff(order_id, &records, &on_disk);
        if report.is_clean() {
            debug!("Order {} is consistent ({} files)", order_id, records.len());
            return Ok(report);
        }

        info!(
            "Order {}: {} added, {} removed, {} updated",
            order_id,
            report.added.len(),
            report.removed.len(),
            report.updated.len()
        );

        if !report.removed.is_empty() {
            if let Err(e) = self.store.remove_files(order_id, &report.removed).await {
                error!("Order {}: failed to remove file records: {}", order_id, e);
                report.failed_repairs.push(format!("remove: {e}"));
            }
        }
        if !report.added.is_empty() {
            if let Err(e) = self.store.add_files(order_id, &report.added).await {
                error!("Order {}: failed to add file records: {}", order_id, e);
                report.failed_repairs.push(format!("add: {e}"));
            }
        }
        if !report.updated.is_empty() {
            if let Err(e) = self.store.update_files(order_id, &report.updated).await {
                error!("Order {}: failed to update file records: {}", order_id, e);
                report.failed_repairs.push(format!("update: {e}"));
            }
        }

        Ok(report)
    }

    /// Reconcile every active order, then delete orphaned directories
    ///
    /// Orphan cleanup is skipped when `cancel` fired during the pass.
    pub async fn reconcile_all(&self, cancel: CancellationToken) -> Result<SweepReport> {
        let orders = self.store.active_orders().await?;
        info!("Reconciling {} active orders", orders.len());
        let ids: Vec<OrderId> = orders.iter().map(|o| o.id).collect();

        let this = self.clone();
        let mut rx = self.pool.run(
            ids,
            cancel.clone(),
            move |id| {
                let this = this.clone();
                async move { (id, this.reconcile_one(id).await) }
            },
            |id| (id, Err(Error::Internal("reconciliation cancelled".to_string()))),
        );

        let mut sweep = SweepReport::default();
        while let Some((id, result)) = rx.recv().await {
            match result {
                Ok(report) => sweep.reports.push(report),
                Err(e) => {
                    error!("Failed to reconcile order {}: {}", id, e);
                    sweep.failed_orders.push((id, e.to_string()));
                }
            }
        }

        if cancel.is_cancelled() {
            warn!("Reconciliation cancelled, skipping orphan cleanup");
            return Ok(sweep);
        }

        sweep.removed_orphans = self.remove_orphans().await?;
        Ok(sweep)
    }

    /// Folders owned by orders that are active right now
    async fn active_folders(&self) -> Result<HashSet<String>> {
        let orders = self.store.active_orders().await?;
        Ok(orders.into_iter().map(|o| o.folder).collect())
    }

    /// Delete entries of the orders root that no active order owns
    ///
    /// Ownership is read from the store after the pass, and again under the
    /// order's lock right before an entry is deleted.
    async fn remove_orphans(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.orders_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };

        let active = self.active_folders().await?;
        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !active.contains(&name) {
                let is_dir = entry.file_type().await?.is_dir();
                candidates.push((name, entry.path(), is_dir));
            }
        }

        for (name, path, is_dir) in candidates {
            let _guard = match folder_order_id(&name) {
                Some(id) => Some(self.locks.lock(id).await),
                None => None,
            };
            if self.active_folders().await?.contains(&name) {
                debug!("{:?} now belongs to an active order, keeping it", path);
                continue;
            }

            let result = if is_dir {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => {
                    info!("Removed orphaned order entry {:?}", path);
                    removed.push(path);
                }
                Err(e) => error!("Failed to remove orphaned entry {:?}: {}", path, e),
            }
        }

        Ok(removed)
    }

    /// Sweep periodically until cancelled
    ///
    /// The first sweep happens one interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Starting reconciler (interval: {}s)", self.interval.as_secs());
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.reconcile_all(cancel.clone()).await {
                Ok(sweep) => info!(
                    "Sweep finished: {} orders reconciled, {} failed, {} orphans removed",
                    sweep.reports.len(),
                    sweep.failed_orders.len(),
                    sweep.removed_orphans.len()
                ),
                Err(e) => error!("Sweep failed: {}", e),
            }
        }

        info!("Reconciler stopped");
    }
}

/// Checksums of the regular files directly inside `dir`
async fn scan_directory(dir: &Path) -> Result<HashMap<String, Checksum>> {
    let mut files = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match file_checksum(&entry.path()).await {
            Ok(checksum) => {
                files.insert(name, checksum);
            }
            // Deleted between listing and reading
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{:?} vanished during scan", entry.path())
            }
            Err(e) => {
                return Err(Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to read {}: {}", entry.path().display(), e),
                )))
            }
        }
    }

    Ok(files)
}

/// Compare persisted records with the directory contents
fn diff(
    order_id: OrderId,
    records: &[OrderFileRecord],
    on_disk: &HashMap<String, Checksum>,
) -> ReconcileReport {
    let known: HashMap<&str, &OrderFileRecord> =
        records.iter().map(|r| (r.name.as_str(), r)).collect();

    let mut added: Vec<OrderFileRecord> = on_disk
        .iter()
        .filter(|(name, _)| !known.contains_key(name.as_str()))
        .map(|(name, &checksum)| OrderFileRecord {
            name: name.clone(),
            checksum,
            identifier: None,
        })
        .collect();

    let mut updated = Vec::new();
    let mut removed = Vec::new();
    for record in records {
        match on_disk.get(&record.name) {
            Some(&checksum) if checksum != record.checksum => updated.push(OrderFileRecord {
                name: record.name.clone(),
                checksum,
                identifier: None,
            }),
            Some(_) => {}
            None => removed.push(record.name.clone()),
        }
    }

    added.sort_by(|a, b| a.name.cmp(&b.name));
    updated.sort_by(|a, b| a.name.cmp(&b.name));
    removed.sort();

    ReconcileReport {
        order_id,
        added,
        removed,
        updated,
        failed_repairs: Vec::new(),
    }
}
