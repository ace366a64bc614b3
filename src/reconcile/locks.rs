//! Per-order mutual exclusion

use crate::orders::OrderId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<OrderId, Arc<Mutex<()>>>;

/// One async mutex per order, created on first use and dropped once unused
#[derive(Clone, Default)]
pub struct OrderLocks {
    locks: Arc<LockMap>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `order_id`
    pub async fn lock(&self, order_id: OrderId) -> OrderGuard {
        // Clone out of the map so the shard lock is not held across the await
        let mutex = self.locks.entry(order_id).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        OrderGuard {
            guard: Some(guard),
            order_id,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of orders currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one order; unlocks on drop
pub struct OrderGuard {
    guard: Option<OwnedMutexGuard<()>>,
    order_id: OrderId,
    locks: Arc<LockMap>,
}

impl OrderGuard {
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold their own clone, so a count of one means only the map is left.
        // The check runs under the shard lock that `lock` clones under.
        self.locks
            .remove_if(&self.order_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
