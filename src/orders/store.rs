//! sled-backed order metadata store
//!
//! Two trees:
//! - `orders`: order id (big-endian) -> JSON `Order`
//! - `order_files`: order id (big-endian) ++ file name -> JSON `OrderFileRecord`

use super::{order_folder_name, Order, OrderFileRecord, OrderId, OrderStatus, OrderStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use tracing::debug;

const ORDERS_TREE: &str = "orders";
const FILES_TREE: &str = "order_files";

/// Order store on an embedded sled database
pub struct SledOrderStore {
    db: sled::Db,
    orders: sled::Tree,
    files: sled::Tree,
    /// How long closed orders still count as active
    closed_grace: Duration,
}

impl SledOrderStore {
    /// Open or create a store at `path`
    pub fn open<P: AsRef<Path>>(path: P, closed_grace: Duration) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db, closed_grace)
    }

    /// Store that disappears when dropped (for testing)
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, Duration::hours(24))
    }

    fn from_db(db: sled::Db, closed_grace: Duration) -> Result<Self> {
        let orders = db.open_tree(ORDERS_TREE)?;
        let files = db.open_tree(FILES_TREE)?;
        Ok(SledOrderStore {
            db,
            orders,
            files,
            closed_grace,
        })
    }

    /// Create an order, assigning its id and folder name
    pub fn create_order(&self, client_name: &str, created_at: DateTime<Utc>) -> Result<Order> {
        let id = self.db.generate_id()? + 1;
        let order = Order {
            id,
            client_name: client_name.to_string(),
            status: OrderStatus::Active,
            created_at,
            closed_at: None,
            folder: order_folder_name(client_name, created_at, id),
        };
        self.put_order(&order)?;
        debug!("Created order {} in folder {}", id, order.folder);
        Ok(order)
    }

    pub fn put_order(&self, order: &Order) -> Result<()> {
        self.orders
            .insert(order.id.to_be_bytes(), serde_json::to_vec(order)?)?;
        Ok(())
    }

    pub fn close_order(&self, id: OrderId, closed_at: DateTime<Utc>) -> Result<()> {
        let mut order = self.get_order(id)?.ok_or(Error::OrderNotFound(id))?;
        order.status = OrderStatus::Closed;
        order.closed_at = Some(closed_at);
        self.put_order(&order)
    }

    /// Re-open a closed order while it is still inside the grace window
    pub fn restore_order(&self, id: OrderId, now: DateTime<Utc>) -> Result<Order> {
        let mut order = self.get_order(id)?.ok_or(Error::OrderNotFound(id))?;
        if let Some(closed_at) = order.closed_at {
            if now - closed_at >= self.closed_grace {
                return Err(Error::RestorationExpired(id));
            }
        }

        order.status = OrderStatus::Active;
        order.closed_at = None;
        self.put_order(&order)?;
        debug!("Restored order {}", id);
        Ok(order)
    }

    fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        match self.orders.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn file_key(id: OrderId, name: &str) -> Vec<u8> {
        let mut key = id.to_be_bytes().to_vec();
        key.extend_from_slice(name.as_bytes());
        key
    }

    fn put_files(&self, id: OrderId, files: &[OrderFileRecord]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for file in files {
            batch.insert(Self::file_key(id, &file.name), serde_json::to_vec(file)?);
        }
        self.files.apply_batch(batch)?;
        Ok(())
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for SledOrderStore {
    async fn active_orders(&self) -> Result<Vec<Order>> {
        let now = Utc::now();
        let mut active = Vec::new();
        for entry in self.orders.iter() {
            let (_, bytes) = entry?;
            let order: Order = serde_json::from_slice(&bytes)?;
            if order.is_active_at(now, self.closed_grace) {
                active.push(order);
            }
        }
        Ok(active)
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        self.get_order(id)
    }

    async fn list_files(&self, id: OrderId) -> Result<Vec<OrderFileRecord>> {
        self.files
            .scan_prefix(id.to_be_bytes())
            .map(|entry| -> Result<OrderFileRecord> {
                let (_, bytes) = entry?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }

    async fn add_files(&self, id: OrderId, files: &[OrderFileRecord]) -> Result<()> {
        debug!("Adding {} file records to order {}", files.len(), id);
        self.put_files(id, files)
    }

    async fn remove_files(&self, id: OrderId, names: &[String]) -> Result<()> {
        debug!("Removing {} file records from order {}", names.len(), id);
        let mut batch = sled::Batch::default();
        for name in names {
            batch.remove(Self::file_key(id, name));
        }
        self.files.apply_batch(batch)?;
        Ok(())
    }

    async fn update_files(&self, id: OrderId, files: &[OrderFileRecord]) -> Result<()> {
        debug!("Updating {} file records of order {}", files.len(), id);
        self.put_files(id, files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, checksum: u64) -> OrderFileRecord {
        OrderFileRecord {
            name: name.to_string(),
            checksum,
            identifier: Some(format!("id-{name}")),
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch_order() {
        let store = SledOrderStore::temporary().unwrap();
        let order = store.create_order("Ann", Utc::now()).unwrap();

        assert!(order.id > 0);
        assert!(order.folder.starts_with("ann-"));
        assert_eq!(store.order(order.id).await.unwrap(), Some(order.clone()));
        assert_eq!(store.order(order.id + 100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_records_are_scoped_per_order() {
        let store = SledOrderStore::temporary().unwrap();
        let a = store.create_order("A", Utc::now()).unwrap();
        let b = store.create_order("B", Utc::now()).unwrap();

        store
            .add_files(a.id, &[record("one.stl", 1), record("two.stl", 2)])
            .await
            .unwrap();
        store.add_files(b.id, &[record("one.stl", 9)]).await.unwrap();

        let mut files = store.list_files(a.id).await.unwrap();
        files.sort_by(|x, y| x.name.cmp(&y.name));
        assert_eq!(files, vec![record("one.stl", 1), record("two.stl", 2)]);

        store
            .remove_files(a.id, &["one.stl".to_string()])
            .await
            .unwrap();
        assert_eq!(store.list_files(a.id).await.unwrap(), vec![record("two.stl", 2)]);
        assert_eq!(store.list_files(b.id).await.unwrap(), vec![record("one.stl", 9)]);
    }

    #[tokio::test]
    async fn test_update_replaces_record() {
        let store = SledOrderStore::temporary().unwrap();
        let order = store.create_order("C", Utc::now()).unwrap();
        store.add_files(order.id, &[record("x", 1)]).await.unwrap();

        let changed = OrderFileRecord {
            name: "x".to_string(),
            checksum: 2,
            identifier: None,
        };
        store.update_files(order.id, &[changed.clone()]).await.unwrap();
        assert_eq!(store.list_files(order.id).await.unwrap(), vec![changed]);
    }

    #[tokio::test]
    async fn test_active_orders_respects_grace() {
        let store = SledOrderStore::temporary().unwrap();
        let open = store.create_order("Open", Utc::now()).unwrap();
        let recent = store.create_order("Recent", Utc::now()).unwrap();
        let old = store.create_order("Old", Utc::now()).unwrap();

        store.close_order(recent.id, Utc::now() - Duration::hours(1)).unwrap();
        store.close_order(old.id, Utc::now() - Duration::hours(48)).unwrap();

        let mut ids: Vec<_> = store
            .active_orders()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![open.id, recent.id]);

        assert!(matches!(
            store.close_order(9999, Utc::now()),
            Err(Error::OrderNotFound(9999))
        ));
    }

    #[tokio::test]
    async fn test_restore_inside_grace_window() {
        let store = SledOrderStore::temporary().unwrap();
        let order = store.create_order("Gil", Utc::now()).unwrap();
        let now = Utc::now();
        store.close_order(order.id, now - Duration::hours(23)).unwrap();

        let restored = store.restore_order(order.id, now).unwrap();
        assert_eq!(restored.status, OrderStatus::Active);
        assert_eq!(restored.closed_at, None);
        assert_eq!(store.order(order.id).await.unwrap(), Some(restored));

        // Restoring an order that is already open changes nothing
        let again = store.restore_order(order.id, now).unwrap();
        assert_eq!(again.status, OrderStatus::Active);
    }

    #[tokio::test]
    async fn test_restore_after_grace_window_expires() {
        let store = SledOrderStore::temporary().unwrap();
        let order = store.create_order("Hal", Utc::now()).unwrap();
        let now = Utc::now();
        store.close_order(order.id, now - Duration::hours(24)).unwrap();

        assert!(matches!(
            store.restore_order(order.id, now),
            Err(Error::RestorationExpired(id)) if id == order.id
        ));
        let stored = store.order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Closed);
        assert!(store.active_orders().await.unwrap().is_empty());

        assert!(matches!(
            store.restore_order(9999, now),
            Err(Error::OrderNotFound(9999))
        ));
    }
}
