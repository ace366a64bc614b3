//! Order metadata
//!
//! Orders own one directory each under the orders root. The metadata store
//! records which files an order is supposed to contain, with their checksums
//! and, when they came from the chat, the remote identifier.

mod store;

pub use store::SledOrderStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Numeric order identifier
pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Active,
    Closed,
}

/// A print order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client_name: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Directory name under the orders root
    pub folder: String,
}

impl Order {
    /// Active orders, and closed ones still inside the grace window, keep their files
    pub fn is_active_at(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match (self.status, self.closed_at) {
            (OrderStatus::Active, _) => true,
            (OrderStatus::Closed, Some(closed_at)) => now - closed_at < grace,
            (OrderStatus::Closed, None) => false,
        }
    }
}

/// Persisted metadata for one file of an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFileRecord {
    pub name: String,
    pub checksum: u64,
    /// Remote identifier, unset once the local copy diverged from it
    pub identifier: Option<String>,
}

/// Metadata store collaborator
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Orders whose directories must be kept and reconciled
    async fn active_orders(&self) -> Result<Vec<Order>>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn list_files(&self, id: OrderId) -> Result<Vec<OrderFileRecord>>;

    async fn add_files(&self, id: OrderId, files: &[OrderFileRecord]) -> Result<()>;

    async fn remove_files(&self, id: OrderId, names: &[String]) -> Result<()>;

    async fn update_files(&self, id: OrderId, files: &[OrderFileRecord]) -> Result<()>;
}

/// Directory name for a new order: `<client>-<yyyy-mm-dd>-<id>`, slugified
pub fn order_folder_name(client_name: &str, created_at: DateTime<Utc>, id: OrderId) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    let re = NON_WORD.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));

    let raw = format!("{}-{}-{}", client_name, created_at.format("%Y-%m-%d"), id);
    re.replace_all(&raw.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Order id at the end of a folder name built by [`order_folder_name`]
pub fn folder_order_id(folder: &str) -> Option<OrderId> {
    folder.rsplit('-').next()?.parse().ok()
}
