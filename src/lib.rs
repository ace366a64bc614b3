//! printdesk - order file handling for a print shop Telegram bot
//!
//! Decodes Telegram file identifiers, downloads order files through the Bot
//! API or MTProto depending on size, and keeps each order's directory in
//! line with the metadata store.

pub mod config;
pub mod error;
pub mod fileid;
pub mod orders;
pub mod reconcile;
pub mod telegram;
pub mod transfer;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::fileid::{decode, FileType, Locator};
    pub use crate::orders::{Order, OrderFileRecord, OrderId, OrderStore, SledOrderStore};
    pub use crate::reconcile::{OrderLocks, ReconcileReport, Reconciler, SweepReport};
    pub use crate::transfer::{BlobFetcher, FetchPipeline, FetchRequest, FetchResult, Fetchers};
}
