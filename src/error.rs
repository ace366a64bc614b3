//! Error types for printdesk

use crate::fileid::DecodeError;
use crate::transfer::FetchError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// Identifier could not be decoded into a locator
    #[error("Identifier decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Remote blob could not be fetched
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata database failure
    #[error("Store error: {0}")]
    Store(#[from] sled::Error),

    /// Record (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be read or written
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration was read but is not usable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Order {0} not found")]
    OrderNotFound(u64),

    /// Closed order is past its grace window and can no longer be re-opened
    #[error("Order {0} was closed too long ago to be restored")]
    RestorationExpired(u64),

    /// Telegram client setup or authorization failure
    #[error("Telegram client error: {0}")]
    TelegramClient(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
