//! Configuration management for printdesk

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bot API download cap: 20 MiB
pub const DEFAULT_HTTP_MAX_SIZE: u64 = 20 * 1024 * 1024;

/// MTProto download part size: 512 KiB
pub const DEFAULT_PART_SIZE: i32 = 512 * 1024;

/// Default Bot API endpoint
pub const DEFAULT_BOT_API_URL: &str = "https://api.telegram.org";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Telegram credentials and transport settings
    pub telegram: TelegramConfig,

    /// Download pipeline settings
    pub fetch: FetchConfig,

    /// Background reconciliation settings
    pub reconcile: ReconcileConfig,

    /// On-disk locations
    pub storage: StorageConfig,
}

/// Telegram configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather
    pub bot_token: String,

    /// Telegram API ID (get from my.telegram.org)
    pub api_id: i32,

    /// Telegram API hash
    pub api_hash: String,

    /// MTProto session file path
    pub session_file: PathBuf,

    /// Bot API base URL
    pub bot_api_url: String,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,

    /// MTProto download part size in bytes
    pub part_size: i32,
}

/// Fetch pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent downloads per batch
    pub workers: usize,

    /// Files up to this size go through the Bot API
    pub size_threshold: u64,

    /// Largest file the Bot API will serve
    pub http_max_size: u64,
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Maximum orders reconciled concurrently
    pub workers: usize,

    /// Seconds between background sweeps
    pub interval_secs: u64,

    /// Hours a closed order keeps its directory
    pub closed_grace_hours: i64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root holding one directory per order
    pub orders_dir: PathBuf,

    /// sled database path
    pub database_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("printdesk");

        Config {
            telegram: TelegramConfig {
                session_file: data_dir.join("printdesk.session"),
                ..TelegramConfig::default()
            },
            fetch: FetchConfig::default(),
            reconcile: ReconcileConfig::default(),
            storage: StorageConfig {
                orders_dir: data_dir.join("orders"),
                database_path: data_dir.join("db"),
            },
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        TelegramConfig {
            bot_token: String::new(),
            api_id: 0,
            api_hash: String::new(),
            session_file: PathBuf::from("printdesk.session"),
            bot_api_url: DEFAULT_BOT_API_URL.to_string(),
            request_timeout_secs: 10,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            workers: crate::transfer::DEFAULT_FETCH_WORKERS,
            size_threshold: DEFAULT_HTTP_MAX_SIZE,
            http_max_size: DEFAULT_HTTP_MAX_SIZE,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            workers: crate::reconcile::DEFAULT_RECONCILE_WORKERS,
            interval_secs: crate::reconcile::DEFAULT_RECONCILE_INTERVAL.as_secs(),
            closed_grace_hours: 24,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn closed_grace(&self) -> chrono::Duration {
        chrono::Duration::hours(self.closed_grace_hours)
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("PRINTDESK_BOT_TOKEN") {
            let token = token.trim().to_string();
            if !token.is_empty() {
                self.telegram.bot_token = token;
            }
        }

        if let Ok(api_id) = std::env::var("TELEGRAM_APP_ID") {
            if let Ok(id) = api_id.trim().parse::<i32>() {
                self.telegram.api_id = id;
            }
        }

        if let Ok(api_hash) = std::env::var("TELEGRAM_APP_HASH") {
            let hash = api_hash.trim().to_string();
            if !hash.is_empty() {
                self.telegram.api_hash = hash;
            }
        }

        if let Ok(dir) = std::env::var("PRINTDESK_ORDERS_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.storage.orders_dir = PathBuf::from(dir);
            }
        }

        if let Ok(workers) = std::env::var("PRINTDESK_FETCH_WORKERS") {
            if let Ok(n) = workers.trim().parse::<usize>() {
                self.fetch.workers = n;
            }
        }

        if let Ok(threshold) = std::env::var("PRINTDESK_SIZE_THRESHOLD") {
            if let Ok(size) = threshold.trim().parse::<u64>() {
                self.fetch.size_threshold = size;
            }
        }
    }

    /// Create a new config from environment variables only (for init without existing config)
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();

        if config.telegram.bot_token.is_empty() {
            return Err(Error::InvalidConfig(
                "PRINTDESK_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(Error::InvalidConfig("Bot token is required".to_string()));
        }

        if self.fetch.workers == 0 {
            return Err(Error::InvalidConfig(
                "Fetch workers must be greater than 0".to_string(),
            ));
        }

        if self.reconcile.workers == 0 {
            return Err(Error::InvalidConfig(
                "Reconcile workers must be greater than 0".to_string(),
            ));
        }

        if self.fetch.size_threshold > self.fetch.http_max_size {
            return Err(Error::InvalidConfig(format!(
                "Size threshold {} exceeds the Bot API limit of {} bytes",
                self.fetch.size_threshold, self.fetch.http_max_size
            )));
        }

        // upload.getFile requires limits that divide 1 MiB and are multiples of 4 KiB
        let part = self.telegram.part_size;
        if part <= 0 || part % 4096 != 0 || (1024 * 1024) % part != 0 {
            return Err(Error::InvalidConfig(format!(
                "Invalid MTProto part size: {}",
                part
            )));
        }

        Ok(())
    }

    /// MTProto backend is usable
    pub fn has_mtproto_credentials(&self) -> bool {
        self.telegram.api_id != 0 && !self.telegram.api_hash.is_empty()
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.storage.orders_dir)?;
        if let Some(parent) = self.storage.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.telegram.session_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
