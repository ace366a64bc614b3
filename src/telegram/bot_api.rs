//! Bot API HTTP backend
//!
//! Resolves an identifier with `getFile`, then streams the file body from
//! the file endpoint. The Bot API refuses anything over its download cap,
//! so oversize files fail before any bytes are written.

use crate::config::TelegramConfig;
use crate::error::{Error, Result};
use crate::fileid;
use crate::transfer::{BlobFetcher, FetchError, Sink};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Envelope of every Bot API answer
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// `getFile` result
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct RemoteFile {
    pub file_size: Option<u64>,
    pub file_path: Option<String>,
}

/// Parse a `getFile` answer body
pub fn parse_get_file(body: &[u8]) -> std::result::Result<RemoteFile, FetchError> {
    let response: ApiResponse<RemoteFile> =
        serde_json::from_slice(body).map_err(|e| FetchError::Transport(e.to_string()))?;

    if !response.ok {
        return Err(FetchError::Rpc(
            response
                .description
                .unwrap_or_else(|| "getFile failed".to_string()),
        ));
    }

    response
        .result
        .ok_or_else(|| FetchError::Rpc("getFile returned no result".to_string()))
}

/// Low-capacity backend over the Bot API
pub struct BotApiFetcher {
    http: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
    /// Largest file the Bot API will serve
    max_size: u64,
}

impl BotApiFetcher {
    pub fn new(config: &TelegramConfig, max_size: u64) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::TelegramClient(format!("Failed to build HTTP client: {}", e)))?;

        Ok(BotApiFetcher {
            http,
            base_url: config.bot_api_url.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
            timeout,
            max_size,
        })
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.base_url, self.token, file_path)
    }

    /// Resolve an identifier to its size and download path
    pub async fn get_file(&self, identifier: &str) -> std::result::Result<RemoteFile, FetchError> {
        let response = self
            .http
            .get(self.method_url("getFile"))
            .query(&[("file_id", identifier)])
            .timeout(self.timeout)
            .send()
            .await?;

        // Failed calls still carry a JSON envelope with the reason
        let body = response.bytes().await?;
        parse_get_file(&body)
    }
}

#[async_trait]
impl BlobFetcher for BotApiFetcher {
    fn name(&self) -> &'static str {
        "bot-api"
    }

    async fn fetch(&self, identifier: &str, sink: Sink<'_>) -> std::result::Result<u64, FetchError> {
        let locator = fileid::decode(identifier)?;
        let file = self.get_file(identifier).await?;

        if let Some(size) = file.file_size {
            if size > self.max_size {
                return Err(FetchError::Oversize {
                    size,
                    limit: self.max_size,
                });
            }
        }

        let path = file
            .file_path
            .ok_or_else(|| FetchError::Rpc("getFile returned no file path".to_string()))?;
        debug!("Downloading {} {} via Bot API", locator.file_type, path);

        let response = self.http.get(self.file_url(&path)).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::BadStatus(response.status().as_u16()));
        }

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > self.max_size {
                return Err(FetchError::Oversize {
                    size: written,
                    limit: self.max_size,
                });
            }
            sink.write_all(&chunk).await?;
        }

        Ok(written)
    }
}
