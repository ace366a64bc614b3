//! MTProto backend
//!
//! Downloads by calling `upload.getFile` in fixed-size parts against the
//! datacenter named by the decoded locator. No size cap applies.

use crate::config::TelegramConfig;
use crate::error::{Error, Result};
use crate::fileid::{self, FileType, Locator, RemoteLocation};
use crate::transfer::{BlobFetcher, FetchError, Sink};
use async_trait::async_trait;
use grammers_client::Client;
use grammers_mtsender::{InvocationError, SenderPool, SenderPoolHandle};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Thumbnail size requested for full photos
const FULL_PHOTO_THUMB: &str = "y";

/// Build the remote file location for a decoded locator
pub fn input_location(
    locator: &Locator,
) -> std::result::Result<tl::enums::InputFileLocation, FetchError> {
    let RemoteLocation::Direct {
        id,
        access_hash,
        photo,
    } = &locator.location
    else {
        return Err(FetchError::Unsupported(
            "web-location files cannot be downloaded over MTProto".to_string(),
        ));
    };
    let file_reference = locator.file_reference.clone().unwrap_or_default();

    match locator.file_type {
        FileType::Photo => {
            let thumb_size = photo
                .as_ref()
                .and_then(|p| p.source.thumbnail_type())
                .map(String::from)
                .unwrap_or_else(|| FULL_PHOTO_THUMB.to_string());

            Ok(tl::types::InputPhotoFileLocation {
                id: *id,
                access_hash: *access_hash,
                file_reference,
                thumb_size,
            }
            .into())
        }
        FileType::Document
        | FileType::Voice
        | FileType::Video
        | FileType::Audio
        | FileType::Sticker
        | FileType::Animation
        | FileType::VideoNote => Ok(tl::types::InputDocumentFileLocation {
            id: *id,
            access_hash: *access_hash,
            file_reference,
            thumb_size: String::new(),
        }
        .into()),
        other => Err(FetchError::Unsupported(format!(
            "unsupported file type: {}",
            other
        ))),
    }
}

/// Server-side refusals are RPC errors; everything else is transport trouble
fn invocation_error(e: InvocationError) -> FetchError {
    match e {
        InvocationError::Rpc(rpc) => FetchError::Rpc(rpc.to_string()),
        other => FetchError::Transport(other.to_string()),
    }
}

/// Signed-in client plus the handle that stops its sender pool
struct Connection {
    client: Client,
    pool: SenderPoolHandle,
}

/// High-capacity backend over MTProto, signed in as the bot
pub struct MtprotoFetcher {
    api_id: i32,
    api_hash: String,
    bot_token: String,
    session_file: PathBuf,
    part_size: i32,
    connection: OnceCell<Connection>,
}

impl MtprotoFetcher {
    pub fn new(config: &TelegramConfig) -> Self {
        MtprotoFetcher {
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            bot_token: config.bot_token.clone(),
            session_file: config.session_file.clone(),
            part_size: config.part_size,
            connection: OnceCell::new(),
        }
    }

    pub fn part_size(&self) -> i32 {
        self.part_size
    }

    /// Connected, signed-in client; connects on first use
    pub async fn client(&self) -> Result<&Client> {
        let connection = self.connection.get_or_try_init(|| self.connect()).await?;
        Ok(&connection.client)
    }

    async fn connect(&self) -> Result<Connection> {
        if self.api_id == 0 || self.api_hash.is_empty() {
            return Err(Error::TelegramClient(
                "API ID and hash are required. Get them from my.telegram.org".to_string(),
            ));
        }

        info!("Connecting to Telegram...");
        let session = SqliteSession::open(&self.session_file).map_err(|e| {
            Error::TelegramClient(format!(
                "Failed to open session {}: {}",
                self.session_file.display(),
                e
            ))
        })?;

        let pool = SenderPool::new(Arc::new(session), self.api_id);
        let client = Client::new(&pool);
        let SenderPool { runner, handle, .. } = pool;
        tokio::spawn(runner.run());
        let connection = Connection {
            client,
            pool: handle,
        };

        // The pool task lives until quit; stop it if sign-in fails
        let authorize = async {
            let authorized = connection
                .client
                .is_authorized()
                .await
                .map_err(|e| Error::TelegramClient(format!("Connection failed: {}", e)))?;
            if !authorized {
                connection
                    .client
                    .bot_sign_in(&self.bot_token, &self.api_hash)
                    .await
                    .map_err(|e| Error::TelegramClient(format!("Bot sign-in failed: {}", e)))?;
                info!("Signed in as bot, session saved");
            }
            Ok::<_, Error>(())
        };
        if let Err(e) = authorize.await {
            connection.pool.quit();
            return Err(e);
        }

        info!("Connected to Telegram");
        Ok(connection)
    }
}

impl Drop for MtprotoFetcher {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get() {
            connection.pool.quit();
        }
    }
}

#[async_trait]
impl BlobFetcher for MtprotoFetcher {
    fn name(&self) -> &'static str {
        "mtproto"
    }

    async fn fetch(&self, identifier: &str, sink: Sink<'_>) -> std::result::Result<u64, FetchError> {
        let locator = fileid::decode(identifier)?;
        let location = input_location(&locator)?;
        let client = self
            .client()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        debug!(
            "Downloading {} from dc {} in {} byte parts",
            locator.file_type, locator.dc_id, self.part_size
        );

        let mut offset: i64 = 0;
        loop {
            let request = tl::functions::upload::GetFile {
                precise: false,
                cdn_supported: false,
                location: location.clone(),
                offset,
                limit: self.part_size,
            };

            let part = match client
                .invoke_in_dc(locator.dc_id, &request)
                .await
                .map_err(invocation_error)?
            {
                tl::enums::upload::File::File(file) => file.bytes,
                tl::enums::upload::File::CdnRedirect(_) => {
                    return Err(FetchError::Unsupported("CDN redirect".to_string()))
                }
            };

            sink.write_all(&part).await?;
            offset += part.len() as i64;

            if part.len() < self.part_size as usize {
                break;
            }
        }

        Ok(offset as u64)
    }
}
