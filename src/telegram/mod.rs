//! Telegram backends
//!
//! Two transports implement [`BlobFetcher`](crate::transfer::BlobFetcher):
//! - Bot API over HTTP, capped at 20 MiB per file
//! - MTProto, signed in as the bot, for anything larger

mod bot_api;
mod mtproto;

pub use bot_api::{parse_get_file, BotApiFetcher, RemoteFile};
pub use mtproto::{input_location, MtprotoFetcher};

use crate::config::Config;
use crate::error::Result;
use crate::transfer::Fetchers;
use std::sync::Arc;

/// Build both backends and the size dispatch from configuration
pub fn fetchers(config: &Config) -> Result<Fetchers> {
    let bot_api = BotApiFetcher::new(&config.telegram, config.fetch.http_max_size)?;
    let mtproto = MtprotoFetcher::new(&config.telegram);

    Ok(Fetchers::new(
        Arc::new(bot_api),
        Arc::new(mtproto),
        config.fetch.size_threshold,
    ))
}
