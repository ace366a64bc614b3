//! Remote file identifier decoding
//!
//! Telegram hands out opaque file identifiers: URL-safe base64 over a
//! zero-run-compressed binary record. This module turns such an identifier
//! into a [`Locator`] describing where the blob lives (datacenter, numeric id,
//! access hash, file reference) and, for photos, which size variant is meant.
//!
//! Decoding is pure and allocation-local; nothing here touches the network.

mod locator;
mod photo;
mod reader;
mod rle;

pub use locator::{decode, Locator, RemoteLocation};
pub use photo::{DialogPhotoSize, PhotoInfo, PhotoSizeSource};
pub use rle::{compress_zero_runs, encode, expand_zero_runs};

use thiserror::Error;

/// Flag bit in the type word: the record carries a web location (URL)
pub const WEB_LOCATION_FLAG: i32 = 1 << 24;

/// Flag bit in the type word: the record carries a file reference
pub const FILE_REFERENCE_FLAG: i32 = 1 << 25;

/// Version byte after which a sub-version byte precedes it
pub const PERSISTENT_ID_VERSION: u8 = 4;

/// Errors produced while decoding an identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("identifier is not valid URL-safe base64: {0}")]
    MalformedBase64(String),

    #[error("identifier truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("unsupported blob type {0}")]
    UnsupportedType(i32),

    #[error("unsupported photo size source {0}")]
    UnsupportedPhotoSource(u32),

    /// A TL length prefix byte above the extended-length sentinel
    #[error("invalid TL length prefix {0}")]
    InvalidLength(u8),
}

/// Kind of remote blob, numbered as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum FileType {
    Thumbnail = 0,
    ProfilePhoto = 1,
    Photo = 2,
    Voice = 3,
    Video = 4,
    Document = 5,
    Encrypted = 6,
    Temp = 7,
    Sticker = 8,
    Audio = 9,
    Animation = 10,
    EncryptedThumbnail = 11,
    Wallpaper = 12,
    VideoNote = 13,
    SecureRaw = 14,
    Secure = 15,
    Background = 16,
    DocumentAsFile = 17,
}

impl FileType {
    /// Image-like types carry photo size information after the id
    pub fn is_photo_like(self) -> bool {
        self <= FileType::Photo
    }

    pub fn name(self) -> &'static str {
        match self {
            FileType::Thumbnail => "thumbnail",
            FileType::ProfilePhoto => "profile_photo",
            FileType::Photo => "photo",
            FileType::Voice => "voice",
            FileType::Video => "video",
            FileType::Document => "document",
            FileType::Encrypted => "encrypted",
            FileType::Temp => "temp",
            FileType::Sticker => "sticker",
            FileType::Audio => "audio",
            FileType::Animation => "animation",
            FileType::EncryptedThumbnail => "encrypted_thumbnail",
            FileType::Wallpaper => "wallpaper",
            FileType::VideoNote => "video_note",
            FileType::SecureRaw => "secure_raw",
            FileType::Secure => "secure",
            FileType::Background => "background",
            FileType::DocumentAsFile => "document_as_file",
        }
    }
}

impl TryFrom<i32> for FileType {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let file_type = match value {
            0 => FileType::Thumbnail,
            1 => FileType::ProfilePhoto,
            2 => FileType::Photo,
            3 => FileType::Voice,
            4 => FileType::Video,
            5 => FileType::Document,
            6 => FileType::Encrypted,
            7 => FileType::Temp,
            8 => FileType::Sticker,
            9 => FileType::Audio,
            10 => FileType::Animation,
            11 => FileType::EncryptedThumbnail,
            12 => FileType::Wallpaper,
            13 => FileType::VideoNote,
            14 => FileType::SecureRaw,
            15 => FileType::Secure,
            16 => FileType::Background,
            17 => FileType::DocumentAsFile,
            other => return Err(DecodeError::UnsupportedType(other)),
        };
        Ok(file_type)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
