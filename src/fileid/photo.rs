//! Photo size source variants
//!
//! Image-like identifiers say which size variant of which object they refer
//! to: a legacy secret-addressed photo, a thumbnail of another file, a chat
//! avatar, or a sticker set cover.

use super::reader::Reader;
use super::{DecodeError, FileType};

/// Wire codes of photo size sources
mod code {
    pub const LEGACY: u32 = 0;
    pub const THUMBNAIL: u32 = 1;
    pub const DIALOG_PHOTO_SMALL: u32 = 2;
    pub const DIALOG_PHOTO_BIG: u32 = 3;
    pub const STICKER_SET_THUMBNAIL: u32 = 4;
    pub const FULL_LEGACY: u32 = 5;
    pub const DIALOG_PHOTO_SMALL_LEGACY: u32 = 6;
    pub const DIALOG_PHOTO_BIG_LEGACY: u32 = 7;
    pub const STICKER_SET_THUMBNAIL_LEGACY: u32 = 8;
    pub const STICKER_SET_THUMBNAIL_VERSION: u32 = 9;
}

/// Sub-versions below this carry a legacy volume id
const VOLUME_ID_BEFORE: u8 = 32;

/// Sub-versions from this one on carry an explicit source code
const SOURCE_CODE_SINCE: u8 = 22;

/// Which avatar size a dialog photo source refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogPhotoSize {
    Small,
    Big,
}

/// Where within a larger object an image size variant lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoSizeSource {
    /// Secret-addressed photo (legacy and full-legacy encodings)
    Legacy { secret: i64 },
    /// Thumbnail of another file
    Thumbnail {
        file_type: FileType,
        thumbnail_type: char,
    },
    /// Chat or user avatar
    DialogPhoto {
        size: DialogPhotoSize,
        dialog_id: i64,
        dialog_access_hash: i64,
    },
    /// Sticker set cover, optionally versioned
    StickerSetThumbnail {
        set_id: i64,
        access_hash: i64,
        version: Option<i32>,
    },
}

impl PhotoSizeSource {
    /// Thumbnail size code to request, if this source names one
    pub fn thumbnail_type(&self) -> Option<char> {
        match self {
            PhotoSizeSource::Thumbnail { thumbnail_type, .. } => Some(*thumbnail_type),
            PhotoSizeSource::Legacy { .. }
            | PhotoSizeSource::DialogPhoto { .. }
            | PhotoSizeSource::StickerSetThumbnail { .. } => None,
        }
    }
}

/// Photo-specific tail of a locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoInfo {
    pub source: PhotoSizeSource,
    /// Legacy volume id (sub-versions before 32)
    pub volume_id: Option<i64>,
    /// Legacy local id (full-legacy sources and sub-versions 22..32)
    pub local_id: Option<i32>,
}

impl PhotoInfo {
    pub(crate) fn read(r: &mut Reader<'_>, sub_version: u8) -> Result<Self, DecodeError> {
        let volume_id = if sub_version < VOLUME_ID_BEFORE {
            Some(r.i64("volume id")?)
        } else {
            None
        };

        let source_code = if sub_version >= SOURCE_CODE_SINCE {
            r.u32("photo size source")?
        } else {
            code::LEGACY
        };

        let source = match source_code {
            code::LEGACY | code::FULL_LEGACY => PhotoSizeSource::Legacy {
                secret: r.i64("photo secret")?,
            },
            code::THUMBNAIL => {
                let file_type = FileType::try_from(r.i32("thumbnail file type")?)?;
                let raw = r.take(4, "thumbnail type")?;
                PhotoSizeSource::Thumbnail {
                    file_type,
                    thumbnail_type: char::from(raw[0]),
                }
            }
            code::DIALOG_PHOTO_SMALL
            | code::DIALOG_PHOTO_SMALL_LEGACY
            | code::DIALOG_PHOTO_BIG
            | code::DIALOG_PHOTO_BIG_LEGACY => {
                let size = match source_code {
                    code::DIALOG_PHOTO_SMALL | code::DIALOG_PHOTO_SMALL_LEGACY => {
                        DialogPhotoSize::Small
                    }
                    _ => DialogPhotoSize::Big,
                };
                PhotoSizeSource::DialogPhoto {
                    size,
                    dialog_id: r.i64("dialog id")?,
                    dialog_access_hash: r.i64("dialog access hash")?,
                }
            }
            code::STICKER_SET_THUMBNAIL
            | code::STICKER_SET_THUMBNAIL_LEGACY
            | code::STICKER_SET_THUMBNAIL_VERSION => {
                let set_id = r.i64("sticker set id")?;
                let access_hash = r.i64("sticker set access hash")?;
                let version = if source_code == code::STICKER_SET_THUMBNAIL_VERSION {
                    Some(r.i32("sticker set version")?)
                } else {
                    None
                };
                PhotoSizeSource::StickerSetThumbnail {
                    set_id,
                    access_hash,
                    version,
                }
            }
            other => return Err(DecodeError::UnsupportedPhotoSource(other)),
        };

        let local_id = if source_code == code::FULL_LEGACY
            || (SOURCE_CODE_SINCE..VOLUME_ID_BEFORE).contains(&sub_version)
        {
            Some(r.i32("local id")?)
        } else {
            None
        };

        Ok(PhotoInfo {
            source,
            volume_id,
            local_id,
        })
    }
}
