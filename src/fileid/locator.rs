//! Identifier to locator decoding

use super::photo::PhotoInfo;
use super::reader::Reader;
use super::rle::unwrap_identifier;
use super::{DecodeError, FileType, FILE_REFERENCE_FLAG, PERSISTENT_ID_VERSION, WEB_LOCATION_FLAG};

/// Where a remote blob physically lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// Record format version (last byte of the record)
    pub version: u8,
    /// Sub-version, only meaningful when `version == 4`
    pub sub_version: u8,
    /// Blob kind with flag bits cleared
    pub file_type: FileType,
    /// Datacenter holding the blob
    pub dc_id: i32,
    /// Opaque file reference, when the record carries one
    pub file_reference: Option<Vec<u8>>,
    /// Remote address of the blob
    pub location: RemoteLocation,
}

/// Address branch of a locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLocation {
    /// Blob proxied from a web URL
    Web { url: String, access_hash: i64 },
    /// Blob stored by numeric id
    Direct {
        id: i64,
        access_hash: i64,
        /// Present for image-like blob types
        photo: Option<PhotoInfo>,
    },
}

impl Locator {
    /// Numeric id of a directly stored blob
    pub fn id(&self) -> Option<i64> {
        match &self.location {
            RemoteLocation::Direct { id, .. } => Some(*id),
            RemoteLocation::Web { .. } => None,
        }
    }

    pub fn access_hash(&self) -> i64 {
        match &self.location {
            RemoteLocation::Direct { access_hash, .. } | RemoteLocation::Web { access_hash, .. } => {
                *access_hash
            }
        }
    }

    pub fn photo(&self) -> Option<&PhotoInfo> {
        match &self.location {
            RemoteLocation::Direct { photo, .. } => photo.as_ref(),
            RemoteLocation::Web { .. } => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.location {
            RemoteLocation::Web { url, .. } => Some(url),
            RemoteLocation::Direct { .. } => None,
        }
    }
}

/// Decode an identifier into a locator
///
/// Fails with [`DecodeError::MalformedBase64`] when the outer encoding is
/// broken, [`DecodeError::Truncated`] when any field runs past the end of
/// the record and [`DecodeError::UnsupportedType`] for unknown blob kinds.
/// A partial locator is never returned.
pub fn decode(identifier: &str) -> Result<Locator, DecodeError> {
    let data = unwrap_identifier(identifier)?;

    let (&version, rest) = data
        .split_last()
        .ok_or(DecodeError::Truncated { field: "version" })?;
    let (sub_version, body) = if version == PERSISTENT_ID_VERSION {
        let (&sub_version, body) = rest
            .split_last()
            .ok_or(DecodeError::Truncated { field: "sub-version" })?;
        (sub_version, body)
    } else {
        (0, rest)
    };

    let mut r = Reader::new(body);

    let type_word = r.i32("type")?;
    let has_web_location = type_word & WEB_LOCATION_FLAG != 0;
    let has_file_reference = type_word & FILE_REFERENCE_FLAG != 0;
    let file_type = FileType::try_from(type_word & !(WEB_LOCATION_FLAG | FILE_REFERENCE_FLAG))?;

    let dc_id = r.i32("datacenter id")?;

    let file_reference = if has_file_reference {
        Some(r.tl_bytes("file reference")?.to_vec())
    } else {
        None
    };

    let location = if has_web_location {
        let url = String::from_utf8_lossy(r.tl_bytes("url")?).into_owned();
        let access_hash = r.i64("access hash")?;
        RemoteLocation::Web { url, access_hash }
    } else {
        let id = r.i64("id")?;
        let access_hash = r.i64("access hash")?;
        let photo = if file_type.is_photo_like() {
            Some(PhotoInfo::read(&mut r, sub_version)?)
        } else {
            None
        };
        RemoteLocation::Direct {
            id,
            access_hash,
            photo,
        }
    };

    Ok(Locator {
        version,
        sub_version,
        file_type,
        dc_id,
        file_reference,
        location,
    })
}

#[cfg(test)]
mod tests {
    use super::super::rle::encode;
    use super::super::{DialogPhotoSize, PhotoSizeSource};
    use super::*;

    /// Builds raw records the way the server lays them out
    #[derive(Default)]
    struct Record(Vec<u8>);

    impl Record {
        fn i32(mut self, v: i32) -> Self {
            self.0.extend(v.to_le_bytes());
            self
        }

        fn i64(mut self, v: i64) -> Self {
            self.0.extend(v.to_le_bytes());
            self
        }

        fn tl(mut self, bytes: &[u8]) -> Self {
            let prefix = if bytes.len() < 254 {
                self.0.push(bytes.len() as u8);
                1
            } else {
                self.0.push(254);
                self.0.extend(&(bytes.len() as u32).to_le_bytes()[..3]);
                4
            };
            self.0.extend(bytes);
            let padding = (4 - (prefix + bytes.len()) % 4) % 4;
            self.0.extend(std::iter::repeat(0).take(padding));
            self
        }

        fn v4(mut self, sub_version: u8) -> Vec<u8> {
            self.0.extend([sub_version, PERSISTENT_ID_VERSION]);
            self.0
        }

        fn v2(mut self) -> Vec<u8> {
            self.0.push(2);
            self.0
        }
    }

    fn document_record() -> Vec<u8> {
        Record::default()
            .i32(FileType::Document as i32 | FILE_REFERENCE_FLAG)
            .i32(4)
            .tl(&[0x02, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
            .i64(5_413_498_133_461_246_302)
            .i64(-6_312_020_211_224_115_722)
            .v4(47)
    }

    #[test]
    fn test_decode_document() {
        let locator = decode(&encode(&document_record())).unwrap();

        assert_eq!(locator.version, 4);
        assert_eq!(locator.sub_version, 47);
        assert_eq!(locator.file_type, FileType::Document);
        assert_eq!(locator.dc_id, 4);
        assert_eq!(
            locator.file_reference.as_deref(),
            Some(&[0x02, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55][..])
        );
        assert_eq!(locator.id(), Some(5_413_498_133_461_246_302));
        assert_eq!(locator.access_hash(), -6_312_020_211_224_115_722);
        assert!(locator.photo().is_none());
        assert!(locator.url().is_none());
    }

    #[test]
    fn test_decode_photo_with_thumbnail_source() {
        let record = Record::default()
            .i32(FileType::Photo as i32 | FILE_REFERENCE_FLAG)
            .i32(2)
            .tl(b"ref-bytes-12")
            .i64(100)
            .i64(200)
            .i32(1)
            .i32(FileType::Photo as i32)
            .i32(i32::from(b'y'))
            .v4(54);

        let locator = decode(&encode(&record)).unwrap();
        assert_eq!(locator.file_type, FileType::Photo);
        assert_eq!(locator.dc_id, 2);
        let photo = locator.photo().unwrap();
        assert_eq!(photo.volume_id, None);
        assert_eq!(photo.local_id, None);
        assert_eq!(photo.source.thumbnail_type(), Some('y'));
    }

    #[test]
    fn test_decode_profile_photo_dialog_source() {
        let record = Record::default()
            .i32(FileType::ProfilePhoto as i32)
            .i32(1)
            .i64(300)
            .i64(400)
            .i32(3)
            .i64(-100_123)
            .i64(77)
            .v4(40);

        let locator = decode(&encode(&record)).unwrap();
        assert_eq!(locator.file_reference, None);
        assert_eq!(
            locator.photo().unwrap().source,
            PhotoSizeSource::DialogPhoto {
                size: DialogPhotoSize::Big,
                dialog_id: -100_123,
                dialog_access_hash: 77,
            }
        );
    }

    #[test]
    fn test_decode_web_location_has_no_photo_info() {
        let record = Record::default()
            .i32(FileType::Photo as i32 | WEB_LOCATION_FLAG)
            .i32(1)
            .tl(b"https://example.com/cat.jpg")
            .i64(9)
            .v4(47);

        let locator = decode(&encode(&record)).unwrap();
        assert_eq!(locator.url(), Some("https://example.com/cat.jpg"));
        assert_eq!(locator.access_hash(), 9);
        assert_eq!(locator.id(), None);
        assert!(locator.photo().is_none());
    }

    #[test]
    fn test_decode_legacy_version_has_no_sub_version() {
        let record = Record::default()
            .i32(FileType::Voice as i32)
            .i32(5)
            .i64(1)
            .i64(2)
            .v2();

        let locator = decode(&encode(&record)).unwrap();
        assert_eq!(locator.version, 2);
        assert_eq!(locator.sub_version, 0);
        assert_eq!(locator.file_type, FileType::Voice);
        assert_eq!(locator.id(), Some(1));
    }

    #[test]
    fn test_decode_long_file_reference() {
        let reference: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8 + 1).collect();
        let record = Record::default()
            .i32(FileType::Video as i32 | FILE_REFERENCE_FLAG)
            .i32(3)
            .tl(&reference)
            .i64(11)
            .i64(12)
            .v4(47);

        let locator = decode(&encode(&record)).unwrap();
        assert_eq!(locator.file_reference.as_deref(), Some(&reference[..]));
        assert_eq!(locator.id(), Some(11));
        assert_eq!(locator.access_hash(), 12);
    }

    #[test]
    fn test_decode_rejects_unsupported_type() {
        let record = Record::default().i32(99).i32(1).i64(1).i64(1).v4(47);
        assert_eq!(
            decode(&encode(&record)).unwrap_err(),
            DecodeError::UnsupportedType(99)
        );
    }

    #[test]
    fn test_decode_rejects_malformed_base64() {
        assert!(matches!(
            decode("%%%").unwrap_err(),
            DecodeError::MalformedBase64(_)
        ));
    }

    #[test]
    fn test_decode_empty_identifier() {
        assert_eq!(
            decode("").unwrap_err(),
            DecodeError::Truncated { field: "version" }
        );
    }

    #[test]
    fn test_decode_truncated_at_field_boundaries() {
        let full = document_record();
        let body = &full[..full.len() - 2];

        // type word | dc id | file reference (12 bytes) | id | access hash
        let cases = [
            (0, "type"),
            (2, "type"),
            (4, "datacenter id"),
            (8, "file reference"),
            (14, "file reference"),
            (20, "id"),
            (27, "id"),
            (28, "access hash"),
            (35, "access hash"),
        ];

        for (cut, field) in cases {
            let mut truncated = body[..cut].to_vec();
            truncated.extend([47, PERSISTENT_ID_VERSION]);
            assert_eq!(
                decode(&encode(&truncated)).unwrap_err(),
                DecodeError::Truncated { field },
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_decode_truncated_photo_tail() {
        let record = Record::default()
            .i32(FileType::Photo as i32)
            .i32(2)
            .i64(100)
            .i64(200)
            .i32(0)
            .v4(47);

        assert_eq!(
            decode(&encode(&record)).unwrap_err(),
            DecodeError::Truncated {
                field: "photo secret"
            }
        );
    }
}
