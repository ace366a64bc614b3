//! Whole-file content checksums
//!
//! XXH64 (seed 0) over the complete byte stream. Not a security measure,
//! only a cheap way to notice that a file on disk changed.

use std::hash::Hasher;
use std::path::Path;
use tokio::io::AsyncReadExt;
use twox_hash::XxHash64;

/// Content checksum of a stored file
pub type Checksum = u64;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Checksum an in-memory buffer
pub fn checksum_bytes(data: &[u8]) -> Checksum {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

/// Stream a file through the checksum
pub async fn file_checksum(path: &Path) -> std::io::Result<Checksum> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = XxHash64::with_seed(0);
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.write(&buf[..n]);
    }

    Ok(hasher.finish())
}
