//! Base64 and zero run-length layers of the identifier wire form
//!
//! A zero byte on the wire is always followed by a count byte: `00 03`
//! stands for three zero bytes. A count of zero means a single zero byte.

use super::DecodeError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// Base64-decode an identifier and expand its zero runs
pub(crate) fn unwrap_identifier(identifier: &str) -> Result<Vec<u8>, DecodeError> {
    let packed = URL_SAFE_NO_PAD
        .decode(identifier.trim())
        .map_err(|e| DecodeError::MalformedBase64(e.to_string()))?;
    Ok(expand_zero_runs(&packed))
}

/// Expand zero runs in a packed buffer
///
/// A trailing zero byte without a count is copied through as one zero.
pub fn expand_zero_runs(packed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(packed.len() * 2);
    let mut i = 0;

    while i < packed.len() {
        if packed[i] == 0 && i + 1 < packed.len() {
            let count = usize::from(packed[i + 1]).max(1);
            out.resize(out.len() + count, 0);
            i += 2;
        } else {
            out.push(packed[i]);
            i += 1;
        }
    }

    out
}

/// Compress zero runs, the inverse of [`expand_zero_runs`]
///
/// Runs longer than 255 bytes are split across several `00 nn` pairs.
pub fn compress_zero_runs(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut run: u8 = 0;

    for &byte in data {
        if byte == 0 {
            if run == u8::MAX {
                out.extend_from_slice(&[0, run]);
                run = 0;
            }
            run += 1;
            continue;
        }
        if run > 0 {
            out.extend_from_slice(&[0, run]);
            run = 0;
        }
        out.push(byte);
    }
    if run > 0 {
        out.extend_from_slice(&[0, run]);
    }

    out
}

/// Build an identifier string from a raw record
pub fn encode(raw: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(compress_zero_runs(raw))
}
