//! Little-endian cursor over a decoded identifier record

use super::DecodeError;

/// Sentinel length byte announcing a 3-byte extended length
const TL_LONG_LENGTH: u8 = 254;

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(DecodeError::Truncated { field })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    pub fn i32(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        self.array(field).map(i32::from_le_bytes)
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.array(field).map(u32::from_le_bytes)
    }

    pub fn i64(&mut self, field: &'static str) -> Result<i64, DecodeError> {
        self.array(field).map(i64::from_le_bytes)
    }

    /// Read a TL-serialized byte string
    ///
    /// Short strings use a single length byte; longer ones use the 254
    /// sentinel followed by a 3-byte length. The prefix and payload together
    /// are padded to a multiple of four bytes.
    pub fn tl_bytes(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let first = self.take(1, field)?[0];
        let (prefix, len) = match first {
            n if n < TL_LONG_LENGTH => (1, usize::from(n)),
            TL_LONG_LENGTH => {
                let b = self.take(3, field)?;
                (4, usize::from(b[0]) | usize::from(b[1]) << 8 | usize::from(b[2]) << 16)
            }
            n => return Err(DecodeError::InvalidLength(n)),
        };

        let payload = self.take(len, field)?;
        let padding = (4 - (prefix + len) % 4) % 4;
        self.take(padding, field)?;
        Ok(payload)
    }
}
