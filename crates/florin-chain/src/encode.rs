//! Deterministic byte serialization.
//!
//! Internal format used for hashing, hex round-trips in the RPC surface
//! (`submitblock`, `getblocktemplate` transaction data) and nothing else.
//! Little-endian fixed-width integers, u32 length prefixes for vectors.

use thiserror::Error;

/// Errors while decoding a serialized structure.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before the structure was complete.
    #[error("Unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    /// A declared length exceeds sane bounds.
    #[error("Oversized element: {0} bytes")]
    Oversized(usize),

    /// Trailing bytes after a complete structure.
    #[error("Trailing bytes after decode")]
    TrailingBytes,
}

/// Upper bound on any single declared vector length, to keep a corrupt
/// length prefix from driving a huge allocation.
const MAX_DECODE_LEN: usize = 8_000_000;

/// Cursor over a byte slice.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Error unless the reader is fully consumed.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes)
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > MAX_DECODE_LEN {
            return Err(DecodeError::Oversized(len));
        }
        let end = self
            .pos
            .checked_add(len)
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        if end > self.data.len() {
            return Err(DecodeError::UnexpectedEof(self.pos));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_hash(&mut self) -> Result<[u8; 32], DecodeError> {
        let bytes = self.read_bytes(32)?;
        Ok(bytes.try_into().unwrap())
    }

    /// Read a u32 length prefix followed by that many bytes.
    pub fn read_vec(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u32()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }
}

/// Append a u32 length prefix and the bytes themselves.
pub fn write_vec(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ints() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x01020304u32.to_le_bytes());
        buf.extend_from_slice(&(-5i64).to_le_bytes());

        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_u32().unwrap(), 0x01020304);
        assert_eq!(reader.read_i64().unwrap(), -5);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_vec_round_trip() {
        let mut buf = Vec::new();
        write_vec(&mut buf, b"florin");
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_vec().unwrap(), b"florin");
    }

    #[test]
    fn test_eof() {
        let mut reader = ByteReader::new(&[1, 2]);
        assert_eq!(reader.read_u32(), Err(DecodeError::UnexpectedEof(0)));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut reader = ByteReader::new(&[1, 2, 3, 4, 5]);
        reader.read_u32().unwrap();
        assert_eq!(reader.finish(), Err(DecodeError::TrailingBytes));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        let mut reader = ByteReader::new(&buf);
        assert!(matches!(reader.read_vec(), Err(DecodeError::Oversized(_))));
    }
}
