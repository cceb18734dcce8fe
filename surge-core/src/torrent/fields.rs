//! Fixed-layout big-endian field access for tracker and peer wire buffers.
//!
//! Writing goes through `bytes::BufMut` directly; reading goes through
//! [`FieldReader`], which turns short buffers into `TorrentError::Truncated`
//! instead of the panics `bytes::Buf` would raise.

use bytes::Buf;

use super::TorrentError;

/// Sequential reader over a fixed-layout binary buffer.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    consumed: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, consumed: 0 }
    }

    fn ensure(&self, needed: usize) -> Result<(), TorrentError> {
        if self.buf.remaining() < needed {
            return Err(TorrentError::Truncated {
                needed: self.consumed + needed,
                available: self.consumed + self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, TorrentError> {
        self.ensure(1)?;
        self.consumed += 1;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, TorrentError> {
        self.ensure(2)?;
        self.consumed += 2;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, TorrentError> {
        self.ensure(4)?;
        self.consumed += 4;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64, TorrentError> {
        self.ensure(8)?;
        self.consumed += 8;
        Ok(self.buf.get_u64())
    }

    /// Reads exactly `len` bytes and advances past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], TorrentError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        self.consumed += len;
        Ok(head)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], TorrentError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Consumes the reader, returning every unread byte.
    pub fn rest(self) -> &'a [u8] {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;

    #[test]
    fn test_sequential_reads_follow_layout() {
        let mut buf = BytesMut::new();
        buf.put_u8(19);
        buf.put_u16(6881);
        buf.put_u32(0xDEAD_BEEF);
        buf.put_u64(0x0000_0417_2710_1980);
        buf.put_slice(b"tail");

        let mut reader = FieldReader::new(&buf);
        assert_eq!(reader.read_u8().unwrap(), 19);
        assert_eq!(reader.read_u16().unwrap(), 6881);
        assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_u64().unwrap(), 0x41727101980);
        assert_eq!(reader.remaining(), 4);
        assert_eq!(reader.rest(), b"tail");
    }

    #[test]
    fn test_short_buffer_reports_truncation() {
        let data = [0u8, 1, 2];
        let mut reader = FieldReader::new(&data);
        assert_eq!(reader.read_u16().unwrap(), 1);

        let err = reader.read_u32().unwrap_err();
        assert!(matches!(
            err,
            TorrentError::Truncated {
                needed: 6,
                available: 3
            }
        ));
    }

    #[test]
    fn test_read_array_and_bytes() {
        let data: Vec<u8> = (0..10).collect();
        let mut reader = FieldReader::new(&data);
        let head: [u8; 4] = reader.read_array().unwrap();
        assert_eq!(head, [0, 1, 2, 3]);
        assert_eq!(reader.read_bytes(3).unwrap(), &[4, 5, 6]);
        assert!(reader.read_bytes(4).is_err());
    }
}
