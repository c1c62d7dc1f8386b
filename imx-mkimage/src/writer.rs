//! Bounded little-endian writer over a preallocated header buffer

use crate::error::{MkImageError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Cursor that appends fields into a fixed buffer
///
/// Every write checks the remaining capacity, so a sizing mistake shows up
/// as [`MkImageError::HeaderOverflow`] instead of a corrupted header.
#[derive(Debug)]
pub struct HeaderWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> HeaderWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current write position
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&mut [u8]> {
        if len > self.remaining() {
            return Err(MkImageError::HeaderOverflow {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&mut self.buf[start..start + len])
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.take(1)?[0] = value;
        Ok(())
    }

    pub fn put_u16(&mut self, value: u16) -> Result<()> {
        LittleEndian::write_u16(self.take(2)?, value);
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<()> {
        LittleEndian::write_u32(self.take(4)?, value);
        Ok(())
    }

    pub fn put_u64(&mut self, value: u64) -> Result<()> {
        LittleEndian::write_u64(self.take(8)?, value);
        Ok(())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.take(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Move forward to `pos`, zero-filling the skipped bytes
    pub fn pad_to(&mut self, pos: usize) -> Result<()> {
        if pos < self.pos {
            return Err(MkImageError::invalid_container_data(format!(
                "Cannot pad backwards from {} to {}",
                self.pos, pos
            )));
        }
        self.take(pos - self.pos)?.fill(0);
        Ok(())
    }
}
