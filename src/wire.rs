//! Wire cursor for information-element handling
//!
//! This module contains a bounds-checked cursor over an owned byte buffer,
//! used by the information-element codecs for both reading and writing.
//! Every access advances the cursor and fails with a buffer error instead
//! of reading or writing out of bounds.

use crate::{Result, StaError};

/// Maximum size of an encoded information element body.
pub const IE_MAX_LEN: usize = 255;

/// Read cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct IeReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> IeReader<'a> {
    /// Create a reader over a slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Get remaining unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Check whether the cursor is exhausted.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(StaError::BufferEmpty);
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    /// Read a single signed byte.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read an exact number of bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(StaError::BufferEmpty);
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Peek at the next byte without advancing.
    pub fn peek_u8(&self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(StaError::BufferEmpty);
        }
        Ok(self.data[self.pos])
    }

    /// Skip bytes without reading them.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        if self.remaining() < count {
            return Err(StaError::BufferEmpty);
        }
        self.pos += count;
        Ok(())
    }
}

/// Write cursor over an owned, capacity-bounded buffer.
#[derive(Debug, Clone)]
pub struct IeWriter {
    data: Vec<u8>,
    capacity: usize,
}

impl IeWriter {
    /// Create a writer with the given capacity limit.
    pub fn new(capacity: usize) -> Self {
        let capacity = std::cmp::min(capacity, IE_MAX_LEN);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remaining writable space.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        if self.remaining() < 1 {
            return Err(StaError::BufferFull);
        }
        self.data.push(value);
        Ok(())
    }

    /// Write a single signed byte.
    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.write_u8(value as u8)
    }

    /// Write a byte slice.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.remaining() < bytes.len() {
            return Err(StaError::BufferFull);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Overwrite a previously written byte, used to patch a length field.
    pub fn patch_u8(&mut self, pos: usize, value: u8) -> Result<()> {
        if pos >= self.data.len() {
            return Err(StaError::InvalidParameter(format!(
                "patch position {} beyond written length {}",
                pos,
                self.data.len()
            )));
        }
        self.data[pos] = value;
        Ok(())
    }

    /// Consume the writer, returning the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Borrow the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader() {
        let data = [0x01, 0x02, 0x03, 0xff];
        let mut reader = IeReader::new(&data);

        assert_eq!(reader.remaining(), 4);
        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.peek_u8().unwrap(), 0x02);
        assert_eq!(reader.read_bytes(2).unwrap(), &[0x02, 0x03]);
        assert_eq!(reader.read_i8().unwrap(), -1);
        assert!(reader.is_empty());
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_reader_skip() {
        let data = [1, 2, 3];
        let mut reader = IeReader::new(&data);
        reader.skip(2).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 3);
        assert!(reader.skip(1).is_err());
    }

    #[test]
    fn test_writer() {
        let mut writer = IeWriter::new(4);

        writer.write_u8(0xaa).unwrap();
        writer.write_bytes(&[0xbb, 0xcc]).unwrap();
        writer.write_i8(-20).unwrap();
        assert!(writer.write_u8(0).is_err());

        let bytes = writer.into_bytes();
        assert_eq!(bytes, vec![0xaa, 0xbb, 0xcc, 0xec]);
    }

    #[test]
    fn test_writer_patch() {
        let mut writer = IeWriter::new(8);
        writer.write_u8(0).unwrap();
        writer.write_u8(1).unwrap();
        writer.patch_u8(0, 7).unwrap();
        assert_eq!(writer.as_slice(), &[7, 1]);
        assert!(writer.patch_u8(5, 0).is_err());
    }
}
