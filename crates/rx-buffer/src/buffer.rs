//! Fixed-Capacity Reassembly Buffer

use crate::error::BufferError;

/// Default buffer capacity in bytes
pub const DEFAULT_CAPACITY: usize = 1024;

/// Pre-allocated byte buffer reused across poll responses
///
/// Storage is allocated once in [`RxBuffer::new`]; `clear` and
/// `extend_from_slice` never reallocate.
pub struct RxBuffer {
    /// Pre-allocated storage
    storage: Box<[u8]>,
    /// Number of bytes currently filled
    len: usize,
}

impl RxBuffer {
    /// Create a new buffer with given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Create a buffer with default capacity (1024 bytes)
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Append bytes, failing without modification if capacity would be exceeded
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let end = self.len + bytes.len();
        if end > self.storage.len() {
            return Err(BufferError::Overflow {
                requested: end,
                capacity: self.storage.len(),
            });
        }
        self.storage[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// Filled part of the buffer
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// Number of filled bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes that can still be appended
    pub fn remaining_capacity(&self) -> usize {
        self.storage.len() - self.len
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.len = 0;
    }

    fn window(&self, offset: usize, width: usize) -> Result<&[u8], BufferError> {
        offset
            .checked_add(width)
            .filter(|&end| end <= self.len)
            .map(|end| &self.storage[offset..end])
            .ok_or(BufferError::OutOfBounds {
                offset,
                width,
                len: self.len,
            })
    }

    /// Read one byte
    pub fn read_u8(&self, offset: usize) -> Result<u8, BufferError> {
        Ok(self.window(offset, 1)?[0])
    }

    /// Read one signed byte
    pub fn read_i8(&self, offset: usize) -> Result<i8, BufferError> {
        Ok(self.read_u8(offset)? as i8)
    }

    /// Read a big-endian u16
    pub fn read_u16_be(&self, offset: usize) -> Result<u16, BufferError> {
        let b = self.window(offset, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian i16
    pub fn read_i16_be(&self, offset: usize) -> Result<i16, BufferError> {
        Ok(self.read_u16_be(offset)? as i16)
    }

    /// Read a big-endian 24-bit value
    pub fn read_u24_be(&self, offset: usize) -> Result<u32, BufferError> {
        let b = self.window(offset, 3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    /// Read a big-endian u32
    pub fn read_u32_be(&self, offset: usize) -> Result<u32, BufferError> {
        let b = self.window(offset, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a single bit of the byte at `offset` (bit 0 = LSB)
    pub fn read_bit(&self, offset: usize, bit: u8) -> Result<bool, BufferError> {
        Ok(self.read_u8(offset)? & (1 << (bit & 7)) != 0)
    }
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for RxBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxBuffer")
            .field("len", &self.len)
            .field("capacity", &self.storage.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extend_and_clear() {
        let mut buffer = RxBuffer::new(16);
        buffer.extend_from_slice(&[1, 2, 3]).unwrap();
        buffer.extend_from_slice(&[4, 5]).unwrap();
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5]);
        assert_eq!(buffer.remaining_capacity(), 11);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 16);
    }

    #[test]
    fn test_overflow_leaves_contents_untouched() {
        let mut buffer = RxBuffer::new(4);
        buffer.extend_from_slice(&[0xAA, 0xBB, 0xCC]).unwrap();

        let err = buffer.extend_from_slice(&[1, 2]).unwrap_err();
        assert_eq!(
            err,
            BufferError::Overflow {
                requested: 5,
                capacity: 4
            }
        );
        assert_eq!(buffer.as_slice(), &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_checked_reads() {
        let mut buffer = RxBuffer::new(8);
        buffer
            .extend_from_slice(&[0x12, 0x34, 0x56, 0x78, 0xFF])
            .unwrap();

        assert_eq!(buffer.read_u8(0).unwrap(), 0x12);
        assert_eq!(buffer.read_u16_be(0).unwrap(), 0x1234);
        assert_eq!(buffer.read_u24_be(1).unwrap(), 0x34_5678);
        assert_eq!(buffer.read_u32_be(0).unwrap(), 0x1234_5678);
        assert_eq!(buffer.read_i8(4).unwrap(), -1);
        assert_eq!(buffer.read_i16_be(3).unwrap(), 0x78FF);
        assert!(buffer.read_bit(4, 7).unwrap());
        assert!(!buffer.read_bit(0, 0).unwrap());
    }

    #[test]
    fn test_read_past_filled_length_fails() {
        let mut buffer = RxBuffer::new(8);
        buffer.extend_from_slice(&[0x01, 0x02]).unwrap();

        // Capacity is 8 but only 2 bytes are filled
        assert_eq!(
            buffer.read_u16_be(1),
            Err(BufferError::OutOfBounds {
                offset: 1,
                width: 2,
                len: 2
            })
        );
        assert!(buffer.read_u32_be(usize::MAX).is_err());
    }

    proptest! {
        #[test]
        fn prop_chunked_appends_concatenate(chunks in prop::collection::vec(
            prop::collection::vec(any::<u8>(), 0..8), 0..32)
        ) {
            let mut buffer = RxBuffer::new(256);
            let mut expected = Vec::new();
            for chunk in &chunks {
                buffer.extend_from_slice(chunk).unwrap();
                expected.extend_from_slice(chunk);
            }
            prop_assert_eq!(buffer.as_slice(), expected.as_slice());
        }
    }
}
