//! Growable byte buffer with bit-level read access.
//!
//! Bits are numbered MSB-first across the whole buffer, which is the order
//! RFC 6455 draws its frame diagrams in:
//!
//! ```text
//!  byte 0           byte 1
//!  0 1 2 3 4 5 6 7  8 9 10 11 12 13 14 15
//! +-+-+-+-+-------+-+--------------------+
//! |F|R|R|R| opcode|M|  payload len (7)   |
//! +-+-+-+-+-------+-+--------------------+
//! ```
//!
//! # Example
//!
//! ```
//! use sockwire::protocol::BitBuffer;
//!
//! let mut buf = BitBuffer::new();
//! buf.push(0x81);
//! buf.push(0x85);
//!
//! assert_eq!(buf.bit(0), Some(true)); // FIN
//! assert_eq!(buf.bits(4, 8), Some(0x1)); // opcode
//! assert_eq!(buf.bits(9, 16), Some(5)); // length indicator
//! ```

use bytes::BytesMut;

/// Append-only byte buffer backed by `BytesMut`.
#[derive(Debug, Default, Clone)]
pub struct BitBuffer {
    bytes: BytesMut,
}

impl BitBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            bytes: BytesMut::new(),
        }
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
        }
    }

    /// Append one byte.
    #[inline]
    pub fn push(&mut self, byte: u8) {
        self.bytes.extend_from_slice(&[byte]);
    }

    /// Append a slice of bytes.
    #[inline]
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Reserve room for at least `additional` more bytes.
    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.bytes.reserve(additional);
    }

    /// Number of bytes held.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drop all bytes, keeping the allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Byte at `index`.
    #[inline]
    pub fn byte(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Bit at the absolute position `bit_index` (MSB-first).
    #[inline]
    pub fn bit(&self, bit_index: usize) -> Option<bool> {
        self.bit_in(bit_index / 8, bit_index % 8)
    }

    /// Bit `bit` (0 = most significant) of the byte at `byte_index`.
    #[inline]
    pub fn bit_in(&self, byte_index: usize, bit: usize) -> Option<bool> {
        if bit > 7 {
            return None;
        }
        self.byte(byte_index).map(|b| (b >> (7 - bit)) & 1 == 1)
    }

    /// Bits `[start, end)` read as a big-endian unsigned integer.
    ///
    /// Returns `None` if the range is empty, wider than 64 bits, or runs past
    /// the end of the buffer.
    pub fn bits(&self, start: usize, end: usize) -> Option<u64> {
        if end <= start || end - start > 64 || end > self.bytes.len() * 8 {
            return None;
        }

        // Byte-aligned ranges are the common case for extended lengths.
        if start % 8 == 0 && end % 8 == 0 {
            return Some(
                self.bytes[start / 8..end / 8]
                    .iter()
                    .fold(0u64, |acc, &b| (acc << 8) | b as u64),
            );
        }

        let mut value = 0u64;
        for i in start..end {
            let bit = self.bit(i)?;
            value = (value << 1) | bit as u64;
        }
        Some(value)
    }

    /// Bytes `[start, end)`.
    #[inline]
    pub fn slice(&self, start: usize, end: usize) -> Option<&[u8]> {
        self.bytes.get(start..end)
    }

    /// Split off everything from `start` on (zero-copy), leaving `[0, start)`.
    ///
    /// # Panics
    ///
    /// Panics if `start > len()`.
    pub fn split_from(&mut self, start: usize) -> BytesMut {
        self.bytes.split_off(start)
    }

    /// Take all bytes out, leaving the buffer empty.
    pub fn take(&mut self) -> BytesMut {
        self.bytes.split()
    }

    /// View the whole buffer.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(bytes: &[u8]) -> BitBuffer {
        let mut buf = BitBuffer::new();
        buf.extend_from_slice(bytes);
        buf
    }

    #[test]
    fn test_bit_numbering_is_msb_first() {
        let buf = buffer(&[0b1000_0001, 0b0100_0000]);

        assert_eq!(buf.bit(0), Some(true));
        assert_eq!(buf.bit(1), Some(false));
        assert_eq!(buf.bit(7), Some(true));
        assert_eq!(buf.bit(8), Some(false));
        assert_eq!(buf.bit(9), Some(true));
        assert_eq!(buf.bit(16), None);
    }

    #[test]
    fn test_bit_in() {
        let buf = buffer(&[0x00, 0x80]);

        assert_eq!(buf.bit_in(1, 0), Some(true));
        assert_eq!(buf.bit_in(1, 1), Some(false));
        assert_eq!(buf.bit_in(0, 8), None);
        assert_eq!(buf.bit_in(2, 0), None);
    }

    #[test]
    fn test_bits_unaligned() {
        // FIN | Text, MASK | 5
        let buf = buffer(&[0x81, 0x85]);

        assert_eq!(buf.bits(0, 1), Some(1));
        assert_eq!(buf.bits(1, 4), Some(0));
        assert_eq!(buf.bits(4, 8), Some(1));
        assert_eq!(buf.bits(8, 9), Some(1));
        assert_eq!(buf.bits(9, 16), Some(5));
    }

    #[test]
    fn test_bits_aligned_big_endian() {
        let buf = buffer(&[0x81, 0xFE, 0x01, 0x2C]);
        assert_eq!(buf.bits(16, 32), Some(300));

        let buf = buffer(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf.bits(0, 64), Some(0x0102_0304_0506_0708));
    }

    #[test]
    fn test_bits_out_of_range() {
        let buf = buffer(&[0xFF; 10]);

        assert_eq!(buf.bits(0, 0), None);
        assert_eq!(buf.bits(8, 4), None);
        assert_eq!(buf.bits(0, 65), None);
        assert_eq!(buf.bits(72, 88), None);
    }

    #[test]
    fn test_slice_and_split() {
        let mut buf = buffer(b"headpayload");

        assert_eq!(buf.slice(0, 4), Some(&b"head"[..]));
        assert_eq!(buf.slice(4, 40), None);

        let tail = buf.split_from(4);
        assert_eq!(&tail[..], b"payload");
        assert_eq!(buf.as_slice(), b"head");

        let all = buf.take();
        assert_eq!(&all[..], b"head");
        assert!(buf.is_empty());
    }
}
