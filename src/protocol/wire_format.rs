//! Wire format constants, masking and header encoding.
//!
//! Implements the RFC 6455 §5.2 frame header:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! All multi-byte integers are Big Endian.

use super::opcode::FrameType;

/// Bit positions (MSB-first) within the first two header bytes.
pub mod bits {
    /// FIN flag.
    pub const FIN: usize = 0;
    /// RSV1 flag.
    pub const RSV1: usize = 1;
    /// RSV2 flag.
    pub const RSV2: usize = 2;
    /// RSV3 flag.
    pub const RSV3: usize = 3;
    /// Opcode, bits `[4, 8)`.
    pub const OPCODE: (usize, usize) = (4, 8);
    /// MASK flag.
    pub const MASK: usize = 8;
    /// 7-bit payload length indicator, bits `[9, 16)`.
    pub const LENGTH: (usize, usize) = (9, 16);
}

/// FIN bit in byte 0.
pub const FIN_BIT: u8 = 0b1000_0000;

/// MASK bit in byte 1.
pub const MASK_BIT: u8 = 0b1000_0000;

/// Largest length that fits the 7-bit indicator literally.
pub const MAX_LITERAL_LENGTH: u64 = 125;

/// Length indicator announcing a 16-bit extended length.
pub const LENGTH_16_INDICATOR: u8 = 126;

/// Length indicator announcing a 64-bit extended length.
pub const LENGTH_64_INDICATOR: u8 = 127;

/// Maximum payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Size of the masking key.
pub const MASK_KEY_SIZE: usize = 4;

/// Largest possible header: 2 + 8 extended length + 4 mask key.
pub const MAX_HEADER_SIZE: usize = 14;

/// Default maximum frame payload size (64 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// How the payload length is encoded after the 7-bit indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthClass {
    /// Indicator holds the length itself (0-125). Header is 2 bytes.
    Literal,
    /// Indicator 126, 16-bit length follows. Header is 4 bytes.
    Extended16,
    /// Indicator 127, 64-bit length follows. Header is 10 bytes.
    Extended64,
}

impl LengthClass {
    /// Smallest encoding that can carry `len`.
    #[inline]
    pub fn for_len(len: u64) -> Self {
        if len <= MAX_LITERAL_LENGTH {
            Self::Literal
        } else if len <= u16::MAX as u64 {
            Self::Extended16
        } else {
            Self::Extended64
        }
    }

    /// Encoding announced by a 7-bit length indicator.
    #[inline]
    pub fn from_indicator(indicator: u8) -> Self {
        match indicator & 0x7F {
            0..=125 => Self::Literal,
            126 => Self::Extended16,
            _ => Self::Extended64,
        }
    }

    /// Header size up to (not including) the masking key.
    #[inline]
    pub fn header_size(self) -> usize {
        match self {
            Self::Literal => 2,
            Self::Extended16 => 4,
            Self::Extended64 => 10,
        }
    }
}

/// XOR `payload` in place with `mask_key`.
///
/// `offset` is the position of `payload[0]` within the whole frame payload,
/// so a payload can be unmasked in pieces. Masking is its own inverse.
#[inline]
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4], offset: usize) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[(offset + i) % MASK_KEY_SIZE];
    }
}

/// An encoded frame header, stored inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedHeader {
    buf: [u8; MAX_HEADER_SIZE],
    len: usize,
}

impl EncodedHeader {
    /// The header bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Header length in bytes (2 to 14).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; a header has at least two bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for EncodedHeader {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Encode a frame header using the smallest length class.
///
/// Server-to-client frames pass `mask_key: None` (RFC 6455 §5.1).
pub fn encode_header(
    fin: bool,
    frame_type: FrameType,
    payload_len: u64,
    mask_key: Option<[u8; 4]>,
) -> EncodedHeader {
    let mut buf = [0u8; MAX_HEADER_SIZE];

    buf[0] = frame_type.opcode();
    if fin {
        buf[0] |= FIN_BIT;
    }
    let mask_bit = if mask_key.is_some() { MASK_BIT } else { 0 };

    let class = LengthClass::for_len(payload_len);
    match class {
        LengthClass::Literal => buf[1] = mask_bit | payload_len as u8,
        LengthClass::Extended16 => {
            buf[1] = mask_bit | LENGTH_16_INDICATOR;
            buf[2..4].copy_from_slice(&(payload_len as u16).to_be_bytes());
        }
        LengthClass::Extended64 => {
            buf[1] = mask_bit | LENGTH_64_INDICATOR;
            buf[2..10].copy_from_slice(&payload_len.to_be_bytes());
        }
    }

    let mut len = class.header_size();
    if let Some(key) = mask_key {
        buf[len..len + MASK_KEY_SIZE].copy_from_slice(&key);
        len += MASK_KEY_SIZE;
    }

    EncodedHeader { buf, len }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_class_boundaries() {
        assert_eq!(LengthClass::for_len(0), LengthClass::Literal);
        assert_eq!(LengthClass::for_len(1), LengthClass::Literal);
        assert_eq!(LengthClass::for_len(125), LengthClass::Literal);
        assert_eq!(LengthClass::for_len(126), LengthClass::Extended16);
        assert_eq!(LengthClass::for_len(127), LengthClass::Extended16);
        assert_eq!(LengthClass::for_len(65535), LengthClass::Extended16);
        assert_eq!(LengthClass::for_len(65536), LengthClass::Extended64);
    }

    #[test]
    fn test_length_class_from_indicator() {
        assert_eq!(LengthClass::from_indicator(0), LengthClass::Literal);
        assert_eq!(LengthClass::from_indicator(125), LengthClass::Literal);
        assert_eq!(LengthClass::from_indicator(126), LengthClass::Extended16);
        assert_eq!(LengthClass::from_indicator(127), LengthClass::Extended64);
        // MASK bit is ignored
        assert_eq!(LengthClass::from_indicator(0x80 | 126), LengthClass::Extended16);
    }

    #[test]
    fn test_encode_small_unmasked() {
        let header = encode_header(true, FrameType::Text, 5, None);
        assert_eq!(header.as_slice(), &[0x81, 0x05]);
    }

    #[test]
    fn test_encode_medium_masked() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let header = encode_header(false, FrameType::Binary, 300, Some(key));

        assert_eq!(header.len(), 8);
        assert_eq!(header.as_slice()[0], 0x02); // no FIN
        assert_eq!(header.as_slice()[1], 0x80 | 126);
        assert_eq!(u16::from_be_bytes([header.as_slice()[2], header.as_slice()[3]]), 300);
        assert_eq!(&header.as_slice()[4..], &key);
    }

    #[test]
    fn test_encode_large() {
        let header = encode_header(true, FrameType::Binary, 65536, None);

        assert_eq!(header.len(), 10);
        assert_eq!(header.as_slice()[1], 127);
        assert_eq!(&header.as_slice()[2..10], &65536u64.to_be_bytes());
    }

    #[test]
    fn test_encode_close() {
        let header = encode_header(true, FrameType::Close, 2, None);
        assert_eq!(header.as_slice(), &[0x88, 0x02]);
    }

    #[test]
    fn test_apply_mask_rfc_example() {
        // RFC 6455 §5.7: masked "Hello"
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut data = [0x7f, 0x9f, 0x4d, 0x51, 0x58];
        apply_mask(&mut data, key, 0);
        assert_eq!(&data, b"Hello");
    }

    #[test]
    fn test_apply_mask_with_offset() {
        let key = [1, 2, 3, 4];
        let mut whole = *b"abcdefgh";
        apply_mask(&mut whole, key, 0);

        let mut pieces = *b"abcdefgh";
        let (head, tail) = pieces.split_at_mut(3);
        apply_mask(head, key, 0);
        apply_mask(tail, key, 3);

        assert_eq!(whole, pieces);
    }
}
