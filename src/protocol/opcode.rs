//! Frame type registry: opcode ⇄ frame type.
//!
//! ```text
//! 0x0 Continuation   0x8 Close
//! 0x1 Text           0x9 Ping
//! 0x2 Binary         0xA Pong
//! 0x3-0x7, 0xB-0xF   reserved, rejected
//! ```

use std::fmt;

use crate::error::ProtocolError;

/// Classification of a frame by its 4-bit opcode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl FrameType {
    /// Look up the frame type for an opcode.
    ///
    /// Only the low four bits are meaningful; anything outside the six
    /// defined types is an error, never a default.
    pub fn from_opcode(opcode: u8) -> Result<Self, ProtocolError> {
        match opcode {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(ProtocolError::InvalidOpcode(other)),
        }
    }

    /// Wire opcode of this frame type.
    #[inline]
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Close, Ping and Pong.
    #[inline]
    pub fn is_control(self) -> bool {
        self.opcode() & 0x8 != 0
    }

    /// Continuation, Text and Binary.
    #[inline]
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(opcode: u8) -> Result<Self, Self::Error> {
        Self::from_opcode(opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_opcodes() {
        for (opcode, ty) in [
            (0x0, FrameType::Continuation),
            (0x1, FrameType::Text),
            (0x2, FrameType::Binary),
            (0x8, FrameType::Close),
            (0x9, FrameType::Ping),
            (0xA, FrameType::Pong),
        ] {
            assert_eq!(FrameType::from_opcode(opcode), Ok(ty));
            assert_eq!(ty.opcode(), opcode);
        }
    }

    #[test]
    fn test_reserved_opcodes_rejected() {
        for opcode in (0x3..=0x7).chain(0xB..=0xF) {
            assert_eq!(
                FrameType::from_opcode(opcode),
                Err(ProtocolError::InvalidOpcode(opcode))
            );
        }
    }

    #[test]
    fn test_is_control() {
        assert!(!FrameType::Continuation.is_control());
        assert!(!FrameType::Text.is_control());
        assert!(!FrameType::Binary.is_control());
        assert!(FrameType::Close.is_control());
        assert!(FrameType::Ping.is_control());
        assert!(FrameType::Pong.is_control());
        assert!(FrameType::Binary.is_data());
    }

    #[test]
    fn test_try_from() {
        assert_eq!(FrameType::try_from(0x9), Ok(FrameType::Ping));
        assert!(FrameType::try_from(0xD).is_err());
    }
}
