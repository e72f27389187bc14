//! Close frame payload (RFC 6455 §5.5.1, §7.4).
//!
//! A close payload is empty, or a big-endian status code optionally
//! followed by a UTF-8 reason.

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::MAX_CONTROL_PAYLOAD;
use crate::error::ProtocolError;

/// Longest reason that fits a Close payload next to the status code.
pub const MAX_REASON_LEN: usize = MAX_CONTROL_PAYLOAD as usize - 2;

/// Close status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003
    Unsupported,
    /// 1005, never sent on the wire.
    NoStatusReceived,
    /// 1006, never sent on the wire.
    Abnormal,
    /// 1007
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009
    MessageTooBig,
    /// 1010
    MandatoryExtension,
    /// 1011
    InternalError,
    /// Any other code, including application codes 3000-4999.
    Other(u16),
}

impl CloseCode {
    /// Whether this code may appear in a Close frame.
    ///
    /// 1005 and 1006 are for local reporting only. On the wire, 1004, 1015
    /// and 1016-2999 are reserved and anything outside 1000-4999 is invalid.
    pub fn is_sendable(self) -> bool {
        match self {
            Self::NoStatusReceived | Self::Abnormal => false,
            Self::Other(code) => {
                ((1000..=1015).contains(&code) || (3000..5000).contains(&code))
                    && code != 1004
                    && code != 1015
            }
            _ => true,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::Unsupported,
            1005 => Self::NoStatusReceived,
            1006 => Self::Abnormal,
            1007 => Self::InvalidPayload,
            1008 => Self::PolicyViolation,
            1009 => Self::MessageTooBig,
            1010 => Self::MandatoryExtension,
            1011 => Self::InternalError,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => code,
        }
    }
}

/// Status code and reason carried by a Close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse a Close payload. An empty payload carries no reason.
    ///
    /// A one-byte payload, a code that may not be sent, or a reason that is
    /// not UTF-8 is rejected.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>, ProtocolError> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(ProtocolError::InvalidClosePayload),
            _ => {
                let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_sendable() {
                    return Err(ProtocolError::InvalidClosePayload);
                }
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| ProtocolError::InvalidClosePayload)?;
                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    /// Encode as a Close payload.
    ///
    /// The reason is cut at a character boundary to keep the payload within
    /// 125 bytes.
    pub fn encode(&self) -> Bytes {
        let mut end = self.reason.len().min(MAX_REASON_LEN);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = BytesMut::with_capacity(2 + end);
        buf.put_u16(self.code.into());
        buf.put_slice(&self.reason.as_bytes()[..end]);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(CloseReason::parse(&[]), Ok(None));
    }

    #[test]
    fn test_parse_one_byte_rejected() {
        assert_eq!(
            CloseReason::parse(&[0x03]),
            Err(ProtocolError::InvalidClosePayload)
        );
    }

    #[test]
    fn test_parse_code_and_reason() {
        let reason = CloseReason::parse(&[0x03, 0xE8, b'b', b'y', b'e'])
            .unwrap()
            .unwrap();
        assert_eq!(reason.code, CloseCode::Normal);
        assert_eq!(reason.reason, "bye");
    }

    #[test]
    fn test_parse_invalid_utf8_reason() {
        assert_eq!(
            CloseReason::parse(&[0x03, 0xE8, 0xFF, 0xFE]),
            Err(ProtocolError::InvalidClosePayload)
        );
    }

    #[test]
    fn test_encode() {
        let reason = CloseReason::new(CloseCode::GoingAway, "shutdown");
        let encoded = reason.encode();
        assert_eq!(&encoded[..2], &1001u16.to_be_bytes());
        assert_eq!(&encoded[2..], b"shutdown");
    }

    #[test]
    fn test_parse_rejects_reserved_codes() {
        for code in [999u16, 1004, 1005, 1006, 1015, 1016, 2000, 2999, 5000] {
            assert_eq!(
                CloseReason::parse(&code.to_be_bytes()),
                Err(ProtocolError::InvalidClosePayload),
                "code {}",
                code
            );
        }
    }

    #[test]
    fn test_encode_truncates_long_reason() {
        let reason = CloseReason::new(CloseCode::ProtocolError, "é".repeat(100));
        let encoded = reason.encode();

        assert!(encoded.len() <= 125);
        assert!(std::str::from_utf8(&encoded[2..]).is_ok());
    }

    #[test]
    fn test_application_codes_preserved() {
        assert_eq!(CloseCode::from(4000), CloseCode::Other(4000));
        assert_eq!(u16::from(CloseCode::Other(4000)), 4000);
        assert!(!CloseCode::Abnormal.is_sendable());
        assert!(CloseCode::Normal.is_sendable());
        assert!(CloseCode::Other(1012).is_sendable());
        assert!(CloseCode::Other(3000).is_sendable());
        assert!(!CloseCode::Other(2000).is_sendable());
    }
}
