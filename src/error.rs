//! Error types for sockwire.

use thiserror::Error;

use crate::protocol::CloseCode;

/// Main error type for all sockwire operations.
#[derive(Debug, Error)]
pub enum SockwireError {
    /// I/O error while reading from or writing to the stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer violated RFC 6455.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The opening HTTP upgrade exchange failed.
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Violations of the framing rules. All of them are fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Opcode outside the six defined frame types.
    #[error("opcode 0x{0:X} matches no known frame type")]
    InvalidOpcode(u8),

    /// RSV1-3 set without a negotiated extension.
    #[error("reserved bits set without a negotiated extension")]
    ReservedBitsSet,

    /// MASK bit differs from the connection's mask requirement.
    #[error("mask bit mismatch: expected masked={expected}")]
    MaskMismatch {
        /// The mask requirement of the receiving side.
        expected: bool,
    },

    /// Close, Ping or Pong with FIN cleared.
    #[error("control frame cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload over 125 bytes.
    #[error("control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(u64),

    /// 64-bit length with the most significant bit set.
    #[error("invalid 64-bit payload length")]
    InvalidLength,

    /// Declared frame payload exceeds the configured limit.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared payload length.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Continuation frame with no message in progress.
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// New Text/Binary frame while a fragmented message is in progress.
    #[error("expected continuation frame, got a new data frame")]
    ExpectedContinuation,

    /// Reassembled message exceeds the configured limit.
    #[error("message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Accumulated message size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Text message payload is not valid UTF-8.
    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Close frame payload is one byte long or its reason is not UTF-8.
    #[error("invalid close frame payload")]
    InvalidClosePayload,
}

impl ProtocolError {
    /// Status code sent in the Close frame that tears the connection down.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::PayloadTooLarge { .. } | Self::MessageTooLarge { .. } => CloseCode::MessageTooBig,
            Self::InvalidUtf8 => CloseCode::InvalidPayload,
            _ => CloseCode::ProtocolError,
        }
    }
}

/// Failures of the opening HTTP upgrade exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// No `Sec-WebSocket-Key` header in the request.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    /// The request head did not end within the configured size.
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// The stream ended before the blank line that terminates the head.
    #[error("stream ended before the end of the request head")]
    UnexpectedEof,

    /// The request head is not valid UTF-8.
    #[error("request head is not valid UTF-8")]
    InvalidHead,

    /// The request head did not arrive within the handshake timeout.
    #[error("no upgrade request within {0:?}")]
    Timeout(std::time::Duration),

    /// The server shut down before the handshake finished.
    #[error("server shut down during the handshake")]
    ShuttingDown,
}

/// Result type alias using SockwireError.
pub type Result<T> = std::result::Result<T, SockwireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes_for_errors() {
        assert_eq!(
            ProtocolError::InvalidOpcode(0xD).close_code(),
            CloseCode::ProtocolError
        );
        assert_eq!(
            ProtocolError::PayloadTooLarge { size: 10, max: 5 }.close_code(),
            CloseCode::MessageTooBig
        );
        assert_eq!(
            ProtocolError::InvalidUtf8.close_code(),
            CloseCode::InvalidPayload
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ProtocolError::InvalidOpcode(0xD).to_string(),
            "opcode 0xD matches no known frame type"
        );
        let err: SockwireError = ProtocolError::MaskMismatch { expected: true }.into();
        assert!(err.to_string().contains("expected masked=true"));
    }
}
