//! Frame struct with typed accessors, and outbound frame builders.
//!
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use sockwire::protocol::{build_frame, FrameDecoder, FrameType};
//!
//! let bytes = build_frame(true, FrameType::Text, b"hello");
//! assert_eq!(&bytes[..2], &[0x81, 0x05]);
//!
//! let mut decoder = FrameDecoder::client_side();
//! let frames = decoder.push(&bytes).unwrap();
//! assert_eq!(frames[0].payload(), b"hello");
//! ```

use bytes::Bytes;

use super::close::CloseReason;
use super::opcode::FrameType;
use super::wire_format::{apply_mask, encode_header, EncodedHeader};
use crate::error::ProtocolError;

/// A complete, unmasked frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    /// Type decoded from the opcode.
    pub frame_type: FrameType,
    /// Whether the frame arrived masked.
    pub masked: bool,
    /// Masking key, present iff `masked`.
    pub mask_key: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_length: u64,
    /// Unmasked payload bytes.
    pub payload: Bytes,
}

/// What the connection must do for a completed control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Begin closing; carries the parsed status, if any.
    Close(Option<CloseReason>),
    /// Peer pinged; payload to echo in a Pong.
    Ping(Bytes),
    /// Peer answered a ping (or sent an unsolicited heartbeat).
    Pong(Bytes),
}

impl Frame {
    /// Create an unfragmented, unmasked frame.
    pub fn new(frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            frame_type,
            masked: false,
            mask_key: None,
            payload_length: payload.len() as u64,
            payload,
        }
    }

    /// Same frame with `fin` replaced.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_control(&self) -> bool {
        self.frame_type.is_control()
    }

    #[inline]
    pub fn is_continuation(&self) -> bool {
        self.frame_type == FrameType::Continuation
    }

    /// The action a control frame calls for; `None` for data frames.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClosePayload` for a malformed Close payload.
    pub fn control_action(&self) -> Result<Option<ControlAction>, ProtocolError> {
        let action = match self.frame_type {
            FrameType::Close => ControlAction::Close(CloseReason::parse(&self.payload)?),
            FrameType::Ping => ControlAction::Ping(self.payload.clone()),
            FrameType::Pong => ControlAction::Pong(self.payload.clone()),
            _ => return Ok(None),
        };
        Ok(Some(action))
    }
}

/// Build an unmasked frame (server to client) as one byte vector.
pub fn build_frame(fin: bool, frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let (header, payload) = build_frame_parts(fin, frame_type, payload);
    let mut buf = Vec::with_capacity(header.len() + payload.len());
    buf.extend_from_slice(header.as_slice());
    buf.extend_from_slice(payload);
    buf
}

/// Build frame parts for scatter/gather I/O.
///
/// Returns the encoded header and a reference to the payload.
pub fn build_frame_parts(
    fin: bool,
    frame_type: FrameType,
    payload: &[u8],
) -> (EncodedHeader, &[u8]) {
    (encode_header(fin, frame_type, payload.len() as u64, None), payload)
}

/// Build a masked frame, as a client sends it.
pub fn build_masked_frame(
    fin: bool,
    frame_type: FrameType,
    payload: &[u8],
    mask_key: [u8; 4],
) -> Vec<u8> {
    let header = encode_header(fin, frame_type, payload.len() as u64, Some(mask_key));
    let mut buf = Vec::with_capacity(header.len() + payload.len());
    buf.extend_from_slice(header.as_slice());
    let start = buf.len();
    buf.extend_from_slice(payload);
    apply_mask(&mut buf[start..], mask_key, 0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CloseCode;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(FrameType::Binary, Bytes::from_static(b"hello"));

        assert!(frame.fin);
        assert_eq!(frame.frame_type, FrameType::Binary);
        assert_eq!(frame.payload(), b"hello");
        assert_eq!(frame.payload_len(), 5);
        assert_eq!(frame.payload_length, 5);
        assert!(!frame.masked);
        assert!(!frame.is_control());
    }

    #[test]
    fn test_control_action() {
        let ping = Frame::new(FrameType::Ping, Bytes::from_static(b"hb"));
        assert_eq!(
            ping.control_action(),
            Ok(Some(ControlAction::Ping(Bytes::from_static(b"hb"))))
        );

        let close = Frame::new(FrameType::Close, Bytes::from_static(&[0x03, 0xE9]));
        match close.control_action() {
            Ok(Some(ControlAction::Close(Some(reason)))) => {
                assert_eq!(reason.code, CloseCode::GoingAway)
            }
            other => panic!("unexpected action: {:?}", other),
        }

        let text = Frame::new(FrameType::Text, Bytes::new());
        assert_eq!(text.control_action(), Ok(None));
    }

    #[test]
    fn test_bad_close_payload() {
        let close = Frame::new(FrameType::Close, Bytes::from_static(&[0x03]));
        assert_eq!(
            close.control_action(),
            Err(ProtocolError::InvalidClosePayload)
        );
    }

    #[test]
    fn test_build_frame() {
        let bytes = build_frame(true, FrameType::Text, b"hello");
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1], 5);
        assert_eq!(&bytes[2..], b"hello");
    }

    #[test]
    fn test_build_frame_parts() {
        let (header, payload) = build_frame_parts(false, FrameType::Binary, b"abc");
        assert_eq!(header.as_slice(), &[0x02, 0x03]);
        assert_eq!(payload, b"abc");
    }

    #[test]
    fn test_build_masked_frame_rfc_example() {
        // RFC 6455 §5.7
        let bytes = build_masked_frame(true, FrameType::Text, b"Hello", [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(
            bytes,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }
}
