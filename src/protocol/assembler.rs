//! Message reassembly from data frames.
//!
//! A message is one Text or Binary frame followed by zero or more
//! Continuation frames; it completes on the first frame with FIN set.
//! Control frames may arrive between fragments and leave the message in
//! progress untouched.

use bytes::{Bytes, BytesMut};

use super::frame::Frame;
use super::opcode::FrameType;
use crate::config::{Utf8Policy, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::ProtocolError;

/// Type of a data message, fixed by its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text,
    Binary,
}

/// A reassembled data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    /// Concatenated payload of every fragment.
    pub payload: Bytes,
    /// Set once the final fragment was consumed.
    pub complete: bool,
    valid_utf8: bool,
}

impl Message {
    /// Build a complete text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Text,
            payload: Bytes::from(text.into()),
            complete: true,
            valid_utf8: true,
        }
    }

    /// Build a complete binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            message_type: MessageType::Binary,
            payload: payload.into(),
            complete: true,
            valid_utf8: false,
        }
    }

    #[inline]
    pub fn is_text(&self) -> bool {
        self.message_type == MessageType::Text
    }

    #[inline]
    pub fn is_binary(&self) -> bool {
        self.message_type == MessageType::Binary
    }

    /// The payload as text.
    ///
    /// `None` for binary messages and for text messages whose payload is
    /// not valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text() && self.valid_utf8 {
            std::str::from_utf8(&self.payload).ok()
        } else {
            None
        }
    }

    /// Raw payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Outcome of handing one frame to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSignal {
    /// No message completed by this frame.
    Pending,
    /// The frame finished a message.
    MessageComplete(Message),
    /// The frame sequence is invalid. Fatal to the connection.
    Error(ProtocolError),
}

#[derive(Debug)]
struct InProgress {
    message_type: MessageType,
    buffer: BytesMut,
}

/// Reassembles fragmented data frames into messages.
#[derive(Debug)]
pub struct MessageAssembler {
    current: Option<InProgress>,
    max_message_size: u64,
    utf8_policy: Utf8Policy,
}

impl MessageAssembler {
    pub fn new(max_message_size: u64, utf8_policy: Utf8Policy) -> Self {
        Self {
            current: None,
            max_message_size,
            utf8_policy,
        }
    }

    /// Whether a fragmented message is waiting for more frames.
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Bytes accumulated for the message in progress.
    pub fn buffered_len(&self) -> usize {
        self.current.as_ref().map_or(0, |m| m.buffer.len())
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Consume one decoded frame.
    pub fn accept(&mut self, frame: Frame) -> MessageSignal {
        if frame.is_control() {
            return MessageSignal::Pending;
        }

        match self.accept_data(frame) {
            Ok(Some(message)) => MessageSignal::MessageComplete(message),
            Ok(None) => MessageSignal::Pending,
            Err(err) => {
                self.current = None;
                MessageSignal::Error(err)
            }
        }
    }

    fn accept_data(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        let starting = match frame.frame_type {
            FrameType::Text => Some(MessageType::Text),
            FrameType::Binary => Some(MessageType::Binary),
            _ => None,
        };

        match (starting, self.current.as_mut()) {
            (Some(_), Some(_)) => Err(ProtocolError::ExpectedContinuation),
            (None, None) => Err(ProtocolError::UnexpectedContinuation),

            (Some(message_type), None) => {
                self.check_size(frame.payload.len())?;
                if frame.fin {
                    // Unfragmented: hand the frame's buffer through as-is.
                    return self.finish(message_type, frame.payload).map(Some);
                }
                let mut buffer = BytesMut::with_capacity(frame.payload.len());
                buffer.extend_from_slice(&frame.payload);
                self.current = Some(InProgress {
                    message_type,
                    buffer,
                });
                Ok(None)
            }

            (None, Some(current)) => {
                let size = current.buffer.len() + frame.payload.len();
                if size as u64 > self.max_message_size {
                    return Err(ProtocolError::MessageTooLarge {
                        size: size as u64,
                        max: self.max_message_size,
                    });
                }
                current.buffer.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                match self.current.take() {
                    Some(done) => self
                        .finish(done.message_type, done.buffer.freeze())
                        .map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size as u64 > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: size as u64,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    fn finish(&self, message_type: MessageType, payload: Bytes) -> Result<Message, ProtocolError> {
        let valid_utf8 =
            message_type == MessageType::Text && std::str::from_utf8(&payload).is_ok();

        if message_type == MessageType::Text
            && !valid_utf8
            && self.utf8_policy == Utf8Policy::Reject
        {
            return Err(ProtocolError::InvalidUtf8);
        }

        Ok(Message {
            message_type,
            payload,
            complete: true,
            valid_utf8,
        })
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE, Utf8Policy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(frame_type: FrameType, fin: bool, payload: &'static [u8]) -> Frame {
        Frame::new(frame_type, Bytes::from_static(payload)).with_fin(fin)
    }

    fn expect_message(signal: MessageSignal) -> Message {
        match signal {
            MessageSignal::MessageComplete(message) => message,
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[test]
    fn test_single_frame_message() {
        let mut assembler = MessageAssembler::default();

        let message = expect_message(assembler.accept(data(FrameType::Text, true, b"hello")));

        assert!(message.complete);
        assert!(message.is_text());
        assert_eq!(message.as_text(), Some("hello"));
        assert!(!assembler.in_progress());
    }

    #[test]
    fn test_fragmented_text() {
        let mut assembler = MessageAssembler::default();

        assert_eq!(
            assembler.accept(data(FrameType::Text, false, b"Hel")),
            MessageSignal::Pending
        );
        assert!(assembler.in_progress());
        assert_eq!(
            assembler.accept(data(FrameType::Continuation, false, b"l")),
            MessageSignal::Pending
        );
        assert_eq!(assembler.buffered_len(), 4);

        let message = expect_message(assembler.accept(data(FrameType::Continuation, true, b"o")));
        assert_eq!(message.as_text(), Some("Hello"));
        assert!(!assembler.in_progress());
    }

    #[test]
    fn test_control_frame_interleave() {
        let mut assembler = MessageAssembler::default();

        assembler.accept(data(FrameType::Binary, false, b"ab"));
        assert_eq!(
            assembler.accept(data(FrameType::Ping, true, b"hb")),
            MessageSignal::Pending
        );
        assert_eq!(assembler.buffered_len(), 2);

        let message = expect_message(assembler.accept(data(FrameType::Continuation, true, b"cd")));
        assert!(message.is_binary());
        assert_eq!(message.payload(), b"abcd");
        assert_eq!(message.as_text(), None);
    }

    #[test]
    fn test_unexpected_continuation() {
        let mut assembler = MessageAssembler::default();
        assert_eq!(
            assembler.accept(data(FrameType::Continuation, true, b"x")),
            MessageSignal::Error(ProtocolError::UnexpectedContinuation)
        );
    }

    #[test]
    fn test_new_message_while_in_progress() {
        let mut assembler = MessageAssembler::default();
        assembler.accept(data(FrameType::Text, false, b"a"));

        assert_eq!(
            assembler.accept(data(FrameType::Binary, true, b"b")),
            MessageSignal::Error(ProtocolError::ExpectedContinuation)
        );
        assert!(!assembler.in_progress());
    }

    #[test]
    fn test_message_size_limit() {
        let mut assembler = MessageAssembler::new(4, Utf8Policy::Deliver);

        assembler.accept(data(FrameType::Binary, false, b"abc"));
        assert_eq!(
            assembler.accept(data(FrameType::Continuation, true, b"de")),
            MessageSignal::Error(ProtocolError::MessageTooLarge { size: 5, max: 4 })
        );

        assert_eq!(
            assembler.accept(data(FrameType::Binary, true, b"12345")),
            MessageSignal::Error(ProtocolError::MessageTooLarge { size: 5, max: 4 })
        );
    }

    #[test]
    fn test_invalid_utf8_delivered_by_default() {
        let mut assembler = MessageAssembler::default();

        let message = expect_message(assembler.accept(data(FrameType::Text, true, &[0xFF, 0xFE])));

        assert!(message.is_text());
        assert_eq!(message.as_text(), None);
        assert_eq!(message.payload(), &[0xFF, 0xFE]);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut assembler = MessageAssembler::new(DEFAULT_MAX_MESSAGE_SIZE, Utf8Policy::Reject);
        assert_eq!(
            assembler.accept(data(FrameType::Text, true, &[0xC3])),
            MessageSignal::Error(ProtocolError::InvalidUtf8)
        );
    }

    #[test]
    fn test_utf8_split_across_fragments() {
        let mut assembler = MessageAssembler::new(DEFAULT_MAX_MESSAGE_SIZE, Utf8Policy::Reject);

        // "é" is 0xC3 0xA9
        assembler.accept(data(FrameType::Text, false, &[0xC3]));
        let message = expect_message(assembler.accept(data(FrameType::Continuation, true, &[0xA9])));

        assert_eq!(message.as_text(), Some("é"));
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::text("hi").as_text(), Some("hi"));
        let binary = Message::binary(vec![1u8, 2]);
        assert!(binary.is_binary());
        assert_eq!(binary.len(), 2);
    }
}
