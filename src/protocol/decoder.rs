//! Incremental frame decoder.
//!
//! Bytes are fed one at a time with [`FrameDecoder::process`], or a socket
//! read at a time with [`FrameDecoder::push`]. Each header field is decoded
//! and validated exactly once, as soon as the bytes it lives in have arrived:
//!
//! - byte 0: FIN, RSV1-3 and opcode
//! - byte 1: MASK and the 7-bit length indicator
//! - bytes 2..4 or 2..10: extended length, if announced
//! - next 4 bytes: masking key, if MASK is set
//!
//! Everything after the header is payload. The decoder never resynchronizes:
//! after a protocol error every further call reports the same error.
//!
//! # Example
//!
//! ```
//! use sockwire::protocol::{build_masked_frame, DecoderSignal, FrameDecoder, FrameType};
//!
//! let bytes = build_masked_frame(true, FrameType::Text, b"Hello", [0x37, 0xfa, 0x21, 0x3d]);
//! let mut decoder = FrameDecoder::server_side();
//!
//! let (last, head) = bytes.split_last().unwrap();
//! for &byte in head {
//!     assert!(matches!(decoder.process(byte), DecoderSignal::Incomplete));
//! }
//! match decoder.process(*last) {
//!     DecoderSignal::FrameComplete(frame) => assert_eq!(frame.payload(), b"Hello"),
//!     other => panic!("unexpected signal: {:?}", other),
//! }
//! ```

use bytes::BytesMut;

use super::bits::BitBuffer;
use super::frame::Frame;
use super::opcode::FrameType;
use super::wire_format::{
    apply_mask, bits, LengthClass, MASK_KEY_SIZE, MAX_CONTROL_PAYLOAD, MAX_HEADER_SIZE,
};
use crate::config::DecoderConfig;
use crate::error::ProtocolError;

/// Upper bound on the up-front allocation for a declared payload.
const MAX_PREALLOCATION: u64 = 64 * 1024;

/// Outcome of feeding one byte to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderSignal {
    /// More bytes are needed.
    Incomplete,
    /// The byte completed a frame.
    FrameComplete(Frame),
    /// The stream violates the protocol. Fatal to the connection.
    ProtocolError(ProtocolError),
}

/// Header fields decoded so far for the frame in progress.
#[derive(Debug, Default, Clone)]
struct PartialHeader {
    fin: bool,
    rsv: [bool; 3],
    frame_type: Option<FrameType>,
    masked: Option<bool>,
    length_class: Option<LengthClass>,
    length_indicator: u8,
    payload_length: Option<u64>,
    mask_key: Option<[u8; 4]>,
    /// Bytes from the start of the frame to the first payload byte.
    header_size: usize,
    complete: bool,
}

/// Resumable RFC 6455 frame decoder.
///
/// Holds at most one frame in progress. Raw bytes, header included, are kept
/// in a [`BitBuffer`] until the frame completes.
#[derive(Debug)]
pub struct FrameDecoder {
    config: DecoderConfig,
    raw: BitBuffer,
    header: PartialHeader,
    failed: Option<ProtocolError>,
}

impl FrameDecoder {
    /// Create a decoder with explicit settings.
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            raw: BitBuffer::with_capacity(MAX_HEADER_SIZE),
            header: PartialHeader::default(),
            failed: None,
        }
    }

    /// Decoder for frames a server receives: masking required.
    pub fn server_side() -> Self {
        Self::new(DecoderConfig::server())
    }

    /// Decoder for frames a client receives: masking forbidden.
    pub fn client_side() -> Self {
        Self::new(DecoderConfig::client())
    }

    /// Settings this decoder was built with.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Feed a single byte.
    pub fn process(&mut self, byte: u8) -> DecoderSignal {
        if let Some(err) = &self.failed {
            return DecoderSignal::ProtocolError(err.clone());
        }

        self.raw.push(byte);

        let step = if self.header.complete {
            Ok(())
        } else {
            self.advance_header()
        };

        match step.map(|()| self.take_frame()) {
            Ok(Some(frame)) => DecoderSignal::FrameComplete(frame),
            Ok(None) => DecoderSignal::Incomplete,
            Err(err) => DecoderSignal::ProtocolError(self.fail(err)),
        }
    }

    /// Feed bytes until a frame completes, an error occurs, or `data` runs
    /// out.
    ///
    /// Returns how many bytes were consumed and the signal of the last one.
    /// Header bytes go through [`process`](Self::process) one by one; payload
    /// bytes are copied in bulk. The result is the same as calling `process`
    /// for every byte.
    pub fn feed(&mut self, data: &[u8]) -> (usize, DecoderSignal) {
        let mut consumed = 0;

        while consumed < data.len() {
            if self.failed.is_none() && self.header.complete {
                let take = self.payload_remaining().min(data.len() - consumed);
                self.raw.extend_from_slice(&data[consumed..consumed + take]);
                consumed += take;
                if let Some(frame) = self.take_frame() {
                    return (consumed, DecoderSignal::FrameComplete(frame));
                }
                continue;
            }

            let signal = self.process(data[consumed]);
            consumed += 1;
            if signal != DecoderSignal::Incomplete {
                return (consumed, signal);
            }
        }

        (consumed, DecoderSignal::Incomplete)
    }

    /// Feed a chunk and collect every frame it completes.
    ///
    /// # Errors
    ///
    /// Returns the first protocol error. Frames completed earlier in the same
    /// chunk are dropped along with the connection.
    pub fn push(&mut self, mut data: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        let mut frames = Vec::new();

        while !data.is_empty() {
            let (consumed, signal) = self.feed(data);
            data = &data[consumed..];
            match signal {
                DecoderSignal::Incomplete => {}
                DecoderSignal::FrameComplete(frame) => frames.push(frame),
                DecoderSignal::ProtocolError(err) => return Err(err),
            }
        }

        Ok(frames)
    }

    /// Whether a previous protocol error poisoned the decoder.
    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    /// The error that poisoned the decoder, if any.
    pub fn error(&self) -> Option<&ProtocolError> {
        self.failed.as_ref()
    }

    /// Bytes buffered for the frame in progress.
    pub fn buffered_len(&self) -> usize {
        self.raw.len()
    }

    /// True between frames: no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.failed.is_none() && self.raw.is_empty()
    }

    /// Decode whichever header fields the buffered bytes now cover.
    fn advance_header(&mut self) -> Result<(), ProtocolError> {
        if self.header.frame_type.is_none() {
            if let Some(opcode) = self.raw.bits(bits::OPCODE.0, bits::OPCODE.1) {
                self.decode_first_byte(opcode as u8)?;
            }
        }

        if self.header.frame_type.is_some() && self.header.masked.is_none() {
            if let (Some(masked), Some(indicator)) = (
                self.raw.bit(bits::MASK),
                self.raw.bits(bits::LENGTH.0, bits::LENGTH.1),
            ) {
                if masked != self.config.mask_required {
                    return Err(ProtocolError::MaskMismatch {
                        expected: self.config.mask_required,
                    });
                }
                let class = LengthClass::from_indicator(indicator as u8);
                self.header.masked = Some(masked);
                self.header.length_indicator = indicator as u8;
                self.header.length_class = Some(class);
                self.header.header_size = class.header_size();
            }
        }

        if let (Some(class), None) = (self.header.length_class, self.header.payload_length) {
            let end = class.header_size() * 8;
            let length = match class {
                LengthClass::Literal => Some(self.header.length_indicator as u64),
                LengthClass::Extended16 | LengthClass::Extended64 => self.raw.bits(16, end),
            };
            if let Some(length) = length {
                self.accept_length(class, length)?;
            }
        }

        if self.header.masked == Some(true)
            && self.header.payload_length.is_some()
            && self.header.mask_key.is_none()
        {
            let start = self.header.header_size;
            let key = self
                .raw
                .slice(start, start + MASK_KEY_SIZE)
                .and_then(|slice| <[u8; 4]>::try_from(slice).ok());
            if let Some(key) = key {
                self.header.mask_key = Some(key);
                self.header.header_size += MASK_KEY_SIZE;
            }
        }

        self.header.complete = self.header.payload_length.is_some()
            && (self.header.masked == Some(false) || self.header.mask_key.is_some());

        Ok(())
    }

    fn decode_first_byte(&mut self, opcode: u8) -> Result<(), ProtocolError> {
        let flag = |bit| self.raw.bit(bit).unwrap_or(false);
        let fin = flag(bits::FIN);
        let rsv = [flag(bits::RSV1), flag(bits::RSV2), flag(bits::RSV3)];

        if rsv.iter().any(|&set| set) {
            return Err(ProtocolError::ReservedBitsSet);
        }
        let frame_type = FrameType::from_opcode(opcode)?;

        self.header.fin = fin;
        self.header.rsv = rsv;
        self.header.frame_type = Some(frame_type);
        Ok(())
    }

    /// Validate the declared payload length once it is fully known.
    fn accept_length(&mut self, class: LengthClass, length: u64) -> Result<(), ProtocolError> {
        if class == LengthClass::Extended64 && length >> 63 != 0 {
            return Err(ProtocolError::InvalidLength);
        }

        if let Some(frame_type) = self.header.frame_type {
            if frame_type.is_control() {
                if !self.header.fin {
                    return Err(ProtocolError::FragmentedControlFrame);
                }
                if length > MAX_CONTROL_PAYLOAD {
                    return Err(ProtocolError::ControlFrameTooLarge(length));
                }
            }
        }

        if length > self.config.max_payload_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: length,
                max: self.config.max_payload_size,
            });
        }

        self.header.payload_length = Some(length);
        let mask_len = if self.header.masked == Some(true) {
            MASK_KEY_SIZE
        } else {
            0
        };
        self.raw
            .reserve(length.min(MAX_PREALLOCATION) as usize + mask_len);
        Ok(())
    }

    /// Payload bytes still missing for the frame in progress.
    fn payload_remaining(&self) -> usize {
        let expected = self.header.payload_length.unwrap_or(0);
        let have = self.raw.len().saturating_sub(self.header.header_size) as u64;
        expected.saturating_sub(have) as usize
    }

    /// Emit the frame in progress if its header and payload are complete.
    fn take_frame(&mut self) -> Option<Frame> {
        if !self.header.complete || self.payload_remaining() != 0 {
            return None;
        }
        let frame_type = self.header.frame_type?;
        let payload_length = self.header.payload_length?;

        let mut payload: BytesMut = self.raw.split_from(self.header.header_size);
        if let Some(key) = self.header.mask_key {
            apply_mask(&mut payload, key, 0);
        }

        let header = std::mem::take(&mut self.header);
        self.raw.clear();

        let frame = Frame {
            fin: header.fin,
            rsv1: header.rsv[0],
            rsv2: header.rsv[1],
            rsv3: header.rsv[2],
            frame_type,
            masked: header.mask_key.is_some(),
            mask_key: header.mask_key,
            payload_length,
            payload: payload.freeze(),
        };

        if self.config.debug {
            tracing::debug!(
                fin = frame.fin,
                opcode = %frame.frame_type,
                masked = frame.masked,
                header_size = header.header_size,
                payload_length = frame.payload_length,
                "frame decoded"
            );
        }

        Some(frame)
    }

    /// Poison the decoder and drop the partial frame.
    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        if self.config.debug {
            tracing::debug!(error = %err, buffered = self.raw.len(), "frame rejected");
        }
        self.raw.clear();
        self.header = PartialHeader::default();
        self.failed = Some(err.clone());
        err
    }

    /// Current state name, for tests.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        if self.failed.is_some() {
            "Failed"
        } else if self.header.complete {
            "Payload"
        } else {
            "Header"
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::server_side()
    }
}
