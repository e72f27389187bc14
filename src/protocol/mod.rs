//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements RFC 6455 data framing:
//! - Bit-addressable buffer for header fields
//! - Opcode registry and header encoding
//! - Incremental, byte-at-a-time frame decoder
//! - Message reassembly across continuation frames
//! - Close frame payloads

pub mod bits;
mod assembler;
mod close;
mod decoder;
mod frame;
mod opcode;
mod wire_format;

pub use assembler::{Message, MessageAssembler, MessageSignal, MessageType};
pub use bits::BitBuffer;
pub use close::{CloseCode, CloseReason};
pub use decoder::{DecoderSignal, FrameDecoder};
pub use frame::{build_frame, build_frame_parts, build_masked_frame, ControlAction, Frame};
pub use opcode::FrameType;
pub use wire_format::{
    apply_mask, encode_header, EncodedHeader, LengthClass, DEFAULT_MAX_PAYLOAD_SIZE,
    MAX_CONTROL_PAYLOAD, MAX_HEADER_SIZE,
};
