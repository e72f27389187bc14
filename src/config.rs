//! Configuration for the decoder and the per-connection listener loop.
//!
//! Values are passed explicitly to constructors; there is no process-wide
//! state. [`ServerBuilder`](crate::ServerBuilder) fills these in through its
//! fluent API.

use std::time::Duration;

use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::writer::WriterConfig;

/// Default maximum size of a reassembled message (64 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024;

/// Default size of the socket read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default limit on the HTTP upgrade request head.
pub const DEFAULT_MAX_HANDSHAKE_SIZE: usize = 8 * 1024;

/// Default time allowed for the HTTP upgrade request to arrive.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time to wait for the peer's Close after sending ours.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame decoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Whether incoming frames must be masked. `true` on the server side.
    pub mask_required: bool,
    /// Largest accepted frame payload.
    pub max_payload_size: u64,
    /// Log every completed frame's header fields at debug level.
    pub debug: bool,
}

impl DecoderConfig {
    /// Settings for frames received by a server (masked).
    pub fn server() -> Self {
        Self {
            mask_required: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            debug: false,
        }
    }

    /// Settings for frames received by a client (unmasked).
    pub fn client() -> Self {
        Self {
            mask_required: false,
            ..Self::server()
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::server()
    }
}

/// What to do with a text message whose payload is not valid UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Utf8Policy {
    /// Hand the raw payload to the application; `Message::as_text()` is `None`.
    #[default]
    Deliver,
    /// Close the connection with status 1007 without delivering.
    Reject,
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub decoder: DecoderConfig,
    /// Largest accepted reassembled message.
    pub max_message_size: u64,
    /// Answer every Ping with a Pong carrying the same payload.
    pub auto_pong: bool,
    pub utf8_policy: Utf8Policy,
    pub read_buffer_size: usize,
    pub max_handshake_size: usize,
    /// How long a new connection may take to send its upgrade request.
    pub handshake_timeout: Duration,
    /// How long a locally initiated close waits for the peer's Close.
    pub close_timeout: Duration,
    pub writer: WriterConfig,
}

impl ServerConfig {
    /// Whether frame-level debug logging is on.
    #[inline]
    pub fn debug(&self) -> bool {
        self.decoder.debug
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::server(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            auto_pong: true,
            utf8_policy: Utf8Policy::Deliver,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_handshake_size: DEFAULT_MAX_HANDSHAKE_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            writer: WriterConfig::default(),
        }
    }
}
