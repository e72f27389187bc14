//! # sockwire
//!
//! Server-side WebSocket (RFC 6455) endpoint on tokio.
//!
//! Incoming bytes are decoded by a resumable, byte-at-a-time frame decoder:
//! every header field is validated as soon as the bytes it lives in have
//! arrived, so a frame can be split across reads at any boundary.
//!
//! ## Architecture
//!
//! - **Handshake**: `Sec-WebSocket-Key` → `Sec-WebSocket-Accept`, 101 response
//! - **Read loop** (one task per connection): decoder → reassembler → callbacks
//! - **Writer task** (one per connection): batched, vectored writes
//!
//! ## Example
//!
//! ```ignore
//! use sockwire::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder()
//!         .on_message(|message, ctx| async move {
//!             match message.as_text() {
//!                 Some(text) => ctx.send_text(text).await,
//!                 None => ctx.send_bytes(message.payload).await,
//!             }
//!         })
//!         .bind("127.0.0.1:9001")
//!         .await
//!         .unwrap();
//!
//!     server.run().await.unwrap();
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod protocol;
pub mod writer;

mod server;

pub use config::{DecoderConfig, ServerConfig, Utf8Policy};
pub use connection::{serve_connection, ConnectionState};
pub use error::{HandshakeError, ProtocolError, SockwireError};
pub use handler::{Callbacks, ConnectionContext};
pub use protocol::{CloseCode, CloseReason, Frame, FrameDecoder, FrameType, Message, MessageType};
pub use server::{Server, ServerBuilder, ShutdownHandle};
