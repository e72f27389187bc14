//! Connection context for callbacks.
//!
//! Provides methods for talking back to the peer:
//! - `send_text` / `send_binary` / `send_bytes` - send a data message
//! - `send_frame` - send a pre-built frame, e.g. one fragment of a message
//! - `ping` / `pong` - heartbeat control frames
//! - `close` - start the closing handshake
//!
//! # Example
//!
//! ```ignore
//! async fn echo(message: Message, ctx: ConnectionContext) -> Result<()> {
//!     match message.as_text() {
//!         Some(text) => ctx.send_text(text).await,
//!         None => ctx.send_bytes(message.payload).await,
//!     }
//! }
//! ```

use std::sync::Arc;

use bytes::Bytes;

use crate::connection::{ConnectionShared, ConnectionState};
use crate::error::{Result, SockwireError};
use crate::protocol::{CloseCode, CloseReason};
use crate::writer::{OutboundFrame, WriterHandle};

/// Context passed to connection callbacks.
///
/// `ConnectionContext` is `Clone` and can be moved into spawned tasks; all
/// clones share the connection's state and writer.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    /// Connection ID, unique within the process.
    id: u64,
    /// Writer handle for outbound frames.
    writer: Option<WriterHandle>,
    shared: Arc<ConnectionShared>,
}

impl ConnectionContext {
    /// Create a detached context (for testing without writer).
    ///
    /// Sends succeed and go nowhere.
    pub fn new(id: u64) -> Self {
        let shared = ConnectionShared::new();
        shared.set(ConnectionState::Running);
        Self {
            id,
            writer: None,
            shared: Arc::new(shared),
        }
    }

    pub(crate) fn with_writer(id: u64, writer: WriterHandle, shared: Arc<ConnectionShared>) -> Self {
        Self {
            id,
            writer: Some(writer),
            shared,
        }
    }

    /// Get the connection ID.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.shared.get()
    }

    /// Whether data messages can still be sent.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Running
    }

    /// Send a text message.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_frame(OutboundFrame::text(text)).await
    }

    /// Send a binary message, copying `payload`.
    pub async fn send_binary(&self, payload: &[u8]) -> Result<()> {
        self.send_frame(OutboundFrame::binary(Bytes::copy_from_slice(payload)))
            .await
    }

    /// Send a binary message with pre-allocated Bytes (zero-copy).
    pub async fn send_bytes(&self, payload: Bytes) -> Result<()> {
        self.send_frame(OutboundFrame::binary(payload)).await
    }

    /// Send a Ping.
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send_frame(OutboundFrame::ping(payload)).await
    }

    /// Send an unsolicited Pong.
    pub async fn pong(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send_frame(OutboundFrame::pong(payload)).await
    }

    /// Send any frame while the connection is open.
    ///
    /// A Close frame starts the closing handshake, as [`close`](Self::close)
    /// does.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` once the closing handshake has started.
    pub async fn send_frame(&self, frame: OutboundFrame) -> Result<()> {
        if frame.is_close() {
            return self.send_close(frame).await;
        }
        if !self.is_open() {
            return Err(SockwireError::ConnectionClosed);
        }
        self.dispatch(frame).await
    }

    /// Start the closing handshake.
    ///
    /// Sends a Close frame and moves the connection to `Closing`; the read
    /// loop then waits a bounded time for the peer's Close. Calling this on a
    /// connection that is already closing does nothing.
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        let reason = CloseReason::new(code, reason);
        self.send_close(OutboundFrame::close(Some(&reason))).await
    }

    async fn send_close(&self, frame: OutboundFrame) -> Result<()> {
        if !self
            .shared
            .transition(ConnectionState::Running, ConnectionState::Closing)
        {
            tracing::debug!(state = ?self.state(), "close ignored, connection not running");
            return Ok(());
        }

        let result = self.dispatch(frame).await;
        self.shared.notify_close_requested();
        result
    }

    async fn dispatch(&self, frame: OutboundFrame) -> Result<()> {
        let writer = match &self.writer {
            Some(w) => w,
            None => {
                // No writer configured (testing mode)
                return Ok(());
            }
        };
        writer.send(frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::spawn_writer_task_default;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_detached_context() {
        let ctx = ConnectionContext::new(7);

        assert_eq!(ctx.id(), 7);
        assert!(ctx.is_open());
        ctx.send_text("hello").await.unwrap();

        ctx.close(CloseCode::Normal, "bye").await.unwrap();
        assert_eq!(ctx.state(), ConnectionState::Closing);
        assert!(matches!(
            ctx.send_text("late").await,
            Err(SockwireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_sent_once() {
        let (client, mut server) = duplex(4096);
        let (writer, task) = spawn_writer_task_default(client);
        let shared = Arc::new(ConnectionShared::new());
        shared.set(ConnectionState::Running);
        let ctx = ConnectionContext::with_writer(1, writer, shared);

        ctx.send_text("hi").await.unwrap();
        ctx.close(CloseCode::GoingAway, "").await.unwrap();
        ctx.close(CloseCode::Normal, "again").await.unwrap();
        drop(ctx);
        task.await.unwrap().unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, vec![0x81, 0x02, b'h', b'i', 0x88, 0x02, 0x03, 0xE9]);
    }

    #[tokio::test]
    async fn test_close_frame_via_send_frame() {
        let ctx = ConnectionContext::new(1);

        ctx.send_frame(OutboundFrame::close(None)).await.unwrap();

        assert_eq!(ctx.state(), ConnectionState::Closing);
    }
}
