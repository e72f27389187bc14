//! Per-connection listener loop.
//!
//! [`serve_connection`] drives one connection from the opening handshake to
//! release of the stream:
//!
//! ```text
//! PreStart ─► Handshaking ─► Running ─► Closing ─► Closed
//!                  │            │          │
//!                  └────────────┴──────────┴──► Errored
//! ```
//!
//! The read half stays with the loop; the write half goes to a dedicated
//! writer task. Between reads, each chunk is fed to the frame decoder and
//! every completed frame is acted on before the next byte is looked at, so
//! control-frame effects and message callbacks follow wire order.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{watch, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::error::{HandshakeError, ProtocolError, Result};
use crate::handler::{Callbacks, ConnectionContext};
use crate::handshake;
use crate::protocol::{
    CloseCode, CloseReason, ControlAction, DecoderSignal, Frame, FrameDecoder, MessageAssembler,
    MessageSignal,
};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a connection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Accepted, nothing read yet.
    PreStart = 0,
    /// Reading the HTTP upgrade request.
    Handshaking = 1,
    /// Exchanging frames.
    Running = 2,
    /// A Close frame was sent; waiting for the other side.
    Closing = 3,
    /// Closed cleanly or released after a close attempt.
    Closed = 4,
    /// Ended by a protocol or transport error.
    Errored = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::PreStart,
            1 => Self::Handshaking,
            2 => Self::Running,
            3 => Self::Closing,
            4 => Self::Closed,
            _ => Self::Errored,
        }
    }

    /// Closed or Errored.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreStart => "pre-start",
            Self::Handshaking => "handshaking",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// State shared between the read loop and every [`ConnectionContext`].
#[derive(Debug)]
pub(crate) struct ConnectionShared {
    state: AtomicU8,
    close_requested: Notify,
}

impl ConnectionShared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::PreStart as u8),
            close_requested: Notify::new(),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; false if the state was not `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Wake the read loop after a locally initiated close.
    pub(crate) fn notify_close_requested(&self) {
        self.close_requested.notify_one();
    }

    async fn close_requested(&self) {
        self.close_requested.notified().await
    }
}

/// Why the read loop stopped.
#[derive(Debug)]
enum Ending {
    /// The peer sent Close; the reply is queued.
    PeerClosed(Option<CloseReason>),
    /// The peer answered our Close.
    CloseAcknowledged(Option<CloseReason>),
    /// Our Close went unanswered for `close_timeout`.
    CloseTimeout,
    /// The server is shutting down.
    Shutdown,
    Protocol(ProtocolError),
    /// The stream ended without a closing handshake.
    Eof,
    Io(io::Error),
}

impl Ending {
    /// Whether a Close frame is (or may be) on its way out.
    fn sends_close(&self) -> bool {
        matches!(
            self,
            Self::PeerClosed(_) | Self::CloseAcknowledged(_) | Self::Shutdown | Self::Protocol(_)
        )
    }
}

/// Serve one WebSocket connection over `stream`.
///
/// Runs the opening handshake, then reads frames until the connection ends.
/// `on_close` runs exactly once for a connection that completed the
/// handshake. Setting `shutdown` to `true` closes the connection with 1001.
///
/// # Errors
///
/// Handshake failures, protocol violations and transport errors. A clean
/// close, including the peer simply disconnecting, returns `Ok(())`.
pub async fn serve_connection<S>(
    stream: S,
    config: Arc<ServerConfig>,
    callbacks: Callbacks,
    shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    run_connection(id, stream, config, callbacks, shutdown)
        .instrument(tracing::info_span!("connection", id))
        .await
}

async fn run_connection<S>(
    id: u64,
    mut stream: S,
    config: Arc<ServerConfig>,
    callbacks: Callbacks,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let shared = Arc::new(ConnectionShared::new());

    shared.set(ConnectionState::Handshaking);
    let handshake = tokio::time::timeout(
        config.handshake_timeout,
        handshake::accept(&mut stream, config.max_handshake_size),
    );
    let accepted: Result<Bytes> = tokio::select! {
        accepted = handshake => accepted.unwrap_or_else(|_| {
            Err(HandshakeError::Timeout(config.handshake_timeout).into())
        }),
        _ = shutdown_requested(&mut shutdown) => Err(HandshakeError::ShuttingDown.into()),
    };
    let leftover = match accepted {
        Ok(leftover) => leftover,
        Err(e) => {
            shared.set(ConnectionState::Errored);
            tracing::debug!("Handshake failed: {}", e);
            return Err(e);
        }
    };
    shared.set(ConnectionState::Running);
    tracing::debug!("connection open");

    let (mut reader, write_half) = tokio::io::split(stream);
    let (writer, mut writer_task) = spawn_writer_task(write_half, config.writer.clone());
    let ctx = ConnectionContext::with_writer(id, writer.clone(), shared.clone());

    let mut session = Session {
        config: &config,
        callbacks: &callbacks,
        ctx: ctx.clone(),
        writer,
        shared: shared.clone(),
        decoder: FrameDecoder::new(config.decoder),
        assembler: MessageAssembler::new(config.max_message_size, config.utf8_policy),
    };

    let ending = session.read_loop(&mut reader, leftover, &mut shutdown).await;
    let graceful = ending.sends_close();
    let (result, reason, state) = session.finish(ending).await;
    drop(session);

    shared.set(state);
    callbacks.close(reason, ctx).await;

    // Release the write half: let a queued Close go out, then stop the task.
    if graceful {
        match tokio::time::timeout(config.close_timeout, &mut writer_task).await {
            Ok(Ok(Err(e))) => tracing::debug!("Writer task ended with error: {}", e),
            Ok(_) => {}
            Err(_) => {
                tracing::debug!("writer still busy after close, aborting");
                writer_task.abort();
            }
        }
    } else {
        writer_task.abort();
    }

    tracing::debug!(%state, "connection released");
    result
}

/// Resolve once `rx` holds `true`. Never resolves if the sender is gone.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Decoder session and collaborators owned by the read loop.
struct Session<'a> {
    config: &'a ServerConfig,
    callbacks: &'a Callbacks,
    ctx: ConnectionContext,
    writer: WriterHandle,
    shared: Arc<ConnectionShared>,
    decoder: FrameDecoder,
    assembler: MessageAssembler,
}

impl Session<'_> {
    async fn read_loop<R>(
        &mut self,
        reader: &mut R,
        leftover: Bytes,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Ending
    where
        R: AsyncRead + Unpin,
    {
        if let Some(ending) = self.on_chunk(&leftover).await {
            return ending;
        }

        let shared = self.shared.clone();
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];
        let mut watch_shutdown = true;
        let mut close_deadline: Option<Instant> = None;

        loop {
            if watch_shutdown && *shutdown.borrow() {
                let reason = CloseReason::new(CloseCode::GoingAway, "server shutting down");
                self.start_close(reason).await;
                return Ending::Shutdown;
            }

            if close_deadline.is_none() && shared.get() == ConnectionState::Closing {
                close_deadline = Some(Instant::now() + self.config.close_timeout);
            }

            let read = tokio::select! {
                changed = shutdown.changed(), if watch_shutdown => {
                    if changed.is_err() {
                        // Sender gone; nobody can ask for shutdown any more.
                        watch_shutdown = false;
                    }
                    continue;
                }
                _ = shared.close_requested(), if close_deadline.is_none() => continue,
                _ = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                    return Ending::CloseTimeout;
                }
                read = reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => return Ending::Eof,
                Ok(n) => {
                    if let Some(ending) = self.on_chunk(&buf[..n]).await {
                        return ending;
                    }
                }
                Err(e) => return Ending::Io(e),
            }
        }
    }

    /// Feed a chunk to the decoder, acting on each frame as it completes.
    async fn on_chunk(&mut self, mut data: &[u8]) -> Option<Ending> {
        while !data.is_empty() {
            let (consumed, signal) = self.decoder.feed(data);
            data = &data[consumed..];

            match signal {
                DecoderSignal::Incomplete => {}
                DecoderSignal::FrameComplete(frame) => {
                    if let Some(ending) = self.on_frame(frame).await {
                        return Some(ending);
                    }
                }
                DecoderSignal::ProtocolError(err) => return Some(Ending::Protocol(err)),
            }
        }
        None
    }

    async fn on_frame(&mut self, frame: Frame) -> Option<Ending> {
        let action = match frame.control_action() {
            Ok(Some(action)) => action,
            Ok(None) => return self.on_data(frame).await,
            Err(err) => return Some(Ending::Protocol(err)),
        };

        match action {
            ControlAction::Close(reason) => Some(self.on_peer_close(reason).await),
            ControlAction::Ping(payload) => {
                if self.config.auto_pong {
                    if let Err(e) = self.writer.send(OutboundFrame::pong(payload.clone())).await {
                        tracing::debug!("Failed to queue pong: {}", e);
                    }
                }
                self.callbacks.ping(payload, self.ctx.clone()).await;
                None
            }
            ControlAction::Pong(payload) => {
                self.callbacks.pong(payload, self.ctx.clone()).await;
                None
            }
        }
    }

    async fn on_data(&mut self, frame: Frame) -> Option<Ending> {
        match self.assembler.accept(frame) {
            MessageSignal::Pending => None,
            MessageSignal::MessageComplete(message) => {
                if self.config.debug() {
                    tracing::debug!(
                        kind = ?message.message_type,
                        len = message.len(),
                        "message complete"
                    );
                }
                self.callbacks.message(message, self.ctx.clone()).await;
                None
            }
            MessageSignal::Error(err) => Some(Ending::Protocol(err)),
        }
    }

    /// Answer the peer's Close, or accept it as the answer to ours.
    async fn on_peer_close(&mut self, reason: Option<CloseReason>) -> Ending {
        let code = reason.as_ref().map_or(CloseCode::Normal, |r| r.code);

        if self.start_close(CloseReason::new(code, "")).await {
            tracing::debug!(code = u16::from(code), "peer closed");
            Ending::PeerClosed(reason)
        } else {
            tracing::debug!(code = u16::from(code), "close acknowledged");
            Ending::CloseAcknowledged(reason)
        }
    }

    /// Queue a Close frame if nothing has been sent yet.
    ///
    /// Returns false when the connection was already closing.
    async fn start_close(&self, reason: CloseReason) -> bool {
        if !self
            .shared
            .transition(ConnectionState::Running, ConnectionState::Closing)
        {
            return false;
        }
        if let Err(e) = self.writer.send(OutboundFrame::close(Some(&reason))).await {
            tracing::debug!("Failed to queue close frame: {}", e);
        }
        true
    }

    /// Turn an ending into the result, the reason reported to `on_close`,
    /// and the final state.
    async fn finish(
        &mut self,
        ending: Ending,
    ) -> (Result<()>, Option<CloseReason>, ConnectionState) {
        self.assembler.reset();

        match ending {
            Ending::PeerClosed(reason) | Ending::CloseAcknowledged(reason) => {
                (Ok(()), reason, ConnectionState::Closed)
            }
            Ending::Shutdown => (
                Ok(()),
                Some(CloseReason::new(CloseCode::GoingAway, "server shutting down")),
                ConnectionState::Closed,
            ),
            Ending::CloseTimeout => {
                tracing::debug!("peer did not answer close within {:?}", self.config.close_timeout);
                (
                    Ok(()),
                    Some(CloseReason::new(CloseCode::Abnormal, "close timed out")),
                    ConnectionState::Closed,
                )
            }
            Ending::Eof => {
                tracing::debug!("peer disconnected without closing");
                (
                    Ok(()),
                    Some(CloseReason::new(CloseCode::Abnormal, "")),
                    ConnectionState::Closed,
                )
            }
            Ending::Protocol(err) => {
                tracing::warn!(error = %err, "protocol error, closing connection");
                let reason = CloseReason::new(err.close_code(), err.to_string());
                self.start_close(reason.clone()).await;
                (Err(err.into()), Some(reason), ConnectionState::Errored)
            }
            Ending::Io(e) => {
                tracing::debug!("Read error: {}", e);
                (
                    Err(e.into()),
                    Some(CloseReason::new(CloseCode::Abnormal, "")),
                    ConnectionState::Errored,
                )
            }
        }
    }
}
