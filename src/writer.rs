//! Per-connection writer task.
//!
//! The write half of a connection belongs to a single task fed by an mpsc
//! channel. The read loop, callbacks and any application task hold clones
//! of [`WriterHandle`]; the socket itself is never shared.
//!
//! ```text
//! read loop  ─┐
//! callback 1 ─┼─► mpsc::Sender<OutboundFrame> ─► writer task ─► write half
//! callback N ─┘
//! ```
//!
//! Frames already queued when the task wakes go out in one vectored write.
//! A Close frame is always the last thing written: the task shuts the write
//! half down right after it and discards anything queued behind it.

use std::io::{self, IoSlice};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, SockwireError};
use crate::protocol::{encode_header, CloseReason, EncodedHeader, FrameType};

/// Queued frames at which senders start to wait.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// How long a sender waits for the queue to drain.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on frames per vectored write.
const MAX_BATCH_SIZE: usize = 64;

const BACKPRESSURE_POLL: Duration = Duration::from_micros(100);

/// A frame ready to be written. Server frames are never masked.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded header (2 to 10 bytes).
    pub header: EncodedHeader,
    pub payload: Bytes,
    frame_type: FrameType,
}

impl OutboundFrame {
    /// Frame with an explicit FIN bit, e.g. one fragment of a message.
    #[inline]
    pub fn new(fin: bool, frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            header: encode_header(fin, frame_type, payload.len() as u64, None),
            payload,
            frame_type,
        }
    }

    /// Unfragmented text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(true, FrameType::Text, Bytes::from(text.into()))
    }

    /// Unfragmented binary frame.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, FrameType::Binary, payload.into())
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, FrameType::Ping, payload.into())
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, FrameType::Pong, payload.into())
    }

    /// Close frame; `None` sends an empty payload.
    pub fn close(reason: Option<&CloseReason>) -> Self {
        let payload = reason.map(CloseReason::encode).unwrap_or_default();
        Self::new(true, FrameType::Close, payload)
    }

    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    #[inline]
    pub fn is_close(&self) -> bool {
        self.frame_type == FrameType::Close
    }

    /// Bytes this frame occupies on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    /// Header, then payload; empty parts skipped.
    fn parts(&self) -> impl Iterator<Item = &[u8]> {
        [self.header.as_slice(), self.payload.as_ref()]
            .into_iter()
            .filter(|part| !part.is_empty())
    }
}

/// Writer task settings.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Queued frames at which `send` starts to wait.
    pub max_pending_frames: usize,
    pub channel_capacity: usize,
    /// How long `send` waits before giving up with `BackpressureTimeout`.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Sending side of a connection's writer task. Clones share one queue.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    /// Frames accepted but not yet written.
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle")
            .field("pending", &self.pending_count())
            .field("max_pending", &self.max_pending)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Queue a frame for writing.
    ///
    /// While the queue is full this waits for it to drain, up to the
    /// configured backpressure timeout.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` if the queue stays full, `ConnectionClosed` once
    /// the writer task has stopped.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            self.wait_for_capacity().await?;
        }

        // Counted before the send so the writer never decrements first.
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).await.map_err(|_| {
            self.release();
            SockwireError::ConnectionClosed
        })
    }

    /// Queue a frame only if there is room right now.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            return Err(SockwireError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(frame).map_err(|e| {
            self.release();
            match e {
                mpsc::error::TrySendError::Full(_) => SockwireError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => SockwireError::ConnectionClosed,
            }
        })
    }

    async fn wait_for_capacity(&self) -> Result<()> {
        let drained = async {
            while self.is_backpressure_active() {
                tokio::time::sleep(BACKPRESSURE_POLL).await;
            }
        };

        tokio::time::timeout(self.timeout, drained).await.map_err(|_| {
            tracing::warn!(
                pending = self.pending_count(),
                "write queue still full after {:?}",
                self.timeout
            );
            SockwireError::BackpressureTimeout
        })
    }

    fn release(&self) {
        self.pending.fetch_sub(1, Ordering::Release);
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending_count() >= self.max_pending
    }

    /// Frames accepted but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the writer task has stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Start the writer task for `writer`.
///
/// The task ends after writing a Close frame, or once every handle is
/// dropped.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let (batch, closing) = collect_batch(first, &mut rx);

        let result = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(batch.len(), Ordering::Release);
        result?;

        if closing {
            rx.close();
            let dropped = std::iter::from_fn(|| rx.try_recv().ok()).count();
            if dropped > 0 {
                pending.fetch_sub(dropped, Ordering::Release);
                tracing::debug!(dropped, "frames queued after close were discarded");
            }
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Failed to shut down write half: {}", e);
            }
            return Ok(());
        }
    }
    Ok(())
}

/// Take `first` plus whatever is already queued, stopping at a Close frame.
fn collect_batch(
    first: OutboundFrame,
    rx: &mut mpsc::Receiver<OutboundFrame>,
) -> (Vec<OutboundFrame>, bool) {
    let mut closing = first.is_close();
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    batch.push(first);

    while !closing && batch.len() < MAX_BATCH_SIZE {
        let Ok(frame) = rx.try_recv() else { break };
        closing = frame.is_close();
        batch.push(frame);
    }
    (batch, closing)
}

/// Write every frame of `batch`, resuming after short writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut written = 0;

    while written < total {
        let slices = unwritten_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices covering `batch` minus its first `offset` bytes.
fn unwritten_slices(batch: &[OutboundFrame], mut offset: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);

    for part in batch.iter().flat_map(OutboundFrame::parts) {
        if offset >= part.len() {
            offset -= part.len();
            continue;
        }
        slices.push(IoSlice::new(&part[offset..]));
        offset = 0;
    }
    slices
}
