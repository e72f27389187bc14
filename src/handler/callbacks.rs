//! Application callbacks for connection events.
//!
//! Callbacks are async closures taking the event payload and a
//! [`ConnectionContext`]. Each is optional; a missing callback ignores the
//! event.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::handler::Callbacks;
//!
//! let callbacks = Callbacks::new()
//!     .on_message(|message, ctx| async move {
//!         ctx.send_bytes(message.payload).await
//!     })
//!     .on_close(|reason, ctx| async move {
//!         tracing::info!(id = ctx.id(), ?reason, "closed");
//!         Ok(())
//!     });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use super::ConnectionContext;
use crate::error::Result;
use crate::protocol::{CloseReason, Message};

/// Result type for callback functions.
pub type HandlerResult = Result<()>;

/// Boxed future for callback results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for event callbacks taking an event payload of type `T`.
pub trait Handler<T>: Send + Sync + 'static {
    fn call(&self, event: T, ctx: ConnectionContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, T, Fut> Handler<T> for F
where
    F: Fn(T, ConnectionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, event: T, ctx: ConnectionContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(event, ctx))
    }
}

/// The set of callbacks a server runs for every connection.
///
/// Cheap to clone; every connection task holds its own clone.
#[derive(Clone, Default)]
pub struct Callbacks {
    message: Option<Arc<dyn Handler<Message>>>,
    close: Option<Arc<dyn Handler<Option<CloseReason>>>>,
    ping: Option<Arc<dyn Handler<Bytes>>>,
    pong: Option<Arc<dyn Handler<Bytes>>>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_message", &self.message.is_some())
            .field("on_close", &self.close.is_some())
            .field("on_ping", &self.ping.is_some())
            .field("on_pong", &self.pong.is_some())
            .finish()
    }
}

impl Callbacks {
    /// Create an empty callback set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every complete message, in wire order. The next frame is
    /// not processed until the returned future resolves.
    pub fn on_message<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Message, ConnectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.message = Some(Arc::new(handler));
        self
    }

    /// Called once when the connection ends, with the close status if one
    /// is known.
    pub fn on_close<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Option<CloseReason>, ConnectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.close = Some(Arc::new(handler));
        self
    }

    /// Called for every Ping, after the automatic Pong (if enabled) is queued.
    pub fn on_ping<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Bytes, ConnectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.ping = Some(Arc::new(handler));
        self
    }

    /// Called for every Pong.
    pub fn on_pong<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Bytes, ConnectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.pong = Some(Arc::new(handler));
        self
    }

    pub(crate) async fn message(&self, message: Message, ctx: ConnectionContext) {
        dispatch("on_message", self.message.as_deref(), message, ctx).await
    }

    pub(crate) async fn close(&self, reason: Option<CloseReason>, ctx: ConnectionContext) {
        dispatch("on_close", self.close.as_deref(), reason, ctx).await
    }

    pub(crate) async fn ping(&self, payload: Bytes, ctx: ConnectionContext) {
        dispatch("on_ping", self.ping.as_deref(), payload, ctx).await
    }

    pub(crate) async fn pong(&self, payload: Bytes, ctx: ConnectionContext) {
        dispatch("on_pong", self.pong.as_deref(), payload, ctx).await
    }
}

/// Run a callback if one is registered. Callback errors are logged and do
/// not end the connection.
async fn dispatch<T: 'static>(
    name: &'static str,
    handler: Option<&dyn Handler<T>>,
    event: T,
    ctx: ConnectionContext,
) {
    let handler = match handler {
        Some(h) => h,
        None => return,
    };

    let id = ctx.id();
    if let Err(e) = handler.call(event, ctx).await {
        tracing::warn!(connection = id, callback = name, "Callback error: {}", e);
    }
}
