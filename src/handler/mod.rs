//! Handler module - application callbacks and the context they receive.
//!
//! Provides:
//! - [`Callbacks`] - the async closures run for messages, pings, pongs and close
//! - [`ConnectionContext`] - lets callbacks send messages and close
//!
//! # Example
//!
//! ```ignore
//! use sockwire::handler::Callbacks;
//! use sockwire::protocol::CloseCode;
//!
//! let callbacks = Callbacks::new().on_message(|message, ctx| async move {
//!     if message.as_text() == Some("bye") {
//!         return ctx.close(CloseCode::Normal, "bye").await;
//!     }
//!     ctx.send_bytes(message.payload).await
//! });
//! ```

mod callbacks;
mod context;

pub use callbacks::{BoxFuture, Callbacks, Handler, HandlerResult};
pub use context::ConnectionContext;
