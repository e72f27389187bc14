//! Fragment server - replies are sent as a series of small frames.
//!
//! This example demonstrates:
//! - Sending one message as several frames with `send_frame`
//! - Pinging the client from the message callback
//! - Logging pongs and frames (`debug` makes the decoder log every frame)
//!
//! # Running
//!
//! ```text
//! RUST_LOG=debug cargo run --example fragments
//! ```

use bytes::Bytes;
use sockwire::protocol::FrameType;
use sockwire::writer::OutboundFrame;
use sockwire::{ConnectionContext, Message, MessageType, Server};
use tracing_subscriber::EnvFilter;

/// Payload bytes per outgoing frame.
const FRAGMENT_SIZE: usize = 4;

async fn send_fragmented(message: Message, ctx: ConnectionContext) -> sockwire::error::Result<()> {
    let first_type = match message.message_type {
        MessageType::Text => FrameType::Text,
        MessageType::Binary => FrameType::Binary,
    };

    let payload: Bytes = message.payload;
    if payload.is_empty() {
        return ctx.send_frame(OutboundFrame::new(true, first_type, payload)).await;
    }

    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + FRAGMENT_SIZE).min(payload.len());
        let frame_type = if offset == 0 {
            first_type
        } else {
            FrameType::Continuation
        };
        let fin = end == payload.len();
        ctx.send_frame(OutboundFrame::new(fin, frame_type, payload.slice(offset..end)))
            .await?;
        offset = end;
    }

    ctx.ping("after-reply").await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = Server::builder()
        .debug(true)
        .max_message_size(1024 * 1024)
        .on_message(send_fragmented)
        .on_pong(|payload: Bytes, ctx: ConnectionContext| async move {
            tracing::info!(id = ctx.id(), len = payload.len(), "pong");
            Ok(())
        })
        .bind("127.0.0.1:9002")
        .await?;

    tracing::info!("fragment server on ws://{}", server.local_addr()?);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
