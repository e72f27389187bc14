//! Echo server - every message is sent straight back.
//!
//! This example demonstrates:
//! - Building a server with the builder pattern
//! - Replying from the `on_message` callback
//! - Stopping the server with Ctrl+C (connections get a 1001 Close)
//!
//! # Running
//!
//! ```text
//! RUST_LOG=sockwire=debug cargo run --example echo
//! ```
//!
//! Then connect with any WebSocket client, e.g. `websocat ws://127.0.0.1:9001`.

use sockwire::{CloseReason, ConnectionContext, Message, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = Server::builder()
        .on_message(|message: Message, ctx: ConnectionContext| async move {
            match message.as_text() {
                Some(text) => ctx.send_text(text).await,
                None => ctx.send_bytes(message.payload).await,
            }
        })
        .on_close(|reason: Option<CloseReason>, ctx: ConnectionContext| async move {
            tracing::info!(id = ctx.id(), ?reason, "connection closed");
            Ok(())
        })
        .bind("127.0.0.1:9001")
        .await?;

    tracing::info!("echo server on ws://{}", server.local_addr()?);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
