//! Server builder and accept loop.
//!
//! The [`ServerBuilder`] provides a fluent API for configuring callbacks and
//! limits. The [`Server`] manages the lifecycle:
//! 1. Bind a TCP listener
//! 2. Accept connections, one task each
//! 3. Run the handshake and read loop per connection
//! 4. On shutdown, stop accepting and close every connection with 1001
//!
//! # Example
//!
//! ```ignore
//! use sockwire::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .on_message(|message, ctx| async move {
//!             ctx.send_bytes(message.payload).await
//!         })
//!         .bind("127.0.0.1:9001")
//!         .await?;
//!
//!     let shutdown = server.shutdown_handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.shutdown();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::{ServerConfig, Utf8Policy};
use crate::connection::{serve_connection, shutdown_requested};
use crate::error::{Result, SockwireError};
use crate::handler::{Callbacks, ConnectionContext, HandlerResult};
use crate::protocol::{CloseReason, Message};
use crate::writer::WriterConfig;

/// Builder for configuring and creating a server.
///
/// Register callbacks and adjust limits, then call `bind()`.
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    callbacks: Callbacks,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every complete message, in wire order.
    pub fn on_message<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Message, ConnectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.callbacks = self.callbacks.on_message(handler);
        self
    }

    /// Called once per connection when it ends.
    pub fn on_close<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Option<CloseReason>, ConnectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.callbacks = self.callbacks.on_close(handler);
        self
    }

    /// Called for every Ping received.
    pub fn on_ping<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Bytes, ConnectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.callbacks = self.callbacks.on_ping(handler);
        self
    }

    /// Called for every Pong received.
    pub fn on_pong<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Bytes, ConnectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.callbacks = self.callbacks.on_pong(handler);
        self
    }

    /// Replace all callbacks at once.
    pub fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum accepted frame payload.
    ///
    /// Default: 64 MB
    pub fn max_payload_size(mut self, size: u64) -> Self {
        self.config.decoder.max_payload_size = size;
        self
    }

    /// Set the maximum accepted reassembled message.
    ///
    /// Default: 64 MB
    pub fn max_message_size(mut self, size: u64) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Answer Pings automatically.
    ///
    /// Default: true
    pub fn auto_pong(mut self, enabled: bool) -> Self {
        self.config.auto_pong = enabled;
        self
    }

    /// Choose what happens to text messages that are not UTF-8.
    ///
    /// Default: `Utf8Policy::Deliver`
    pub fn utf8_policy(mut self, policy: Utf8Policy) -> Self {
        self.config.utf8_policy = policy;
        self
    }

    /// Log every decoded frame at debug level.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.decoder.debug = enabled;
        self
    }

    /// Set the socket read buffer size.
    ///
    /// Default: 64 KB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the limit on the HTTP upgrade request head.
    ///
    /// Default: 8 KB
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.config.max_handshake_size = size;
        self
    }

    /// How long a new connection may take to send its upgrade request.
    ///
    /// Default: 10s
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// How long a close started by this side waits for the peer's Close.
    ///
    /// Default: 5s
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Set the maximum pending outbound frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5s
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Replace the writer task configuration.
    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.config.writer = config;
        self
    }

    /// Bind a TCP listener and build the server.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        Ok(self.listen(listener))
    }

    /// Build the server around an already bound listener.
    pub fn listen(self, listener: TcpListener) -> Server {
        let (shutdown_tx, _) = watch::channel(false);
        Server {
            listener,
            config: Arc::new(self.config),
            callbacks: self.callbacks,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }
}

/// A bound WebSocket server.
///
/// Use `run()` to accept connections until `shutdown_handle().shutdown()`.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    callbacks: Callbacks,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Configuration shared by every connection.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle for stopping the server from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept connections until shutdown.
    ///
    /// Every connection runs in its own task; one connection failing does
    /// not affect the others. After shutdown, returns once every connection
    /// task has finished.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tasks = JoinSet::new();

        tracing::info!(addr = ?self.listener.local_addr().ok(), "server listening");

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Failed to set TCP_NODELAY: {}", e);
                    }

                    let config = self.config.clone();
                    let callbacks = self.callbacks.clone();
                    let shutdown = self.shutdown_tx.subscribe();
                    tasks.spawn(
                        async move {
                            match serve_connection(stream, config, callbacks, shutdown).await {
                                Ok(()) => {}
                                Err(SockwireError::Handshake(e)) => {
                                    tracing::debug!("Handshake rejected: {}", e);
                                }
                                Err(e) => tracing::warn!("Connection error: {}", e),
                            }
                        }
                        .instrument(tracing::info_span!("client", %peer)),
                    );
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        tracing::info!(connections = tasks.len(), "server shutting down");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Connection task failed: {}", e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("config", &self.config)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Cloneable handle that stops a running [`Server`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stop accepting and close every connection with 1001.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_config() {
        let builder = ServerBuilder::new()
            .max_payload_size(1024)
            .max_message_size(4096)
            .auto_pong(false)
            .utf8_policy(Utf8Policy::Reject)
            .debug(true)
            .close_timeout(Duration::from_millis(250))
            .handshake_timeout(Duration::from_secs(1))
            .max_pending_frames(8);

        let config = &builder.config;
        assert_eq!(config.decoder.max_payload_size, 1024);
        assert!(config.decoder.mask_required);
        assert_eq!(config.max_message_size, 4096);
        assert!(!config.auto_pong);
        assert_eq!(config.utf8_policy, Utf8Policy::Reject);
        assert!(config.debug());
        assert_eq!(config.close_timeout, Duration::from_millis(250));
        assert_eq!(config.handshake_timeout, Duration::from_secs(1));
        assert_eq!(config.writer.max_pending_frames, 8);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_server() {
        let server = Server::builder().bind("127.0.0.1:0").await.unwrap();
        assert!(server.local_addr().unwrap().port() > 0);

        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.run());

        assert!(!handle.is_shutdown());
        handle.shutdown();
        assert!(handle.is_shutdown());

        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_with_silent_client() {
        let server = Server::builder().bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.run());

        // Connected, but the upgrade request never comes.
        let _client = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        tokio::time::timeout(Duration::from_secs(3), running)
            .await
            .expect("run() still waiting on the handshake")
            .unwrap()
            .unwrap();
    }
}
