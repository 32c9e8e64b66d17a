//! Socket abstraction and WebSocket event loop.
//!
//! A [`Socket`] is one live duplex connection seen as two channels of text
//! frames. For WebSockets a spawned event loop moves frames between the
//! channels and the stream:
//!
//! - Incoming text frames are forwarded to the inbound channel
//! - Outgoing frames are written in FIFO order
//! - Dropping the outbound sender closes the WebSocket
//! - The inbound channel ends when the WebSocket closes

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Socket
// ============================================================================

/// One live duplex connection carrying text frames.
#[derive(Debug)]
pub struct Socket {
    /// Outgoing frames. Dropping it closes the connection.
    pub sender: mpsc::UnboundedSender<String>,
    /// Incoming frames. `None` from `recv` means the connection closed.
    pub receiver: mpsc::UnboundedReceiver<String>,
}

impl Socket {
    /// Creates a socket from its channel ends.
    #[inline]
    #[must_use]
    pub fn new(sender: mpsc::UnboundedSender<String>, receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Self { sender, receiver }
    }

    /// Creates two in-memory sockets connected to each other.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    /// Wraps a WebSocket stream, spawning its event loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_websocket<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_event_loop(ws_stream, outbound_rx, inbound_tx));

        Self::new(outbound_tx, inbound_rx)
    }
}

/// Event loop that handles WebSocket I/O.
async fn run_event_loop<S>(
    ws_stream: WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            // Incoming frames from the peer
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if inbound.send(text.to_string()).is_err() {
                            debug!("Socket owner gone, closing");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            // Outgoing frames from the owner
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            warn!(error = %e, "Failed to send frame");
                            break;
                        }
                        trace!("Frame sent");
                    }

                    None => {
                        debug!("Socket closed locally");
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }

    debug!("Event loop terminated");
}

// ============================================================================
// Connector
// ============================================================================

/// Opens new connections for a reconnecting transport.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Attempts one connection.
    ///
    /// # Errors
    ///
    /// Any error counts as a failed attempt and triggers backoff.
    async fn connect(&self) -> Result<Socket>;
}

// ============================================================================
// WebSocketConnector
// ============================================================================

/// Connects to a WebSocket URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    /// Creates a connector for `url`.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the URL does not parse
    /// - [`Error::Config`] if the scheme is not `ws` or `wss`
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(Error::config(format!(
                "WebSocket URL must use ws or wss, got '{other}'"
            ))),
        }
    }

    /// Returns the target URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Socket> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::connection(format!("{}: {e}", self.url)))?;

        debug!(url = %self.url, "WebSocket connected");
        Ok(Socket::from_websocket(ws_stream))
    }
}

// ============================================================================
// Tests
// ============================================================================
