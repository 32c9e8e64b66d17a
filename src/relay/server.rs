//! WebSocket front end of the relay hub.
//!
//! # Connection Flow
//!
//! 1. Server binds to `localhost:0` (random port) and spawns an accept loop
//! 2. A half connects and upgrades to WebSocket
//! 3. Its first text frame is the [`Handshake`] (within 30s)
//! 4. The connection joins the hub as a [`WsPort`]
//! 5. Later frames go to [`RelayHub::message`]; socket end to
//!    [`RelayHub::disconnect`]

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{PortId, TabId};
use crate::transport::Socket;

use super::hub::{NoopInjector, RelayHub, ScriptInjector};
use super::port::Port;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost).
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Time a new connection has to send its handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Handshake
// ============================================================================

/// First frame sent by a half-connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Port name; a tab id for the devtools half.
    pub name: String,

    /// Tab the page half runs in.
    #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

impl Handshake {
    /// Handshake of the devtools half for `tab`.
    #[must_use]
    pub fn devtools(tab: TabId) -> Self {
        Self {
            name: tab.to_string(),
            tab_id: None,
        }
    }

    /// Handshake of the page half running in `tab`.
    #[must_use]
    pub fn page(tab: TabId) -> Self {
        Self {
            name: "page".to_owned(),
            tab_id: Some(tab),
        }
    }

    /// Converts to the wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!(self)
    }
}

// ============================================================================
// WsPort
// ============================================================================

/// Hub port backed by a WebSocket connection.
pub struct WsPort {
    id: PortId,
    handshake: Handshake,
    /// Outgoing frames; dropping it closes the socket.
    sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl fmt::Debug for WsPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsPort")
            .field("id", &self.id)
            .field("name", &self.handshake.name)
            .field("tab_id", &self.handshake.tab_id)
            .field("open", &self.sender.lock().is_some())
            .finish()
    }
}

impl WsPort {
    fn new(handshake: Handshake, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: PortId::generate(),
            handshake,
            sender: Mutex::new(Some(sender)),
        }
    }
}

impl Port for WsPort {
    fn id(&self) -> PortId {
        self.id
    }

    fn name(&self) -> &str {
        &self.handshake.name
    }

    fn sender_tab(&self) -> Option<TabId> {
        self.handshake.tab_id
    }

    fn post_message(&self, message: Value) {
        match self.sender.lock().as_ref() {
            Some(sender) => {
                let _ = sender.send(message.to_string());
            }
            None => trace!(port = %self.id, "Post to closed port ignored"),
        }
    }

    fn disconnect(&self) {
        if self.sender.lock().take().is_some() {
            debug!(port = %self.id, "Port disconnected by hub");
        }
    }
}

// ============================================================================
// RelayServer
// ============================================================================

/// WebSocket server feeding half-connections into a [`RelayHub`].
///
/// # Example
///
/// ```ignore
/// let server = RelayServer::new().await?;
/// println!("Relay at {}", server.ws_url());
/// ```
pub struct RelayServer {
    /// Bound address.
    addr: SocketAddr,

    hub: Arc<RelayHub>,

    /// Shutdown flag.
    shutdown: AtomicBool,

    /// Wakes the accept loop on shutdown.
    shutdown_signal: Notify,
}

impl fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayServer")
            .field("addr", &self.addr)
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RelayServer - Constructor
// ============================================================================

impl RelayServer {
    /// Binds to `localhost:0` (random port) with no script injection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn new() -> Result<Arc<Self>> {
        Self::bind(DEFAULT_BIND_IP, 0).await
    }

    /// Binds to a specific IP and port (0 for random).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Arc<Self>> {
        Self::bind_with_injector(ip, port, NoopInjector).await
    }

    /// Binds with a custom script injector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_with_injector(
        ip: IpAddr,
        port: u16,
        injector: impl ScriptInjector,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let addr = listener.local_addr()?;

        debug!(%addr, "Relay WebSocket server bound");

        let server = Arc::new(Self {
            addr,
            hub: Arc::new(RelayHub::new(injector)),
            shutdown: AtomicBool::new(false),
            shutdown_signal: Notify::new(),
        });

        tokio::spawn(Arc::clone(&server).accept_loop(listener));

        info!(%addr, "RelayServer started");

        Ok(server)
    }
}

// ============================================================================
// RelayServer - Public API
// ============================================================================

impl RelayServer {
    /// Returns the WebSocket URL, e.g. `ws://127.0.0.1:{port}`.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns the hub.
    #[inline]
    #[must_use]
    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }

    /// Stops accepting and disconnects every registered half.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("RelayServer shutting down");
        // Stores a permit if the loop is between the flag check and `notified()`.
        self.shutdown_signal.notify_one();
        self.hub.shutdown();
    }
}

// ============================================================================
// RelayServer - Accept Loop
// ============================================================================

impl RelayServer {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                () = self.shutdown_signal.notified() => break,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        match server.handle_connection(stream, addr).await {
                            Ok(()) => {}
                            Err(e) if e.is_timeout() => debug!(%addr, "Handshake timed out"),
                            Err(e) => warn!(error = %e, %addr, "Connection handling failed"),
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Serves one half-connection until its socket ends.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(%addr, "New TCP connection");

        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let Socket {
            sender,
            mut receiver,
        } = Socket::from_websocket(ws_stream);

        let first = timeout(HANDSHAKE_TIMEOUT, receiver.recv())
            .await
            .map_err(|_| Error::connection_timeout(HANDSHAKE_TIMEOUT.as_millis() as u64))?
            .ok_or(Error::ConnectionClosed)?;
        let handshake: Handshake = serde_json::from_str(&first)
            .map_err(|e| Error::invalid_handshake(first.clone(), e.to_string()))?;

        info!(%addr, name = %handshake.name, tab = ?handshake.tab_id, "Handshake received");

        let port = Arc::new(WsPort::new(handshake, sender));
        let port_id = port.id();
        self.hub.connect(port).await?;

        while let Some(frame) = receiver.recv().await {
            match serde_json::from_str::<Value>(&frame) {
                Ok(message) => self.hub.message(port_id, message),
                Err(e) => warn!(port = %port_id, error = %e, "Dropping non-JSON frame"),
            }
        }

        debug!(port = %port_id, %addr, "Socket closed");
        self.hub.disconnect(port_id);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::relay::SessionState;
    use crate::transport::{Connector, WebSocketConnector};

    const TAB: TabId = TabId::new(42);

    async fn join(server: &RelayServer, handshake: Handshake) -> Socket {
        let connector = WebSocketConnector::new(&server.ws_url()).expect("url");
        let socket = connector.connect().await.expect("connect");
        socket
            .sender
            .send(handshake.to_value().to_string())
            .expect("handshake");
        socket
    }

    async fn wait_for_state(server: &RelayServer, expected: Option<SessionState>) {
        timeout(Duration::from_secs(5), async {
            while server.hub().session_state(TAB) != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session state reached");
    }

    #[test]
    fn test_handshake_wire_format() {
        assert_eq!(Handshake::devtools(TAB).to_value(), json!({ "name": "42" }));
        assert_eq!(
            Handshake::page(TAB).to_value(),
            json!({ "name": "page", "tabId": 42 })
        );

        let parsed: Handshake =
            serde_json::from_value(json!({ "name": "backend", "tabId": 3 })).expect("parse");
        assert_eq!(parsed.tab_id, Some(TabId::new(3)));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = RelayServer::new().await.expect("server");
        assert!(server.port() > 0);
        assert_eq!(server.ws_url(), format!("ws://127.0.0.1:{}", server.port()));
        assert_eq!(server.hub().session_count(), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_pipes_between_halves() {
        let server = RelayServer::new().await.expect("server");

        let mut devtools = join(&server, Handshake::devtools(TAB)).await;
        wait_for_state(&server, Some(SessionState::AwaitingPage)).await;
        let mut page = join(&server, Handshake::page(TAB)).await;
        wait_for_state(&server, Some(SessionState::Piped)).await;

        page.sender
            .send(json!({ "event": "flush", "payload": "x" }).to_string())
            .expect("send");
        let frame = timeout(Duration::from_secs(5), devtools.receiver.recv())
            .await
            .expect("in time")
            .expect("frame");
        assert_eq!(
            serde_json::from_str::<Value>(&frame).expect("json"),
            json!({ "event": "flush", "payload": "x" })
        );

        devtools.sender.send(json!("init").to_string()).expect("send");
        let frame = timeout(Duration::from_secs(5), page.receiver.recv())
            .await
            .expect("in time")
            .expect("frame");
        assert_eq!(frame, r#""init""#);

        drop(devtools);
        let end = timeout(Duration::from_secs(5), page.receiver.recv())
            .await
            .expect("page closed in time");
        assert_eq!(end, None);
        wait_for_state(&server, None).await;

        server.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_handshake_closes_socket() {
        let server = RelayServer::new().await.expect("server");
        let connector = WebSocketConnector::new(&server.ws_url()).expect("url");
        let mut socket = connector.connect().await.expect("connect");

        socket.sender.send("not json".into()).expect("send");
        let end = timeout(Duration::from_secs(5), socket.receiver.recv())
            .await
            .expect("closed in time");
        assert_eq!(end, None);
        assert_eq!(server.hub().port_count(), 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_halves() {
        let server = RelayServer::new().await.expect("server");
        let mut devtools = join(&server, Handshake::devtools(TAB)).await;
        wait_for_state(&server, Some(SessionState::AwaitingPage)).await;

        server.shutdown();
        let end = timeout(Duration::from_secs(5), devtools.receiver.recv())
            .await
            .expect("closed in time");
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_shutdown_releases_listener() {
        let server = RelayServer::new().await.expect("server");
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, server.port()));

        server.shutdown();
        timeout(Duration::from_secs(5), async {
            while TcpStream::connect(addr).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("listener closed");
    }

    #[tokio::test]
    async fn test_plain_http_is_websocket_error() {
        use tokio::io::AsyncWriteExt;

        let server = RelayServer::new().await.expect("server");
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.expect("bind");
        let local = listener.local_addr().expect("addr");

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(local).await.expect("connect");
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .expect("write");
            stream
        });
        let (stream, peer) = listener.accept().await.expect("accept");

        let err = server.handle_connection(stream, peer).await.unwrap_err();
        assert!(matches!(err, Error::WebSocket(_)));
        assert!(err.is_connection_error());

        drop(client.await);
        server.shutdown();
    }
}
