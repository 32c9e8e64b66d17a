//! Transport that reconnects with exponential backoff.
//!
//! # State Machine
//!
//! ```text
//! Connecting ──► Connected ──► Disconnected ──(backoff)──► Connecting ...
//!      │                             ▲
//!      └────────── failure ──────────┘
//!
//! Disconnected ──(max retries)──► GivenUp
//! close() from any state ──► Closed
//! ```
//!
//! Every open hands out a [`ConnectionHandle`] bound to that connection's
//! [`Generation`]. Once a newer connection exists, the old handle's
//! `send`/`close` do nothing.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::bridge::{Wall, WallHandler};
use crate::error::Result;
use crate::identifiers::Generation;

use super::connection::{Connector, Socket};
use super::options::ReconnectOptions;

// ============================================================================
// Types
// ============================================================================

/// Called with a handle to each newly opened connection.
pub type OpenHandler = Arc<dyn Fn(ConnectionHandle) + Send + Sync>;

/// Called on the first close after an open (or after start).
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;

/// Called when a retry is scheduled: `(attempt, delay)`, attempt starting at 1.
pub type RetryHandler = Arc<dyn Fn(u32, Duration) + Send + Sync>;

type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; a retry may be pending.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Live connection.
    Connected,
    /// Retry limit reached; no further attempts.
    GivenUp,
    /// Closed by the owner.
    Closed,
}

impl ConnectionState {
    /// Returns `true` for states with no further automatic transitions.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::GivenUp | Self::Closed)
    }
}

// ============================================================================
// TransportState
// ============================================================================

/// The connection currently in use.
struct LiveConnection {
    sender: mpsc::UnboundedSender<String>,
    /// Wakes the serve loop when a handle closes this connection.
    kill: Arc<Notify>,
}

struct TransportState {
    connection: ConnectionState,
    /// Generation of the most recent open.
    generation: Generation,
    live: Option<LiveConnection>,
    /// Consecutive failures since the last received message.
    retry_count: u32,
    /// Whether `on_close` already fired for the current outage.
    close_notified: bool,
    /// Messages sent while not connected.
    outbox: VecDeque<Value>,
    started: bool,
}

#[derive(Default)]
struct Handlers {
    on_open: Option<OpenHandler>,
    on_close: Option<CloseHandler>,
    on_retry: Option<RetryHandler>,
    on_message: Option<MessageHandler>,
}

struct TransportInner {
    connector: Arc<dyn Connector>,
    options: ReconnectOptions,
    state: Mutex<TransportState>,
    handlers: Mutex<Handlers>,
    /// Wakes the driver task on `close()`.
    shutdown: Notify,
}

// ============================================================================
// ReconnectingTransport
// ============================================================================

/// Duplex transport that survives connection loss.
///
/// Cloning yields another handle to the same transport. The driver task
/// keeps running until [`close`](Self::close) or until it gives up.
///
/// # Example
///
/// ```ignore
/// let connector = WebSocketConnector::new("ws://127.0.0.1:8098")?;
/// let transport = ReconnectingTransport::new(connector, ReconnectOptions::default())?;
/// transport.on_open(|handle| handle.send(json!("init")));
/// transport.start();
/// let bridge = Bridge::new(Arc::new(transport.clone()));
/// ```
#[derive(Clone)]
pub struct ReconnectingTransport {
    inner: Arc<TransportInner>,
}

impl fmt::Debug for ReconnectingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ReconnectingTransport")
            .field("state", &state.connection)
            .field("generation", &state.generation)
            .field("retry_count", &state.retry_count)
            .field("pending", &state.outbox.len())
            .finish_non_exhaustive()
    }
}

impl ReconnectingTransport {
    /// Creates a transport. Nothing connects until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the options are invalid.
    pub fn new(connector: impl Connector, options: ReconnectOptions) -> Result<Self> {
        options.validate()?;

        Ok(Self {
            inner: Arc::new(TransportInner {
                connector: Arc::new(connector),
                options,
                state: Mutex::new(TransportState {
                    connection: ConnectionState::Disconnected,
                    generation: Generation::default(),
                    live: None,
                    retry_count: 0,
                    close_notified: false,
                    outbox: VecDeque::new(),
                    started: false,
                }),
                handlers: Mutex::new(Handlers::default()),
                shutdown: Notify::new(),
            }),
        })
    }

    /// Sets the open callback.
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn(ConnectionHandle) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().on_open = Some(Arc::new(handler));
    }

    /// Sets the close callback.
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.handlers.lock().on_close = Some(Arc::new(handler));
    }

    /// Sets the retry-scheduled callback.
    pub fn on_retry<F>(&self, handler: F)
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().on_retry = Some(Arc::new(handler));
    }

    /// Spawns the connection driver. Later calls are ignored.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.started || state.connection == ConnectionState::Closed {
                warn!("Transport already started or closed");
                return;
            }
            state.started = true;
        }

        tokio::spawn(Arc::clone(&self.inner).run());
    }

    /// Sends on the live connection, or keeps the message in the outbox.
    pub fn send(&self, message: Value) {
        self.inner.send(message);
    }

    /// Tears the transport down for good.
    ///
    /// Drops the live connection and the outbox; no retry follows.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.connection == ConnectionState::Closed {
                return;
            }
            state.connection = ConnectionState::Closed;
            state.live = None;
            let dropped = state.outbox.len();
            state.outbox.clear();
            if dropped > 0 {
                debug!(dropped, "Outbox cleared on close");
            }
        }
        self.inner.shutdown.notify_one();
        info!("Transport closed");
    }
}

// ============================================================================
// ReconnectingTransport - Accessors
// ============================================================================

impl ReconnectingTransport {
    /// Returns the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    /// Returns the consecutive failure count.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.state.lock().retry_count
    }

    /// Returns the generation of the latest connection.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.inner.state.lock().generation
    }

    /// Returns a copy of the messages waiting for a connection.
    #[must_use]
    pub fn pending_messages(&self) -> Vec<Value> {
        self.inner.state.lock().outbox.iter().cloned().collect()
    }

    /// Returns the options in use.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ReconnectOptions {
        &self.inner.options
    }
}

impl Wall for ReconnectingTransport {
    fn listen(&self, handler: WallHandler) {
        self.inner.handlers.lock().on_message = Some(Arc::from(handler));
    }

    fn send(&self, message: Value) {
        self.inner.send(message);
    }
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Access to one specific connection.
///
/// Operations are ignored once the transport has moved on to a newer
/// connection or closed.
#[derive(Clone)]
pub struct ConnectionHandle {
    generation: Generation,
    inner: Arc<TransportInner>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("generation", &self.generation)
            .field("live", &self.is_live())
            .finish()
    }
}

impl ConnectionHandle {
    /// Generation this handle is bound to.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns `true` while this is the live connection.
    #[must_use]
    pub fn is_live(&self) -> bool {
        let state = self.inner.state.lock();
        state.generation == self.generation && state.live.is_some()
    }

    /// Sends on this connection; no-op if stale.
    pub fn send(&self, message: Value) {
        let state = self.inner.state.lock();
        if state.generation != self.generation {
            trace!(handle = %self.generation, live = %state.generation, "Stale send ignored");
            return;
        }

        match &state.live {
            Some(live) => {
                let _ = live.sender.send(message.to_string());
            }
            None => trace!(handle = %self.generation, "Send on closed connection ignored"),
        }
    }

    /// Closes this connection; no-op if stale.
    ///
    /// The transport treats this like a remote close and reconnects.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.generation != self.generation {
            trace!(handle = %self.generation, "Stale close ignored");
            return;
        }
        if let Some(live) = state.live.take() {
            debug!(generation = %self.generation, "Connection closed by handle");
            live.kill.notify_one();
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

impl TransportInner {
    async fn run(self: Arc<Self>) {
        debug!("Transport driver started");

        loop {
            if !self.begin_attempt() {
                break;
            }

            let attempt = tokio::select! {
                result = self.connector.connect() => Some(result),
                () = self.shutdown.notified() => None,
            };
            let Some(result) = attempt else {
                break;
            };

            match result {
                Ok(socket) => {
                    if !self.serve(socket).await {
                        break;
                    }
                }
                Err(e) => debug!(error = %e, "Connection attempt failed"),
            }

            let Some((attempt, delay)) = self.schedule_retry() else {
                break;
            };

            tokio::select! {
                () = sleep(delay) => {}
                () = self.shutdown.notified() => break,
            }
            trace!(attempt, "Retrying connection");
        }

        debug!("Transport driver terminated");
    }

    /// Runs one open connection until it ends.
    ///
    /// Returns `false` if the transport was closed meanwhile.
    async fn serve(self: &Arc<Self>, socket: Socket) -> bool {
        let Socket { sender, mut receiver } = socket;
        let kill = Arc::new(Notify::new());

        let Some(handle) = self.open(sender, Arc::clone(&kill)) else {
            return false;
        };
        let generation = handle.generation;

        let on_open = self.handlers.lock().on_open.clone();
        if let Some(on_open) = on_open {
            on_open(handle);
        }
        self.flush_outbox(generation);

        loop {
            tokio::select! {
                frame = receiver.recv() => match frame {
                    Some(text) => self.receive(&text),
                    None => break,
                },
                () = kill.notified() => break,
                () = self.shutdown.notified() => return false,
            }
        }

        let mut state = self.state.lock();
        if state.generation == generation {
            state.live = None;
        }
        state.connection != ConnectionState::Closed
    }

    /// Marks the transport as connecting unless it was closed.
    fn begin_attempt(&self) -> bool {
        let mut state = self.state.lock();
        if state.connection == ConnectionState::Closed {
            return false;
        }
        state.connection = ConnectionState::Connecting;
        true
    }

    /// Installs a new live connection.
    fn open(
        self: &Arc<Self>,
        sender: mpsc::UnboundedSender<String>,
        kill: Arc<Notify>,
    ) -> Option<ConnectionHandle> {
        let mut state = self.state.lock();
        if state.connection == ConnectionState::Closed {
            return None;
        }
        state.generation = state.generation.next();
        state.live = Some(LiveConnection { sender, kill });
        state.connection = ConnectionState::Connected;
        state.close_notified = false;

        info!(generation = %state.generation, "Transport connected");
        Some(ConnectionHandle {
            generation: state.generation,
            inner: Arc::clone(self),
        })
    }

    /// Sends everything queued while disconnected, oldest first.
    fn flush_outbox(&self, generation: Generation) {
        let mut state = self.state.lock();
        if state.generation != generation || state.outbox.is_empty() {
            return;
        }

        let queued: Vec<Value> = state.outbox.drain(..).collect();
        let Some(live) = &state.live else {
            state.outbox.extend(queued);
            return;
        };
        debug!(count = queued.len(), "Flushing outbox");
        for message in &queued {
            let _ = live.sender.send(message.to_string());
        }
    }

    /// Handles one inbound frame.
    fn receive(&self, text: &str) {
        self.state.lock().retry_count = 0;

        let message = serde_json::from_str::<Value>(text).unwrap_or_else(|e| {
            warn!(error = %e, "Inbound frame is not JSON, delivering as string");
            Value::String(text.to_owned())
        });

        let handler = self.handlers.lock().on_message.clone();
        match handler {
            Some(handler) => handler(message),
            None => trace!("Inbound message without listener dropped"),
        }
    }

    /// Records a close and decides whether to retry.
    ///
    /// Returns the attempt number and delay, or `None` to stop.
    fn schedule_retry(&self) -> Option<(u32, Duration)> {
        let (notify, retry) = {
            let mut state = self.state.lock();
            if state.connection == ConnectionState::Closed {
                return None;
            }
            state.connection = ConnectionState::Disconnected;
            let notify = !state.close_notified;
            state.close_notified = true;
            (notify, state.retry_count)
        };

        warn!(retry, "Transport disconnected");
        if notify {
            let on_close = self.handlers.lock().on_close.clone();
            if let Some(on_close) = on_close {
                on_close();
            }
        }

        let delay = {
            let mut state = self.state.lock();
            if state.connection == ConnectionState::Closed {
                return None;
            }
            if state.retry_count >= self.options.max_retries {
                state.connection = ConnectionState::GivenUp;
                let dropped = state.outbox.len();
                state.outbox.clear();
                warn!(
                    max_retries = self.options.max_retries,
                    dropped, "Giving up on reconnection"
                );
                return None;
            }
            let delay = self.options.backoff_delay(state.retry_count);
            state.retry_count += 1;
            delay
        };

        let attempt = retry + 1;
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        let on_retry = self.handlers.lock().on_retry.clone();
        if let Some(on_retry) = on_retry {
            on_retry(attempt, delay);
        }
        Some((attempt, delay))
    }

    fn send(&self, message: Value) {
        let mut state = self.state.lock();

        if let Some(live) = &state.live {
            match live.sender.send(message.to_string()) {
                Ok(()) => return,
                Err(_) => trace!("Live connection gone, queueing"),
            }
        }

        if state.connection.is_terminal() {
            debug!(state = ?state.connection, "Send after shutdown dropped");
            return;
        }

        if state.outbox.len() >= self.options.max_pending {
            state.outbox.pop_front();
            warn!(max_pending = self.options.max_pending, "Outbox full, oldest message dropped");
        }
        state.outbox.push_back(message);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::error::Error;

    /// Connector that plays back a script; `None` entries fail.
    #[derive(Clone, Default)]
    struct Scripted {
        steps: Arc<Mutex<VecDeque<Option<Socket>>>>,
        attempts: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn fail(&self) {
            self.steps.lock().push_back(None);
        }

        /// Queues a successful connect and returns the peer end.
        fn accept(&self) -> Socket {
            let (ours, peer) = Socket::pair();
            self.steps.lock().push_back(Some(ours));
            peer
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for Scripted {
        async fn connect(&self) -> Result<Socket> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.steps.lock().pop_front() {
                Some(Some(socket)) => Ok(socket),
                _ => Err(Error::connection("refused")),
            }
        }
    }

    fn fast_options() -> ReconnectOptions {
        ReconnectOptions::new()
            .with_base_delay(Duration::from_millis(10))
            .with_max_jitter(Duration::ZERO)
    }

    fn handle_channel(
        transport: &ReconnectingTransport,
    ) -> mpsc::UnboundedReceiver<ConnectionHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        transport.on_open(move |handle| {
            let _ = tx.send(handle);
        });
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failures() {
        let script = Scripted::default();
        script.fail();
        script.fail();
        script.fail();
        let _peer = script.accept();

        let transport = ReconnectingTransport::new(script.clone(), fast_options()).expect("transport");
        let mut opens = handle_channel(&transport);

        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        transport.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&delays);
        transport.on_retry(move |attempt, delay| recorded.lock().push((attempt, delay)));

        transport.start();
        let handle = opens.recv().await.expect("opened");

        assert_eq!(handle.generation().as_u64(), 1);
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(script.attempts(), 4);
        assert_eq!(
            *delays.lock(),
            vec![
                (1, Duration::from_millis(10)),
                (2, Duration::from_millis(20)),
                (3, Duration::from_millis(40)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_is_noop() {
        let script = Scripted::default();
        let peer1 = script.accept();
        let mut peer2 = script.accept();

        let transport = ReconnectingTransport::new(script.clone(), fast_options()).expect("transport");
        let mut opens = handle_channel(&transport);
        transport.start();

        let first = opens.recv().await.expect("first open");
        drop(peer1);
        let second = opens.recv().await.expect("second open");

        assert!(!first.is_live());
        assert!(second.is_live());
        assert!(second.generation() > first.generation());

        first.send(json!("stale"));
        first.close();
        assert!(peer2.receiver.try_recv().is_err());
        assert!(second.is_live());

        second.send(json!({ "n": 2 }));
        assert_eq!(peer2.receiver.recv().await.as_deref(), Some(r#"{"n":2}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_close_reconnects() {
        let script = Scripted::default();
        let mut peer1 = script.accept();
        let _peer2 = script.accept();

        let transport = ReconnectingTransport::new(script.clone(), fast_options()).expect("transport");
        let mut opens = handle_channel(&transport);
        transport.start();

        let first = opens.recv().await.expect("first open");
        first.close();
        assert_eq!(peer1.receiver.recv().await, None);

        let second = opens.recv().await.expect("second open");
        assert_eq!(second.generation().as_u64(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let script = Scripted::default();
        let transport = ReconnectingTransport::new(
            script.clone(),
            fast_options().with_max_retries(2),
        )
        .expect("transport");

        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        transport.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        transport.send(json!("lost"));
        transport.start();
        sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.state(), ConnectionState::GivenUp);
        assert_eq!(script.attempts(), 3);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(transport.pending_messages().is_empty());

        transport.send(json!("after"));
        assert!(transport.pending_messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbox_flushes_after_open_handler() {
        let script = Scripted::default();
        let mut peer = script.accept();

        let transport = ReconnectingTransport::new(script.clone(), fast_options()).expect("transport");
        transport.on_open(|handle| handle.send(json!("hello")));

        transport.send(json!(1));
        transport.send(json!(2));
        assert_eq!(transport.pending_messages(), vec![json!(1), json!(2)]);

        transport.start();
        assert_eq!(peer.receiver.recv().await.as_deref(), Some(r#""hello""#));
        assert_eq!(peer.receiver.recv().await.as_deref(), Some("1"));
        assert_eq!(peer.receiver.recv().await.as_deref(), Some("2"));
        assert!(transport.pending_messages().is_empty());

        transport.send(json!(3));
        assert_eq!(peer.receiver.recv().await.as_deref(), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbox_drops_oldest_when_full() {
        let transport = ReconnectingTransport::new(
            Scripted::default(),
            fast_options().with_max_pending(2),
        )
        .expect("transport");

        transport.send(json!(1));
        transport.send(json!(2));
        transport.send(json!(3));
        assert_eq!(transport.pending_messages(), vec![json!(2), json!(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_retries() {
        let script = Scripted::default();
        let transport = ReconnectingTransport::new(script.clone(), fast_options()).expect("transport");
        transport.start();

        sleep(Duration::from_millis(15)).await;
        transport.close();
        let attempts = script.attempts();

        sleep(Duration::from_secs(60)).await;
        assert_eq!(script.attempts(), attempts);
        assert_eq!(transport.state(), ConnectionState::Closed);

        transport.start();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(script.attempts(), attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_resets_retry_count() {
        let script = Scripted::default();
        script.fail();
        script.fail();
        let peer = script.accept();

        let transport = ReconnectingTransport::new(script.clone(), fast_options()).expect("transport");
        let mut opens = handle_channel(&transport);

        let (tx, mut messages) = mpsc::unbounded_channel();
        transport.listen(Box::new(move |message| {
            let _ = tx.send(message);
        }));

        transport.start();
        let _handle = opens.recv().await.expect("opened");
        assert_eq!(transport.retry_count(), 2);

        peer.sender.send(r#"{"event":"ping"}"#.into()).expect("send");
        assert_eq!(messages.recv().await, Some(json!({ "event": "ping" })));
        assert_eq!(transport.retry_count(), 0);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let result = ReconnectingTransport::new(
            Scripted::default(),
            ReconnectOptions::new().with_max_pending(0),
        );
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
