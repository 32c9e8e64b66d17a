//! Transport abstraction underneath the event channel.
//!
//! A wall is the smallest thing a [`Bridge`](super::Bridge) needs: a way to
//! register one inbound handler and a way to send a message. Each execution
//! context plugs in its own implementation.
//!
//! | Implementation | Context |
//! |----------------|---------|
//! | [`MemoryWall`] | Two endpoints inside one process (message-port style) |
//! | [`ReconnectingTransport`](crate::transport::ReconnectingTransport) | Long-lived socket |

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ============================================================================
// Types
// ============================================================================

/// Inbound message handler installed with [`Wall::listen`].
pub type WallHandler = Box<dyn Fn(Value) + Send + Sync>;

// ============================================================================
// Wall
// ============================================================================

/// Minimal duplex transport.
pub trait Wall: Send + Sync {
    /// Installs the single inbound handler.
    fn listen(&self, handler: WallHandler);

    /// Sends one message to the other side.
    fn send(&self, message: Value);
}

// ============================================================================
// MemoryWall
// ============================================================================

/// In-process wall endpoint.
///
/// Delivery is asynchronous and FIFO: each endpoint drains its inbound queue
/// on its own tokio task once [`listen`](Wall::listen) is called. Messages
/// sent before that are buffered.
pub struct MemoryWall {
    /// Sender into the peer's inbound queue.
    outbound: mpsc::UnboundedSender<Value>,
    /// Inbound queue, taken by the pump on `listen`.
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    /// Pump task draining `inbound`.
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryWall {
    /// Creates two connected endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(b_tx, a_rx), Self::new(a_tx, b_rx))
    }

    fn new(outbound: mpsc::UnboundedSender<Value>, inbound: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            outbound,
            inbound: Mutex::new(Some(inbound)),
            pump: Mutex::new(None),
        }
    }

    /// Stops delivering inbound messages.
    pub fn close(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
            debug!("Memory wall closed");
        }
    }

    /// Returns `true` while the inbound pump is running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.pump.lock().as_ref().is_some_and(|pump| !pump.is_finished())
    }
}

impl Wall for MemoryWall {
    /// Must be called from within a tokio runtime.
    fn listen(&self, handler: WallHandler) {
        let Some(mut inbound) = self.inbound.lock().take() else {
            warn!("Memory wall already has a listener");
            return;
        };

        let pump = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                handler(message);
            }
            debug!("Memory wall peer dropped");
        });
        *self.pump.lock() = Some(pump);
    }

    fn send(&self, message: Value) {
        if self.outbound.send(message).is_err() {
            debug!("Memory wall peer gone, message dropped");
        }
    }
}

impl Drop for MemoryWall {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (left, right) = MemoryWall::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        right.listen(Box::new(move |message| {
            let _ = tx.send(message);
        }));

        left.send(json!("a"));
        left.send(json!("b"));
        left.send(json!("c"));

        for expected in ["a", "b", "c"] {
            let got = timeout(Duration::from_secs(1), rx.recv()).await.expect("delivery").expect("message");
            assert_eq!(got, json!(expected));
        }
    }

    #[tokio::test]
    async fn test_messages_before_listen_are_buffered() {
        let (left, right) = MemoryWall::pair();
        left.send(json!({ "event": "early" }));

        let (tx, mut rx) = mpsc::unbounded_channel();
        right.listen(Box::new(move |message| {
            let _ = tx.send(message);
        }));

        let got = timeout(Duration::from_secs(1), rx.recv()).await.expect("delivery");
        assert_eq!(got, Some(json!({ "event": "early" })));
    }

    #[tokio::test]
    async fn test_close_stops_listening() {
        let (_left, right) = MemoryWall::pair();
        right.listen(Box::new(|_| {}));
        assert!(right.is_listening());
        right.close();
        tokio::task::yield_now().await;
        assert!(!right.is_listening());
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer_is_silent() {
        let (left, right) = MemoryWall::pair();
        drop(right);
        left.send(json!("lost"));
    }
}
