//! Named-event channel over a [`Wall`].
//!
//! The bridge decodes every inbound wall message into envelopes and
//! dispatches each as a named event to local listeners. Outbound, it hands
//! messages straight to the wall; there is no buffering at this layer.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::identifiers::ListenerId;
use crate::protocol::{Data, Envelope, LOG_EVENT, SHUTDOWN_EVENT, decode_message};

use super::wall::Wall;

// ============================================================================
// Types
// ============================================================================

/// Listener callback; receives the event arguments.
pub type Callback = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Resource release action run once on shutdown.
type Cleanup = Box<dyn FnOnce() + Send>;

struct Listener {
    id: ListenerId,
    once: bool,
    callback: Callback,
}

struct BridgeInner {
    /// Underlying transport.
    wall: Arc<dyn Wall>,
    /// Listeners per event, in registration order.
    listeners: Mutex<FxHashMap<String, Vec<Listener>>>,
    /// Actions to run when `shutdown` fires.
    cleanups: Mutex<Vec<Cleanup>>,
    /// Source of listener IDs.
    next_listener: AtomicU64,
    /// Set once `shutdown` has fired.
    shut_down: AtomicBool,
}

// ============================================================================
// Bridge
// ============================================================================

/// Event channel bound to one wall.
///
/// Cloning yields another handle to the same channel.
///
/// # Example
///
/// ```ignore
/// let bridge = Bridge::new(Arc::new(wall));
/// bridge.on("flush", |args| println!("{args:?}"));
/// bridge.send_event("init", None);
/// ```
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("events", &self.inner.listeners.lock().len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Creates a bridge and installs it as the wall's message handler.
    pub fn new(wall: Arc<dyn Wall>) -> Self {
        let inner = Arc::new(BridgeInner {
            wall,
            listeners: Mutex::new(FxHashMap::default()),
            cleanups: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        });

        let weak: Weak<BridgeInner> = Arc::downgrade(&inner);
        inner.wall.listen(Box::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                Bridge { inner }.receive(message);
            }
        }));

        Self { inner }
    }
}

// ============================================================================
// Bridge - Subscriptions
// ============================================================================

impl Bridge {
    /// Registers a listener for `event`.
    pub fn on<F>(&self, event: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.add_listener(event.into(), false, Arc::new(callback))
    }

    /// Registers a listener that is removed after its first invocation.
    pub fn once<F>(&self, event: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.add_listener(event.into(), true, Arc::new(callback))
    }

    /// Removes one listener (`Some(id)`) or all listeners (`None`) of `event`.
    ///
    /// Returns `true` if anything was removed.
    pub fn off(&self, event: &str, id: Option<ListenerId>) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };

        let before = list.len();
        match id {
            Some(id) => list.retain(|l| l.id != id),
            None => list.clear(),
        }
        let removed = list.len() != before;

        if list.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Number of listeners registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.lock().get(event).map_or(0, Vec::len)
    }

    fn add_listener(&self, event: String, once: bool, callback: Callback) -> ListenerId {
        let id = ListenerId::new(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        trace!(%event, %id, once, "Listener added");
        self.inner
            .listeners
            .lock()
            .entry(event)
            .or_default()
            .push(Listener { id, once, callback });
        id
    }
}

// ============================================================================
// Bridge - Dispatch
// ============================================================================

impl Bridge {
    /// Dispatches `event` to local listeners.
    ///
    /// Listeners run in registration order over a snapshot taken before the
    /// first call, so listeners added or removed during dispatch take effect
    /// from the next emit. Returns `true` if any listener ran.
    pub fn emit(&self, event: &str, args: &[Value]) -> bool {
        let snapshot: Vec<Callback> = {
            let mut listeners = self.inner.listeners.lock();
            match listeners.get_mut(event) {
                Some(list) => {
                    let callbacks = list.iter().map(|l| Arc::clone(&l.callback)).collect();
                    list.retain(|l| !l.once);
                    if list.is_empty() {
                        listeners.remove(event);
                    }
                    callbacks
                }
                None => Vec::new(),
            }
        };

        for callback in &snapshot {
            callback(args);
        }

        if event == SHUTDOWN_EVENT {
            self.release();
        }

        !snapshot.is_empty()
    }

    /// Handles one inbound wall message.
    fn receive(&self, message: Value) {
        if self.is_shut_down() {
            trace!("Ignoring message after shutdown");
            return;
        }

        for envelope in decode_message(message) {
            let args: Vec<Value> = envelope.payload.into_iter().collect();
            if !self.emit(&envelope.event, &args) {
                trace!(event = %envelope.event, "No listener for event");
            }
        }
    }
}

// ============================================================================
// Bridge - Sending
// ============================================================================

impl Bridge {
    /// Sends a raw message through the wall.
    pub fn send(&self, message: Value) {
        if self.is_shut_down() {
            debug!("Bridge shut down, message not sent");
            return;
        }
        self.inner.wall.send(message);
    }

    /// Sends a named event with an optional payload.
    pub fn send_event(&self, event: impl Into<String>, payload: Option<Value>) {
        let envelope = match payload {
            Some(payload) => Envelope::with_payload(event, payload),
            None => Envelope::new(event),
        };
        self.send(envelope.into_wire());
    }

    /// Sends a named event whose payload is serialized `data`.
    pub fn send_data(&self, event: impl Into<String>, data: &Data) {
        self.send(Envelope::with_data(event, data).into_wire());
    }

    /// Sends a diagnostic message on the reserved `log` event.
    pub fn log(&self, message: impl Into<String>) {
        self.send_event(LOG_EVENT, Some(Value::String(message.into())));
    }
}

// ============================================================================
// Bridge - Lifecycle
// ============================================================================

impl Bridge {
    /// Registers an action to run when the channel shuts down.
    ///
    /// If the channel is already shut down the action runs immediately.
    pub fn on_shutdown<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down() {
            cleanup();
            return;
        }
        self.inner.cleanups.lock().push(Box::new(cleanup));
    }

    /// Fires the `shutdown` event locally.
    pub fn shutdown(&self) {
        self.emit(SHUTDOWN_EVENT, &[]);
    }

    /// Returns `true` once `shutdown` has fired.
    #[inline]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Runs cleanups exactly once and drops all listeners.
    fn release(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let cleanups: Vec<Cleanup> = self.inner.cleanups.lock().drain(..).collect();
        let count = cleanups.len();
        for cleanup in cleanups {
            cleanup();
        }
        self.inner.listeners.lock().clear();

        info!(released = count, "Bridge shut down");
    }
}

// ============================================================================
// Tests
// ============================================================================
