//! Relay half-connections.
//!
//! A [`Port`] is one side of a session as seen by the hub: either the
//! devtools panel or the inspected page of a tab.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::{PortId, TabId};

// ============================================================================
// Port
// ============================================================================

/// One half-connection attached to the hub.
pub trait Port: Send + Sync + 'static {
    /// Unique port id.
    fn id(&self) -> PortId;

    /// Name sent by the peer when connecting.
    fn name(&self) -> &str;

    /// Tab the peer runs in, if known.
    fn sender_tab(&self) -> Option<TabId>;

    /// Delivers a message to the peer.
    fn post_message(&self, message: Value);

    /// Closes the connection to the peer.
    fn disconnect(&self);
}

// ============================================================================
// Role
// ============================================================================

/// Which half of a session a port is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Devtools panel; named by its tab id.
    Devtools,
    /// Inspected page.
    Page,
}

impl Role {
    /// Resolves the session key and role of a port.
    ///
    /// A canonical decimal name marks the devtools half for that tab;
    /// anything else is the page half of the port's sender tab.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] for a page half without a tab.
    pub fn of(port: &dyn Port) -> Result<(TabId, Self)> {
        if let Some(tab) = TabId::from_port_name(port.name()) {
            return Ok((tab, Self::Devtools));
        }

        port.sender_tab()
            .map(|tab| (tab, Self::Page))
            .ok_or_else(|| Error::invalid_handshake(port.name(), "page half without sender tab"))
    }

    /// The other half.
    #[inline]
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Devtools => Self::Page,
            Self::Page => Self::Devtools,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Devtools => f.write_str("devtools"),
            Self::Page => f.write_str("page"),
        }
    }
}

// ============================================================================
// ChannelPort
// ============================================================================

/// What a [`ChannelPort`] peer observes.
#[derive(Debug, Clone, PartialEq)]
pub enum PortEvent {
    /// A message posted by the hub.
    Message(Value),
    /// The hub disconnected the port.
    Disconnected,
}

/// In-process port backed by a channel.
///
/// The receiving end returned by [`ChannelPort::new`] observes every
/// posted message and the final disconnect.
#[derive(Debug)]
pub struct ChannelPort {
    id: PortId,
    name: String,
    sender_tab: Option<TabId>,
    events: mpsc::UnboundedSender<PortEvent>,
    disconnected: AtomicBool,
}

impl ChannelPort {
    /// Creates a port and the receiver of its events.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        sender_tab: Option<TabId>,
    ) -> (Self, mpsc::UnboundedReceiver<PortEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let port = Self {
            id: PortId::generate(),
            name: name.into(),
            sender_tab,
            events: tx,
            disconnected: AtomicBool::new(false),
        };
        (port, rx)
    }

    /// Creates the devtools half for `tab`.
    #[must_use]
    pub fn devtools(tab: TabId) -> (Self, mpsc::UnboundedReceiver<PortEvent>) {
        Self::new(tab.to_string(), None)
    }

    /// Creates the page half for `tab`.
    #[must_use]
    pub fn page(tab: TabId) -> (Self, mpsc::UnboundedReceiver<PortEvent>) {
        Self::new("page", Some(tab))
    }

    /// Returns `true` once the hub disconnected this port.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Port for ChannelPort {
    fn id(&self) -> PortId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sender_tab(&self) -> Option<TabId> {
        self.sender_tab
    }

    fn post_message(&self, message: Value) {
        if self.is_disconnected() {
            trace!(port = %self.id, "Post to disconnected port ignored");
            return;
        }
        let _ = self.events.send(PortEvent::Message(message));
    }

    fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(PortEvent::Disconnected);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
