//! Session switchboard pairing devtools and page halves by tab.
//!
//! # Session States
//!
//! ```text
//!                  devtools joins               page joins
//! (absent) ───────────────────► AwaitingPage ─────────────────► Piped
//!     │                                                           ▲
//!     └──── page joins ───► AwaitingDevtools ── devtools joins ───┘
//!
//! Any half leaves ──► (absent); the remaining half is disconnected.
//! ```
//!
//! A devtools half only joins once script injection into its tab finished.
//! If injection fails, the half still joins but first receives
//! `"proxy-fail"`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::identifiers::{PortId, TabId};
use crate::protocol::{Envelope, LOG_EVENT, PROXY_FAIL_EVENT};

use super::port::{Port, Role};

// ============================================================================
// ScriptInjector
// ============================================================================

/// Installs the page-side agent into a tab before its devtools half pipes.
#[async_trait]
pub trait ScriptInjector: Send + Sync + 'static {
    /// Injects into `tab`.
    ///
    /// # Errors
    ///
    /// Usually [`Error::InjectionFailed`](crate::Error::InjectionFailed).
    async fn inject(&self, tab: TabId) -> Result<()>;
}

/// Injector for pages that load their agent themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInjector;

#[async_trait]
impl ScriptInjector for NoopInjector {
    async fn inject(&self, _tab: TabId) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Observable state of one tab's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Page half present, devtools half missing.
    AwaitingDevtools,
    /// Devtools half present, page half missing.
    AwaitingPage,
    /// Both halves present; messages flow.
    Piped,
}

#[derive(Default)]
struct Session {
    devtools: Option<Arc<dyn Port>>,
    page: Option<Arc<dyn Port>>,
}

impl Session {
    fn slot(&mut self, role: Role) -> &mut Option<Arc<dyn Port>> {
        match role {
            Role::Devtools => &mut self.devtools,
            Role::Page => &mut self.page,
        }
    }

    fn half(&self, role: Role) -> Option<&Arc<dyn Port>> {
        match role {
            Role::Devtools => self.devtools.as_ref(),
            Role::Page => self.page.as_ref(),
        }
    }

    fn state(&self) -> Option<SessionState> {
        match (&self.devtools, &self.page) {
            (Some(_), Some(_)) => Some(SessionState::Piped),
            (Some(_), None) => Some(SessionState::AwaitingPage),
            (None, Some(_)) => Some(SessionState::AwaitingDevtools),
            (None, None) => None,
        }
    }
}

#[derive(Default)]
struct HubState {
    sessions: FxHashMap<TabId, Session>,
    /// Registered ports and where they sit.
    ports: FxHashMap<PortId, (TabId, Role)>,
    /// Devtools halves whose injection is still running.
    injecting: FxHashSet<PortId>,
}

// ============================================================================
// RelayHub
// ============================================================================

/// Pairs half-connections per tab and pipes messages between them.
///
/// # Example
///
/// ```ignore
/// let hub = RelayHub::new(NoopInjector);
/// hub.connect(devtools_port).await?;
/// hub.connect(page_port).await?;
/// assert_eq!(hub.session_state(tab), Some(SessionState::Piped));
/// ```
pub struct RelayHub {
    injector: Arc<dyn ScriptInjector>,
    state: Mutex<HubState>,
}

impl fmt::Debug for RelayHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RelayHub")
            .field("sessions", &state.sessions.len())
            .field("ports", &state.ports.len())
            .field("injecting", &state.injecting.len())
            .finish_non_exhaustive()
    }
}

impl RelayHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new(injector: impl ScriptInjector) -> Self {
        Self {
            injector: Arc::new(injector),
            state: Mutex::new(HubState::default()),
        }
    }
}

// ============================================================================
// RelayHub - Port Events
// ============================================================================

impl RelayHub {
    /// Admits a newly connected half.
    ///
    /// For a devtools half this waits for script injection first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`](crate::Error::InvalidHandshake) if
    /// the port is neither a devtools half nor tied to a tab; the port is
    /// disconnected.
    pub async fn connect(&self, port: Arc<dyn Port>) -> Result<()> {
        let (tab, role) = match Role::of(port.as_ref()) {
            Ok(placement) => placement,
            Err(e) => {
                warn!(port = %port.id(), name = port.name(), "Rejecting half-connection");
                port.disconnect();
                return Err(e);
            }
        };
        debug!(port = %port.id(), %tab, %role, "Half connected");

        if role == Role::Devtools {
            self.state.lock().injecting.insert(port.id());
            let injected = self.injector.inject(tab).await;

            if !self.state.lock().injecting.remove(&port.id()) {
                debug!(port = %port.id(), %tab, "Half left during injection, not registering");
                return Ok(());
            }

            if let Err(e) = injected {
                warn!(%tab, error = %e, "Script injection failed");
                port.post_message(Envelope::new(PROXY_FAIL_EVENT).into_wire());
            }
        }

        self.register(port, tab, role);
        Ok(())
    }

    /// Routes a message from a half.
    ///
    /// Log events are logged here; everything else goes verbatim to the
    /// other half. Messages from unknown or unpaired halves are dropped.
    pub fn message(&self, port_id: PortId, message: Value) {
        let (tab, role, target) = {
            let state = self.state.lock();
            let Some(&(tab, role)) = state.ports.get(&port_id) else {
                trace!(port = %port_id, "Message from unregistered port dropped");
                return;
            };
            let target = state
                .sessions
                .get(&tab)
                .and_then(|session| session.half(role.opposite()))
                .cloned();
            (tab, role, target)
        };

        let Some(target) = target else {
            debug!(%tab, %role, "Message before pairing dropped");
            return;
        };

        if is_log_message(&message) {
            let payload = message.get("payload").cloned().unwrap_or(Value::Null);
            info!(%tab, from = %role, %payload, "Relayed log");
            return;
        }

        trace!(%tab, from = %role, "Forwarding message");
        target.post_message(message);
    }

    /// Handles a half going away.
    ///
    /// Clears the session; a remaining partner is disconnected.
    pub fn disconnect(&self, port_id: PortId) {
        let (tab, role, partner) = {
            let mut state = self.state.lock();

            if state.injecting.remove(&port_id) {
                debug!(port = %port_id, "Half left before injection finished");
                return;
            }

            let Some((tab, role)) = state.ports.remove(&port_id) else {
                trace!(port = %port_id, "Disconnect of unregistered port ignored");
                return;
            };

            let partner = state
                .sessions
                .remove(&tab)
                .and_then(|mut session| session.slot(role.opposite()).take());
            if let Some(partner) = &partner {
                state.ports.remove(&partner.id());
            }
            (tab, role, partner)
        };

        match partner {
            Some(partner) => {
                partner.disconnect();
                info!(%tab, left = %role, "Session torn down");
            }
            None => debug!(%tab, left = %role, "Unpaired half cleaned up"),
        }
    }

    /// Disconnects every registered half.
    pub fn shutdown(&self) {
        let ports: Vec<Arc<dyn Port>> = {
            let mut state = self.state.lock();
            state.ports.clear();
            state.injecting.clear();
            state
                .sessions
                .drain()
                .flat_map(|(_, session)| [session.devtools, session.page])
                .flatten()
                .collect()
        };

        info!(ports = ports.len(), "RelayHub shutting down");
        for port in ports {
            port.disconnect();
        }
    }

    fn register(&self, port: Arc<dyn Port>, tab: TabId, role: Role) {
        let (replaced, session_state) = {
            let mut state = self.state.lock();
            state.ports.insert(port.id(), (tab, role));

            let session = state.sessions.entry(tab).or_default();
            let replaced = session.slot(role).replace(port);
            let session_state = session.state();

            if let Some(old) = &replaced {
                state.ports.remove(&old.id());
            }
            (replaced, session_state)
        };

        if let Some(old) = replaced {
            warn!(%tab, %role, old = %old.id(), "Replacing existing half");
            old.disconnect();
        }

        match session_state {
            Some(SessionState::Piped) => info!(%tab, "Session piped"),
            Some(waiting) => debug!(%tab, state = ?waiting, "Session waiting for partner"),
            None => {}
        }
    }
}

// ============================================================================
// RelayHub - Inspection
// ============================================================================

impl RelayHub {
    /// State of the session for `tab`; `None` if there is none.
    #[must_use]
    pub fn session_state(&self, tab: TabId) -> Option<SessionState> {
        self.state.lock().sessions.get(&tab).and_then(Session::state)
    }

    /// Number of sessions with at least one half present.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Number of registered halves.
    #[must_use]
    pub fn port_count(&self) -> usize {
        self.state.lock().ports.len()
    }
}

fn is_log_message(message: &Value) -> bool {
    message.get("event").and_then(Value::as_str) == Some(LOG_EVENT)
}

// ============================================================================
// Tests
// ============================================================================
