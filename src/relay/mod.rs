//! Background relay pairing devtools panels with inspected pages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐                                        ┌──────────────┐
//! │   Devtools   │◄──┐     ┌──────────────────────┐   ┌──►│  Page agent  │
//! │ (name = tab) │   └─────│      RelayHub         │───┘   │ (sender tab) │
//! └──────────────┘         │  TabId → Session      │       └──────────────┘
//!                          └──────────────────────┘
//!                                    ▲
//!                          RelayServer (WebSocket)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `hub` | Session table and message routing |
//! | `port` | Half-connection trait and roles |
//! | `server` | WebSocket accept loop and handshake |

// ============================================================================
// Submodules
// ============================================================================

/// Session switchboard.
pub mod hub;

/// Half-connections.
pub mod port;

/// WebSocket front end.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use hub::{NoopInjector, RelayHub, ScriptInjector, SessionState};
pub use port::{ChannelPort, Port, PortEvent, Role};
pub use server::{HANDSHAKE_TIMEOUT, Handshake, RelayServer, WsPort};
