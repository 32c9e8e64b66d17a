//! Devtools Bridge - Cross-context message bridge for inspection tools.
//!
//! This library moves events between three isolated contexts: the
//! inspected page, a background relay, and the devtools panel. Each of them
//! connects, disconnects and reconnects independently.
//!
//! # Architecture
//!
//! ```text
//! page ── Serializer ── Bridge ── transport ──► RelayHub ──► transport ── Bridge ── panel
//! ```
//!
//! Key design principles:
//!
//! - Payloads survive cycles and shared references ([`protocol::serializer`])
//! - Every context talks through a [`Bridge`] over a pluggable [`Wall`]
//! - Clients reconnect with exponential backoff and guard stale connections
//! - Plugin calls issued early are queued and replayed in order ([`ApiProxy`])
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use devtools_bridge::relay::{Handshake, RelayServer};
//! use devtools_bridge::transport::{ReconnectOptions, ReconnectingTransport, WebSocketConnector};
//! use devtools_bridge::{Bridge, Result, TabId};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = RelayServer::new().await?;
//!
//!     let connector = WebSocketConnector::new(&server.ws_url())?;
//!     let transport = ReconnectingTransport::new(connector, ReconnectOptions::default())?;
//!     transport.on_open(|handle| handle.send(Handshake::devtools(TabId::new(1)).to_value()));
//!     transport.start();
//!
//!     let bridge = Bridge::new(Arc::new(transport.clone()));
//!     bridge.on("flush", |args| println!("flush: {args:?}"));
//!     bridge.send_event("init", None);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | Event channel: [`Bridge`], [`Wall`], [`MemoryWall`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Envelopes, value graph, serializer |
//! | [`proxy`] | Plugin API queue: [`ApiProxy`] |
//! | [`relay`] | Session hub and WebSocket relay server |
//! | [`transport`] | Reconnecting client transport |

// ============================================================================
// Modules
// ============================================================================

/// Named-event channel over a pluggable transport.
pub mod bridge;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire envelopes and payload serialization.
pub mod protocol;

/// Plugin API proxy with call queueing.
pub mod proxy;

/// Relay hub and server.
pub mod relay;

/// Reconnecting client transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{Bridge, MemoryWall, Wall};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Generation, ListenerId, PortId, TabId};

// Protocol types
pub use protocol::{Data, Envelope, Serialized};

// Proxy types
pub use proxy::{ApiCall, ApiProxy, Hook, PluginApi, PluginDescriptor};

// Relay types
pub use relay::{RelayHub, RelayServer};

// Transport types
pub use transport::{ConnectionState, ReconnectOptions, ReconnectingTransport};
