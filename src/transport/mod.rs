//! Client transport layer.
//!
//! Keeps one logical duplex channel alive across connection losses.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐                         ┌─────────────────┐
//! │ ReconnectingTransport│       WebSocket         │  Relay server   │
//! │  → Connector        │◄───────────────────────►│                 │
//! │  → Socket           │    ws://host:PORT       │                 │
//! └─────────────────────┘                         └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ReconnectingTransport::new` - Validate options, nothing connects yet
//! 2. `ReconnectingTransport::start` - Spawn the driver task
//! 3. `Connector::connect` - One attempt; failures back off exponentially
//! 4. `on_open` - Called with a generation-bound `ConnectionHandle`
//! 5. `ReconnectingTransport::close` - Stop for good
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Socket channels, WebSocket event loop, connectors |
//! | `options` | Retry limits and backoff |
//! | `reconnect` | Reconnecting transport state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Socket abstraction and WebSocket event loop.
pub mod connection;

/// Reconnection options.
pub mod options;

/// Reconnecting transport.
pub mod reconnect;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connector, Socket, WebSocketConnector};
pub use options::ReconnectOptions;
pub use reconnect::{
    CloseHandler, ConnectionHandle, ConnectionState, OpenHandler, ReconnectingTransport,
    RetryHandler,
};
