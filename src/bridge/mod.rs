//! Event channel and its pluggable transport.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  on / emit   ┌──────────────┐  listen / send  ┌──────────┐
//! │  Call site   │◄────────────►│    Bridge    │◄───────────────►│   Wall   │
//! └──────────────┘              └──────────────┘                 └──────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Named-event pub/sub ([`Bridge`]) |
//! | `wall` | Transport trait and in-process implementation |

// ============================================================================
// Submodules
// ============================================================================

/// Named-event channel.
pub mod channel;

/// Transport abstraction.
pub mod wall;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{Bridge, Callback};
pub use wall::{MemoryWall, Wall, WallHandler};
