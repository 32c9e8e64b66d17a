//! Message types and payload serialization.
//!
//! # Protocol Overview
//!
//! | Type | Purpose |
//! |------|---------|
//! | `Envelope` | Named event with optional payload |
//! | `Data` | Shared value graph (may contain cycles) |
//! | `Serialized` | Wire string or ordered chunk list |
//!
//! Reserved event names: `shutdown`, `log`, `proxy-fail`.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Envelope type and inbound decoding |
//! | `serializer` | Cycle-safe, chunked stringify/parse |
//! | `value` | Shared value graph |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope type and inbound message decoding.
pub mod envelope;

/// Cycle-safe, size-chunked serialization.
pub mod serializer;

/// Shared value graph.
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{Envelope, LOG_EVENT, PROXY_FAIL_EVENT, SHUTDOWN_EVENT, decode_message};
pub use serializer::{MAX_DIRECT_DEPTH, MAX_SERIALIZED_SIZE, Serialized, parse, parse_with, stringify, stringify_with};
pub use value::Data;
