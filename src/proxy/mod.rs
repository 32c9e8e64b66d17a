//! Plugin API proxy with call queueing.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `api` | [`ApiCall`], [`Hook`] and the [`PluginApi`] target trait |
//! | `queue` | [`ApiProxy`] recording and replay |

// ============================================================================
// Submodules
// ============================================================================

/// Plugin API surface.
pub mod api;

/// Queueing proxy.
pub mod queue;

// ============================================================================
// Re-exports
// ============================================================================

pub use api::{ApiCall, Hook, HookHandler, PluginApi, PluginDescriptor};
pub use queue::{ApiProxy, CallFuture};
