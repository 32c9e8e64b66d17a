//! Type-safe identifiers for bridge entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Backing | Used by |
//! |------|---------|---------|
//! | [`TabId`] | `u64` | Relay session key |
//! | [`PortId`] | UUID v4 | Relay half-connection |
//! | [`ListenerId`] | `u64` | Event channel subscription |
//! | [`Generation`] | `u64` | Reconnecting transport connection |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// TabId
// ============================================================================

/// Canonical decimal form: no sign, no leading zeros, no whitespace.
static CANONICAL_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0|[1-9][0-9]*)$").expect("valid tab id pattern"));

/// Inspected tab identifier; the relay's session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(u64);

impl TabId {
    /// Creates a tab ID from a raw number.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Parses a connection name that is purely numeric.
    ///
    /// Returns `None` unless the name is the canonical decimal rendering
    /// of a number, so `"7"` parses but `"07"`, `"+7"` and `" 7"` do not.
    #[must_use]
    pub fn from_port_name(name: &str) -> Option<Self> {
        if !CANONICAL_DECIMAL.is_match(name) {
            return None;
        }
        name.parse::<u64>().ok().map(Self)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TabId {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_port_name(s)
            .ok_or_else(|| crate::error::Error::protocol(format!("not a tab id: {s:?}")))
    }
}

// ============================================================================
// PortId
// ============================================================================

/// Unique identifier of a relay half-connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(Uuid);

impl PortId {
    /// Generates a new random port ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ListenerId
// ============================================================================

/// Handle returned by [`Bridge::on`](crate::bridge::Bridge::on), used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    #[inline]
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Counter identifying one live connection of a reconnecting transport.
///
/// Incremented on every successful open; a handle whose generation no
/// longer matches the transport's is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Generation(u64);

impl Generation {
    /// Returns the following generation.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
