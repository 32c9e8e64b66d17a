//! Reconnection options and backoff policy.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use devtools_bridge::transport::ReconnectOptions;
//!
//! let options = ReconnectOptions::new()
//!     .with_max_retries(5)
//!     .with_base_delay(Duration::from_millis(250))
//!     .with_max_jitter(Duration::ZERO);
//!
//! assert_eq!(options.backoff_delay(2), Duration::from_millis(1000));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Consecutive failures tolerated before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// First retry delay; doubled per consecutive failure.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound of the random jitter added to each delay.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// Messages kept while disconnected before the oldest is dropped.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Exponent cap so the doubling cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 20;

// ============================================================================
// ReconnectOptions
// ============================================================================

/// Reconnecting transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// Consecutive failures before the transport gives up.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Jitter bound; clamped to `base_delay` so delays never decrease.
    pub max_jitter: Duration,

    /// Outbox capacity while disconnected.
    pub max_pending: usize,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ReconnectOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ReconnectOptions {
    /// Sets the retry limit.
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the jitter bound.
    #[inline]
    #[must_use]
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Sets the outbox capacity.
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }
}

// ============================================================================
// Backoff
// ============================================================================

impl ReconnectOptions {
    /// Deterministic part of the delay: `base_delay * 2^retry`.
    #[must_use]
    pub fn backoff_floor(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(factor)
    }

    /// Delay before retry number `retry` (zero-based), jitter included.
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let jitter_bound = self.max_jitter.min(self.base_delay).as_millis();
        let jitter_ms = match u64::try_from(jitter_bound) {
            Ok(0) | Err(_) => 0,
            Ok(bound) => fastrand::u64(0..bound),
        };
        self.backoff_floor(retry)
            .saturating_add(Duration::from_millis(jitter_ms))
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_pending` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_pending == 0 {
            return Err(Error::config("max_pending must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ReconnectOptions::default();
        assert_eq!(options.max_retries, 10);
        assert_eq!(options.base_delay, Duration::from_millis(1000));
        assert_eq!(options.max_jitter, Duration::from_millis(1000));
        assert_eq!(options.max_pending, 1024);
    }

    #[test]
    fn test_builder_methods() {
        let options = ReconnectOptions::new()
            .with_max_retries(3)
            .with_base_delay(Duration::from_millis(5))
            .with_max_jitter(Duration::ZERO)
            .with_max_pending(8);
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.base_delay, Duration::from_millis(5));
        assert_eq!(options.max_jitter, Duration::ZERO);
        assert_eq!(options.max_pending, 8);
    }

    #[test]
    fn test_backoff_doubles() {
        let options = ReconnectOptions::new();
        assert_eq!(options.backoff_floor(0), Duration::from_millis(1000));
        assert_eq!(options.backoff_floor(1), Duration::from_millis(2000));
        assert_eq!(options.backoff_floor(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_delay_within_jitter_bounds() {
        let options = ReconnectOptions::new();
        for retry in 0..5 {
            let delay = options.backoff_delay(retry);
            let floor = options.backoff_floor(retry);
            assert!(delay >= floor);
            assert!(delay < floor + options.max_jitter);
        }
    }

    #[test]
    fn test_backoff_delays_never_decrease() {
        let options = ReconnectOptions::new().with_max_jitter(Duration::from_secs(60));
        let mut last = Duration::ZERO;
        for retry in 0..10 {
            let delay = options.backoff_delay(retry);
            assert!(delay >= last, "retry {retry}: {delay:?} < {last:?}");
            last = delay;
        }
    }

    #[test]
    fn test_backoff_saturates() {
        let options = ReconnectOptions::new().with_max_jitter(Duration::ZERO);
        assert_eq!(options.backoff_floor(64), options.backoff_floor(MAX_BACKOFF_EXPONENT));
    }

    #[test]
    fn test_validate() {
        assert!(ReconnectOptions::new().validate().is_ok());
        assert!(ReconnectOptions::new().with_max_pending(0).validate().is_err());
    }
}
