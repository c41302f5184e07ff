//! Logical time for ordering settlements.
//!
//! Wall clock time is avoided: every settlement takes the next tick of an
//! engine-wide clock, so causal order is visible in the ticks.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Logical time - monotonically increasing counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalTime(u64);

impl LogicalTime {
    /// Create a new logical time at zero
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Create incremented time
    #[must_use]
    pub const fn incremented(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Default for LogicalTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl From<u64> for LogicalTime {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Shared logical clock
///
/// Ticks start at 1 so that zero can mean "never".
#[derive(Debug, Default)]
pub struct LogicalClock {
    now: AtomicU64,
}

impl LogicalClock {
    /// Create a clock at zero
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Advance the clock and return the new time
    pub fn tick(&self) -> LogicalTime {
        LogicalTime(self.now.fetch_add(1, Ordering::AcqRel).saturating_add(1))
    }

    /// Current time without advancing
    #[must_use]
    pub fn now(&self) -> LogicalTime {
        LogicalTime(self.now.load(Ordering::Acquire))
    }
}
