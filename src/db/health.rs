//! Connection health tracking.
//!
//! Each leased connection carries a failure counter. A connection that
//! errored once may be transiently bad and is still eligible for pool
//! return, but once failures reach the threshold — or the connection is
//! condemned outright (e.g. ambiguous auto-commit state during close) — the
//! release path must discard it instead of returning it to the pool.

use tracing::warn;

/// Failures tolerated before a connection is poisoned.
pub const MAX_CONNECTION_FAILURES: u32 = 3;

/// Release verdict for a leased connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseVerdict {
    /// Eligible for pool return.
    Healthy,
    /// Must be detached and closed, never pooled again.
    Poisoned,
}

/// Per-lease failure tracker.
#[derive(Debug, Default)]
pub struct ConnectionHealth {
    failures: u32,
    condemned: bool,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one execution failure on this connection.
    pub fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures >= MAX_CONNECTION_FAILURES {
            warn!(
                failures = self.failures,
                "connection crossed failure threshold, flagged for discard"
            );
        }
    }

    /// Condemn the connection immediately, regardless of the counter.
    pub fn destroy(&mut self) {
        self.condemned = true;
    }

    /// Number of failures recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Verdict the release path must honor.
    pub fn verdict(&self) -> LeaseVerdict {
        if self.condemned || self.failures >= MAX_CONNECTION_FAILURES {
            LeaseVerdict::Poisoned
        } else {
            LeaseVerdict::Healthy
        }
    }
}
