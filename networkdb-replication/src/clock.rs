//! Lamport logical clocks (§4.1).
//!
//! NetworkDB keeps two of these, never shared: one ticks on node/network
//! membership events, the other on table-entry writes. Keeping them
//! separate means a burst of table writes can't starve out membership
//! convergence (or vice versa) by racing ahead in a shared counter.

use std::sync::atomic::{AtomicU64, Ordering};

use networkdb_protocol::LamportTime;

#[derive(Debug, Default)]
pub struct LamportClock(AtomicU64);

impl LamportClock {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Advance the clock for a new local event and return its timestamp.
    pub fn increment(&self) -> LamportTime {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current value without advancing it.
    pub fn time(&self) -> LamportTime {
        self.0.load(Ordering::SeqCst)
    }

    /// Fold in a timestamp observed from a remote event: the local clock
    /// never runs behind anything it has seen.
    pub fn witness(&self, observed: LamportTime) {
        self.0.fetch_max(observed, Ordering::SeqCst);
    }
}
