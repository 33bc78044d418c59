//! Nullable clock: deterministic time for testing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use keyguard_types::{Clock, SharedClock, Timestamp};

/// A deterministic clock. Time only advances when you tell it to.
#[derive(Debug, Default)]
pub struct ManualClock {
    current: AtomicU64,
}

impl ManualClock {
    pub fn new(initial_secs: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_secs),
        }
    }

    /// A shared handle plus the `SharedClock` view of it, for handing to managers.
    pub fn shared(initial_secs: u64) -> (Arc<Self>, SharedClock) {
        let clock = Arc::new(Self::new(initial_secs));
        let shared: SharedClock = clock.clone();
        (clock, shared)
    }

    /// Advance time by a number of seconds.
    pub fn advance(&self, secs: u64) {
        self.current.fetch_add(secs, Ordering::SeqCst);
    }

    /// Set the time to a specific value.
    pub fn set(&self, secs: u64) {
        self.current.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current.load(Ordering::SeqCst))
    }
}
