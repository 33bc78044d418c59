//! Time source abstraction.
//!
//! Every manager reads "now" through a [`Clock`] so that expiry, lockout and
//! rotation schedules can be driven deterministically in tests.

use std::sync::Arc;

use crate::Timestamp;

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Shared handle to a clock, as held by the managers.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time from the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}
