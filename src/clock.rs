//! Monotonic UTC clock abstraction.
//!
//! The engine never calls `SystemTime::now()` directly outside of
//! [`SystemClock`] so that expiry/refresh scenarios can be driven
//! deterministically in tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds-since-epoch UTC clock.
pub trait Clock: Send + Sync {
    /// Current time, in whole seconds since the Unix epoch.
    fn now_utc(&self) -> i64;
}

/// Real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs() as i64
    }
}

/// A manually-advanced clock, for deterministic expiry/refresh tests.
#[derive(Debug)]
pub struct TestClock(AtomicI64);

impl TestClock {
    /// Create a clock starting at `start` seconds since the epoch.
    pub fn new(start: i64) -> Self {
        Self(AtomicI64::new(start))
    }

    /// Advance the clock by `secs` seconds and return the new time.
    pub fn advance(&self, secs: i64) -> i64 {
        self.0.fetch_add(secs, Ordering::SeqCst) + secs
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, t: i64) {
        self.0.store(t, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}
