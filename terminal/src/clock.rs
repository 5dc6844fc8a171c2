//! Wall-clock seam.
//!
//! The engine takes explicit timestamps everywhere; this is where they
//! come from in production. Tests inject a fixed clock instead.

use tally_engine::Timestamp;

/// Source of device-local wall-clock time in milliseconds since epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Timestamp;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis().max(0) as Timestamp
    }
}

/// A fixed clock for tests.
#[derive(Debug, Default)]
pub struct FixedClock(pub std::sync::atomic::AtomicU64);

impl FixedClock {
    /// Create a clock pinned at `now`.
    pub fn at(now: Timestamp) -> Self {
        Self(std::sync::atomic::AtomicU64::new(now))
    }

    /// Advance the clock.
    pub fn advance(&self, delta_ms: Timestamp) {
        self.0
            .fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> Timestamp {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
