//! Clock abstraction for deterministic dwell timing.
//!
//! The engine never reads time itself: every entry point takes `now_ms`.
//! Hosts obtain that value from a `Clock`. The daemon uses `SystemClock`
//! (monotonic, relative to daemon start); replay and tests use `TestClock`
//! with manual time advancement.

use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

/// Trait abstracting time sources for testability.
pub trait Clock: Send + Sync {
    /// Monotonic milliseconds since the clock's origin.
    fn now_ms(&self) -> f64;

    /// Wall-clock time as milliseconds since UNIX epoch.
    fn unix_millis(&self) -> i64;
}

/// Production clock: monotonic time measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn unix_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Test clock with manually controlled time, starting at 0 ms.
pub struct TestClock {
    now_ms: Mutex<f64>,
    unix_ms: Mutex<i64>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            now_ms: Mutex::new(0.0),
            unix_ms: Mutex::new(0),
        }
    }

    /// Advance time by the given duration.
    pub fn advance(&self, duration: Duration) {
        self.advance_ms(duration.as_secs_f64() * 1000.0);
    }

    /// Advance time by a number of milliseconds.
    pub fn advance_ms(&self, ms: f64) {
        *self.now_ms.lock() += ms;
        *self.unix_ms.lock() += ms as i64;
    }

    /// Jump to an absolute monotonic time. Never moves backwards.
    pub fn set_ms(&self, ms: f64) {
        let mut now = self.now_ms.lock();
        if ms > *now {
            *self.unix_ms.lock() += (ms - *now) as i64;
            *now = ms;
        }
    }

    /// Set the UNIX millisecond timestamp explicitly.
    pub fn set_unix_millis(&self, ms: i64) {
        *self.unix_ms.lock() = ms;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> f64 {
        *self.now_ms.lock()
    }

    fn unix_millis(&self) -> i64 {
        *self.unix_ms.lock()
    }
}
