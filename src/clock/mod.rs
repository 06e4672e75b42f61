//! Injectable time source
//!
//! The execution loop never reads the system clock directly; it goes through
//! the [`Clock`] trait so tests can drive time by hand. Production uses
//! [`SystemClock`] with the timezone from configuration.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

/// Source of "now" in the configured timezone
pub trait Clock: Send + Sync {
    /// Current timezone-aware timestamp
    fn now(&self) -> DateTime<Tz>;

    /// The timezone this clock reports in
    fn timezone(&self) -> Tz;
}

/// Wall-clock time in a fixed IANA timezone
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Manually driven clock for tests
///
/// Reports a stored instant that tests can set or advance. With a non-zero
/// auto step every `now()` call also moves time forward, which lets a
/// polling wait loop make progress without real sleeping.
pub struct ManualClock {
    tz: Tz,
    current: Mutex<DateTime<Tz>>,
    auto_step: Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<Tz>) -> Self {
        Self {
            tz: start.timezone(),
            current: Mutex::new(start),
            auto_step: Duration::zero(),
        }
    }

    /// Advance time by `step` on every `now()` call
    pub fn with_auto_step(mut self, step: Duration) -> Self {
        self.auto_step = step;
        self
    }

    /// Jump to a specific instant
    pub fn set(&self, instant: DateTime<Tz>) {
        *self.current.lock().expect("clock lock poisoned") = instant;
    }

    /// Move time forward
    pub fn advance(&self, delta: Duration) {
        let mut current = self.current.lock().expect("clock lock poisoned");
        *current += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Tz> {
        let mut current = self.current.lock().expect("clock lock poisoned");
        let now = *current;
        if !self.auto_step.is_zero() {
            *current += self.auto_step;
        }
        now
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}
