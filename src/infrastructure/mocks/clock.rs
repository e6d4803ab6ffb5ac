//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MS_PER_HOUR: u64 = 3_600_000;

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly, enabling deterministic
/// testing of windows, blocks, breaker cool-downs and peak hours.
///
/// Unless pinned with [`MockClock::set_hour`], the hour is derived from the
/// current time as a UTC hour.
///
/// # Examples
///
/// ```
/// use admission_guard::infrastructure::mocks::MockClock;
/// use admission_guard::application::ports::Clock;
/// use std::time::Duration;
///
/// let clock = MockClock::new(1_000);
/// assert_eq!(clock.now_ms(), 1_000);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now_ms(), 11_000);
///
/// clock.set_hour(18);
/// assert_eq!(clock.hour(), 18);
/// ```
///
/// # Thread Safety
///
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<Mutex<MockTime>>,
}

#[derive(Debug)]
struct MockTime {
    now_ms: u64,
    hour: Option<u8>,
}

impl MockClock {
    /// Create a mock clock starting at `start_ms` epoch milliseconds.
    pub fn new(start_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockTime {
                now_ms: start_ms,
                hour: None,
            })),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut time = self.lock();
        time.now_ms = time
            .now_ms
            .saturating_add(duration.as_millis().try_into().unwrap_or(u64::MAX));
    }

    /// Set the clock to specific epoch milliseconds.
    pub fn set(&self, now_ms: u64) {
        self.lock().now_ms = now_ms;
    }

    /// Pin the hour reported by [`Clock::hour`], independent of the current time.
    pub fn set_hour(&self, hour: u8) {
        self.lock().hour = Some(hour % 24);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockTime> {
        self.state
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.lock().now_ms
    }

    fn hour(&self) -> u8 {
        let time = self.lock();
        time.hour
            .unwrap_or(((time.now_ms / MS_PER_HOUR) % 24) as u8)
    }
}
