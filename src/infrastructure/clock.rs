//! Clock adapters for time operations.
//!
//! Provides SystemClock implementation for production use.
//!
//! # Testing
//!
//! See `MockClock` (in `crate::infrastructure::mocks`) for a controllable test clock.
//! Available with the `test-helpers` feature or in test builds:
//!
//! ```toml
//! [dev-dependencies]
//! admission-guard = { version = "*", features = ["test-helpers"] }
//! ```

use crate::application::ports::Clock;
use chrono::{Local, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Time zone used to read the wall-clock hour for peak-hour decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockZone {
    /// Server-local time
    #[default]
    Local,
    /// Coordinated universal time, independent of host configuration
    Utc,
}

/// System clock backed by `chrono`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    zone: ClockZone,
}

impl SystemClock {
    /// Create a system clock reading server-local hours.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a system clock reading hours in `zone`.
    pub fn with_zone(zone: ClockZone) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> ClockZone {
        self.zone
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }

    fn hour(&self) -> u8 {
        let hour = match self.zone {
            ClockZone::Local => Local::now().hour(),
            ClockZone::Utc => Utc::now().hour(),
        };
        hour as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_clock() {
        let clock = SystemClock::new();
        let t1 = clock.now_ms();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = clock.now_ms();

        assert!(t2 > t1);
        assert!(clock.hour() < 24);
    }

    #[test]
    fn test_utc_zone() {
        let clock = SystemClock::with_zone(ClockZone::Utc);
        assert_eq!(clock.zone(), ClockZone::Utc);
        assert!(clock.hour() < 24);
    }

    #[test]
    fn test_zone_deserializes_lowercase() {
        let zone: ClockZone = serde_json::from_str("\"utc\"").unwrap();
        assert_eq!(zone, ClockZone::Utc);
        assert_eq!(ClockZone::default(), ClockZone::Local);
    }
}
