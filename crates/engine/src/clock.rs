//! Microsecond timestamps
//!
//! [`Clock`] hands out strictly increasing wall-clock microseconds, so two
//! bundles committed by one database never share a timestamp.
//! [`GenericTimestamp`] is the loose notion of "when" accepted by reads and
//! resets; [`crate::Database::resolve_timestamp`] turns it into microseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use gink_core::{MuTimestamp, Muid};

/// Longest the clock sleeps waiting for the wall clock to catch up.
const MAX_WAIT_MICROS: MuTimestamp = 1_000;

/// Wall clock in microseconds since the epoch.
pub fn wall_micros() -> MuTimestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as MuTimestamp)
        .unwrap_or(0)
}

/// Strictly increasing microsecond clock.
#[derive(Debug, Default)]
pub struct Clock {
    last: Mutex<MuTimestamp>,
}

impl Clock {
    /// New clock that has issued nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time, later than anything issued before.
    ///
    /// Sleeps briefly instead of returning a repeated value. Once pushed
    /// ahead of the wall clock by [`Clock::now_after`] it counts up from
    /// there.
    pub fn now(&self) -> MuTimestamp {
        let mut last = self.last.lock();
        loop {
            let now = wall_micros();
            if now > *last {
                *last = now;
                return now;
            }
            if *last - now > MAX_WAIT_MICROS {
                *last += 1;
                return *last;
            }
            std::thread::sleep(Duration::from_micros(10));
        }
    }

    /// Current time, also later than `floor`.
    pub fn now_after(&self, floor: MuTimestamp) -> MuTimestamp {
        let now = self.now();
        if now > floor {
            return now;
        }
        let mut last = self.last.lock();
        *last = (*last).max(floor + 1);
        *last
    }
}

/// A point in time as callers like to say it.
///
/// Integers and floats are interpreted by magnitude; see
/// [`crate::Database::resolve_timestamp`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GenericTimestamp {
    /// The current time
    #[default]
    Now,
    /// Microseconds, seconds, or an index into the bundle journal
    Int(i64),
    /// Seconds since the epoch, or an offset in seconds from now
    Float(f64),
    /// The timestamp of a muid
    Muid(Muid),
}

/// Shorthand for [`GenericTimestamp::Now`].
pub const NOW: GenericTimestamp = GenericTimestamp::Now;

/// Timestamp used to read "everything that ever happened" when resetting.
pub const EPOCH: GenericTimestamp = GenericTimestamp::Int(0);

impl From<i64> for GenericTimestamp {
    fn from(value: i64) -> Self {
        GenericTimestamp::Int(value)
    }
}

impl From<i32> for GenericTimestamp {
    fn from(value: i32) -> Self {
        GenericTimestamp::Int(value as i64)
    }
}

impl From<f64> for GenericTimestamp {
    fn from(value: f64) -> Self {
        GenericTimestamp::Float(value)
    }
}

impl From<Muid> for GenericTimestamp {
    fn from(value: Muid) -> Self {
        GenericTimestamp::Muid(value)
    }
}

impl From<SystemTime> for GenericTimestamp {
    fn from(value: SystemTime) -> Self {
        let micros = value
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        GenericTimestamp::Int(micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_never_repeats() {
        let clock = Clock::new();
        let mut previous = clock.now();
        for _ in 0..1_000 {
            let now = clock.now();
            assert!(now > previous);
            previous = now;
        }
    }

    #[test]
    fn test_now_after_respects_floor() {
        let clock = Clock::new();
        let far = wall_micros() + 5_000_000;
        let stamped = clock.now_after(far);
        assert_eq!(stamped, far + 1);
        assert!(clock.now() > stamped);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(GenericTimestamp::from(-1), GenericTimestamp::Int(-1));
        assert_eq!(GenericTimestamp::from(0.5), GenericTimestamp::Float(0.5));
        let muid = Muid::new(1_700_000_000_000_000, 5, 1);
        assert_eq!(GenericTimestamp::from(muid), GenericTimestamp::Muid(muid));
        assert_eq!(GenericTimestamp::default(), NOW);
    }
}
