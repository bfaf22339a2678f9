//! A monotonic timestamp, used for hold-off windows in the detection logic.

use core::time::Duration;

/// A time instant, from the start of a timer, with microsecond precision. Created from a
/// `TimeSource`, or from a raw microsecond count.
#[derive(Eq, PartialEq, PartialOrd, Ord, Copy, Clone, Default, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Instant {
    /// Total count, in microseconds.
    count_us: u64,
}

impl Instant {
    pub const fn from_micros(count_us: u64) -> Self {
        Self { count_us }
    }

    /// The time, in microseconds
    pub fn as_micros(&self) -> u64 {
        self.count_us
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.count_us.saturating_sub(earlier.count_us))
    }
}
