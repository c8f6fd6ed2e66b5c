// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Timekeeping for the subframe polling loop.
//!
//! The camera free-runs and only signals new data through a status bit, so the driver sleeps
//! through most of each subframe period and polls only near the end of it.
use crate::register::RefreshRate;

/// A monotonic microsecond clock.
pub trait Clock {
    fn now_micros(&mut self) -> u64;
}

/// Tracks when the last subframe became ready, and how long to wait for the next one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubframeTiming {
    refresh_rate: RefreshRate,

    last_ready: u64,
}

impl SubframeTiming {
    pub fn new(refresh_rate: RefreshRate, now: u64) -> Self {
        Self {
            refresh_rate,
            last_ready: now,
        }
    }

    pub fn refresh_rate(&self) -> RefreshRate {
        self.refresh_rate
    }

    pub fn set_refresh_rate(&mut self, refresh_rate: RefreshRate) {
        self.refresh_rate = refresh_rate;
    }

    /// How long after a subframe becomes ready to start polling for the next one: 80% of the
    /// subframe period.
    pub fn wait_time(&self) -> u32 {
        self.refresh_rate.half_period_micros() * 8 / 10
    }

    /// How often to poll the status register, splitting the remaining 20% of the period in six.
    pub fn poll_time(&self) -> u32 {
        self.refresh_rate.half_period_micros() / 5 / 6
    }

    /// The timestamp of the last time a subframe was seen (or given up on).
    pub fn last_ready(&self) -> u64 {
        self.last_ready
    }

    /// Microseconds left before polling should start.
    pub fn remaining_wait(&self, now: u64) -> u32 {
        let due = self.last_ready + u64::from(self.wait_time());
        // Never more than wait_time, so it fits.
        due.saturating_sub(now) as u32
    }

    pub fn mark_ready(&mut self, now: u64) {
        self.last_ready = now;
    }
}

#[cfg(feature = "std")]
pub use self::std_clock::StdClock;

#[cfg(feature = "std")]
mod std_clock {
    use std::thread;
    use std::time::{Duration, Instant};

    use embedded_hal::blocking::delay::DelayUs;

    use super::Clock;

    /// Host clock and delay, backed by [`Instant`] and [`thread::sleep`].
    #[derive(Clone, Copy, Debug)]
    pub struct StdClock {
        start: Instant,
    }

    impl StdClock {
        pub fn new() -> Self {
            Self {
                start: Instant::now(),
            }
        }
    }

    impl Default for StdClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for StdClock {
        fn now_micros(&mut self) -> u64 {
            self.start.elapsed().as_micros() as u64
        }
    }

    impl DelayUs<u32> for StdClock {
        fn delay_us(&mut self, us: u32) {
            thread::sleep(Duration::from_micros(u64::from(us)));
        }
    }
}

#[cfg(test)]
mod test {
    use crate::register::RefreshRate;

    use super::SubframeTiming;

    #[test]
    fn eight_hertz() {
        let timing = SubframeTiming::new(RefreshRate::Eight, 0);
        assert_eq!(timing.wait_time(), 50_000);
        assert_eq!(timing.poll_time(), 2_083);
    }

    #[test]
    fn slowest_and_fastest() {
        let quarter = SubframeTiming::new(RefreshRate::Quarter, 0);
        assert_eq!(quarter.wait_time(), 1_600_000);
        assert_eq!(quarter.poll_time(), 66_666);
        let fastest = SubframeTiming::new(RefreshRate::ThirtyTwo, 0);
        assert_eq!(fastest.wait_time(), 12_500);
        assert_eq!(fastest.poll_time(), 520);
    }

    #[test]
    fn remaining_wait() {
        let mut timing = SubframeTiming::new(RefreshRate::Eight, 1_000);
        assert_eq!(timing.remaining_wait(1_000), 50_000);
        assert_eq!(timing.remaining_wait(41_000), 10_000);
        assert_eq!(timing.remaining_wait(51_000), 0);
        assert_eq!(timing.remaining_wait(90_000), 0);
        timing.mark_ready(100_000);
        assert_eq!(timing.last_ready(), 100_000);
        assert_eq!(timing.remaining_wait(100_000), 50_000);
    }

    #[test]
    fn rate_change_applies_to_next_wait() {
        let mut timing = SubframeTiming::new(RefreshRate::One, 0);
        assert_eq!(timing.wait_time(), 400_000);
        timing.set_refresh_rate(RefreshRate::Sixteen);
        assert_eq!(timing.refresh_rate(), RefreshRate::Sixteen);
        assert_eq!(timing.wait_time(), 25_000);
        assert_eq!(timing.poll_time(), 1_041);
    }
}
