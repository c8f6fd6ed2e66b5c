// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use embedded_hal::blocking::delay::DelayUs;

/// A microsecond clock that only moves when something sleeps on it.
///
/// Clones share the same time, so a mock bus and the driver under test agree on "now".
#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    micros: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(micros: u64) -> Self {
        Self {
            micros: Arc::new(AtomicU64::new(micros)),
        }
    }

    /// The current time in microseconds.
    pub fn now(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }

    pub fn advance(&self, micros: u64) {
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }
}

impl DelayUs<u32> for VirtualClock {
    fn delay_us(&mut self, us: u32) {
        self.advance(u64::from(us));
    }
}

#[cfg(test)]
mod test {
    use embedded_hal::blocking::delay::DelayUs;

    use super::VirtualClock;

    #[test]
    fn clones_share_time() {
        let mut clock = VirtualClock::starting_at(10);
        let other = clock.clone();
        clock.delay_us(90);
        assert_eq!(other.now(), 100);
        other.advance(5);
        assert_eq!(clock.now(), 105);
    }
}
