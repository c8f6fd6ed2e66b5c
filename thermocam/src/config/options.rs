// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::register::RefreshRate;

use super::Payload;

/// Frame rates offered in the settings menu, in the order they're cycled through.
const MAX_MENU_FRAME_RATE: i32 = 8;

const EMISSIVITY_STEP: f32 = 0.05;

/// Above this, stepping the emissivity wraps back around to the minimum.
const EMISSIVITY_WRAP: f32 = 0.925;

/// User settings that survive a power cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Options {
    /// Requested full frames per second. Mapped onto the camera's rates with
    /// [`RefreshRate::from_fps`].
    pub frame_rate: i32,

    /// Emissivity of whatever the camera is pointed at.
    pub emissivity: f32,
}

impl Options {
    pub fn refresh_rate(&self) -> RefreshRate {
        RefreshRate::from_fps(self.frame_rate)
    }

    /// Step to the next frame rate in the menu: 1, 2, 4, 8, then back to 1.
    pub fn cycle_frame_rate(&mut self) {
        self.frame_rate = if self.frame_rate >= MAX_MENU_FRAME_RATE || self.frame_rate < 1 {
            1
        } else {
            self.frame_rate * 2
        };
    }

    /// Step the emissivity up by 0.05, wrapping back to 0.05 past 0.925.
    pub fn cycle_emissivity(&mut self) {
        // Written so that NaN wraps as well.
        self.emissivity = if self.emissivity <= EMISSIVITY_WRAP {
            self.emissivity + EMISSIVITY_STEP
        } else {
            EMISSIVITY_STEP
        };
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            frame_rate: 8,
            emissivity: 0.95,
        }
    }
}

impl Payload for Options {
    const SIZE: usize = 8;

    fn encode(&self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.frame_rate.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.emissivity.to_le_bytes());
    }

    fn decode(&mut self, bytes: &[u8]) {
        self.frame_rate = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.emissivity = f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    }
}

/// [`Options`] that can be changed from one thread while others are reading them.
///
/// Each field is its own atomic, so a reader racing a writer may see one field updated and not
/// the other. The pipeline only reads each field once per frame, so that's fine.
#[derive(Debug)]
pub struct LiveOptions {
    frame_rate: AtomicI32,

    /// The bits of an `f32`.
    emissivity: AtomicU32,
}

impl LiveOptions {
    pub fn new(options: Options) -> Self {
        Self {
            frame_rate: AtomicI32::new(options.frame_rate),
            emissivity: AtomicU32::new(options.emissivity.to_bits()),
        }
    }

    pub fn frame_rate(&self) -> i32 {
        self.frame_rate.load(Ordering::Relaxed)
    }

    pub fn set_frame_rate(&self, frame_rate: i32) {
        self.frame_rate.store(frame_rate, Ordering::Relaxed);
    }

    pub fn emissivity(&self) -> f32 {
        f32::from_bits(self.emissivity.load(Ordering::Relaxed))
    }

    pub fn set_emissivity(&self, emissivity: f32) {
        self.emissivity
            .store(emissivity.to_bits(), Ordering::Relaxed);
    }

    pub fn refresh_rate(&self) -> RefreshRate {
        RefreshRate::from_fps(self.frame_rate())
    }

    /// A copy of the current settings, for saving.
    pub fn snapshot(&self) -> Options {
        Options {
            frame_rate: self.frame_rate(),
            emissivity: self.emissivity(),
        }
    }

    pub fn apply(&self, options: Options) {
        self.set_frame_rate(options.frame_rate);
        self.set_emissivity(options.emissivity);
    }

    /// See [`Options::cycle_frame_rate`]. Returns the new frame rate.
    pub fn cycle_frame_rate(&self) -> i32 {
        let mut options = self.snapshot();
        options.cycle_frame_rate();
        self.set_frame_rate(options.frame_rate);
        options.frame_rate
    }

    /// See [`Options::cycle_emissivity`]. Returns the new emissivity.
    pub fn cycle_emissivity(&self) -> f32 {
        let mut options = self.snapshot();
        options.cycle_emissivity();
        self.set_emissivity(options.emissivity);
        options.emissivity
    }
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

#[cfg(test)]
mod test {
    use float_cmp::assert_approx_eq;

    use crate::config::Payload;
    use crate::register::RefreshRate;

    use super::{LiveOptions, Options};

    #[test]
    fn defaults() {
        let options = Options::default();
        assert_eq!(options.frame_rate, 8);
        assert_approx_eq!(f32, options.emissivity, 0.95);
        assert_eq!(options.refresh_rate(), RefreshRate::Eight);
    }

    #[test]
    fn payload_layout() {
        let options = Options {
            frame_rate: 4,
            emissivity: 1.0,
        };
        let mut bytes = [0u8; Options::SIZE];
        options.encode(&mut bytes);
        assert_eq!(bytes, [0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x3F]);
        let mut decoded = Options::default();
        decoded.decode(&bytes);
        assert_eq!(decoded, options);
    }

    #[test]
    fn frame_rate_menu() {
        let mut options = Options {
            frame_rate: 1,
            ..Options::default()
        };
        let mut seen = [0; 5];
        for rate in seen.iter_mut() {
            *rate = options.frame_rate;
            options.cycle_frame_rate();
        }
        assert_eq!(seen, [1, 2, 4, 8, 1]);
        options.frame_rate = 32;
        options.cycle_frame_rate();
        assert_eq!(options.frame_rate, 1);
        options.frame_rate = 0;
        options.cycle_frame_rate();
        assert_eq!(options.frame_rate, 1);
    }

    #[test]
    fn emissivity_menu() {
        let mut options = Options::default();
        options.cycle_emissivity();
        assert_approx_eq!(f32, options.emissivity, 0.05);
        options.cycle_emissivity();
        assert_approx_eq!(f32, options.emissivity, 0.1);
        options.emissivity = 0.925;
        options.cycle_emissivity();
        assert_approx_eq!(f32, options.emissivity, 0.975);
        options.cycle_emissivity();
        assert_approx_eq!(f32, options.emissivity, 0.05);
        options.emissivity = f32::NAN;
        options.cycle_emissivity();
        assert_approx_eq!(f32, options.emissivity, 0.05);
    }

    #[test]
    fn live_options() {
        let live = LiveOptions::default();
        assert_eq!(live.snapshot(), Options::default());
        assert_eq!(live.cycle_frame_rate(), 1);
        assert_eq!(live.refresh_rate(), RefreshRate::One);
        assert_approx_eq!(f32, live.cycle_emissivity(), 0.05);
        live.apply(Options {
            frame_rate: 16,
            emissivity: 0.5,
        });
        assert_eq!(live.frame_rate(), 16);
        assert_approx_eq!(f32, live.emissivity(), 0.5);
    }
}
