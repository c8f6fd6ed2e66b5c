// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Frame types moved between the sensor driver, the temperature calculations and the renderer.
use core::fmt::Debug;

use crate::calculations;
use crate::calibration::CalibrationParameters;
use crate::common::{RamAddress, HEIGHT, NUM_PIXELS, RAM_WORDS, SCALE_FACTOR, WIDTH};
use crate::register::{ControlRegister, RefreshRate, Subpage};

/// One subpage worth of camera RAM, along with the register state it was captured under.
#[derive(Clone, PartialEq)]
pub struct Subframe {
    data: [u16; RAM_WORDS],

    /// The control register, sampled right after `data` was read.
    control: ControlRegister,

    /// The subpage `data` belongs to, taken from the status register.
    subpage: Subpage,
}

impl Subframe {
    pub fn new(data: [u16; RAM_WORDS], control: ControlRegister, subpage: Subpage) -> Self {
        Self {
            data,
            control,
            subpage,
        }
    }

    /// The raw RAM words: 768 pixels in row-major order, then the auxiliary words.
    pub fn data(&self) -> &[u16; RAM_WORDS] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u16; RAM_WORDS] {
        &mut self.data
    }

    pub fn control(&self) -> ControlRegister {
        self.control
    }

    pub(crate) fn set_control(&mut self, control: ControlRegister) {
        self.control = control;
    }

    pub fn subpage(&self) -> Subpage {
        self.subpage
    }

    pub(crate) fn set_subpage(&mut self, subpage: Subpage) {
        self.subpage = subpage;
    }

    /// Auxiliary RAM values are all signed.
    pub(crate) fn word(&self, address: RamAddress) -> i16 {
        self.data[address.word()] as i16
    }

    pub(crate) fn pixel(&self, index: usize) -> i16 {
        self.data[index] as i16
    }
}

impl Default for Subframe {
    fn default() -> Self {
        Self {
            data: [0; RAM_WORDS],
            control: ControlRegister::default(),
            subpage: Subpage::Zero,
        }
    }
}

impl Debug for Subframe {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subframe")
            .field("control", &self.control)
            .field("subpage", &self.subpage)
            .finish()
    }
}

/// Both subframes of a complete image, as read from the camera.
///
/// `subframes[0]` holds subpage 0 and `subframes[1]` subpage 1 once
/// [`read_frame`][FrameSource::read_frame] succeeds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawFrame {
    pub subframes: [Subframe; 2],
}

/// A complete image of temperatures, in `°C × SCALE_FACTOR`.
///
/// Values are stored in the order the camera reports them. Use
/// [`temperature_at`][ProcessedFrame::temperature_at] to index the way the image is displayed.
#[derive(Clone, PartialEq)]
pub struct ProcessedFrame {
    temperatures: [i16; NUM_PIXELS],
}

impl ProcessedFrame {
    pub const WIDTH: usize = WIDTH;

    pub const HEIGHT: usize = HEIGHT;

    pub const SCALE_FACTOR: i16 = SCALE_FACTOR;

    pub fn new(temperatures: [i16; NUM_PIXELS]) -> Self {
        Self { temperatures }
    }

    /// The scaled temperature at `x`, `y`, with `0, 0` the top left of the displayed image.
    ///
    /// The sensor is mounted with its columns mirrored, so this flips the x axis.
    pub fn temperature_at(&self, x: usize, y: usize) -> i16 {
        self.temperatures[(WIDTH - 1 - x) + y * WIDTH]
    }

    /// Like [`temperature_at`][ProcessedFrame::temperature_at], converted to degrees Celsius.
    pub fn celsius_at(&self, x: usize, y: usize) -> f32 {
        to_celsius(self.temperature_at(x, y))
    }

    /// The reading under the crosshair in the middle of the image.
    pub fn center(&self) -> i16 {
        self.temperature_at(WIDTH / 2, HEIGHT / 2)
    }

    pub fn min(&self) -> i16 {
        self.temperatures.iter().copied().min().unwrap_or_default()
    }

    pub fn max(&self) -> i16 {
        self.temperatures.iter().copied().max().unwrap_or_default()
    }

    /// The scaled temperatures in sensor order.
    pub fn temperatures(&self) -> &[i16; NUM_PIXELS] {
        &self.temperatures
    }
}

impl Default for ProcessedFrame {
    fn default() -> Self {
        Self::new([0; NUM_PIXELS])
    }
}

impl Debug for ProcessedFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessedFrame")
            .field("min", &self.min())
            .field("max", &self.max())
            .field("center", &self.center())
            .finish()
    }
}

/// Convert a scaled temperature to degrees Celsius.
pub fn to_celsius(scaled: i16) -> f32 {
    f32::from(scaled) / f32::from(SCALE_FACTOR)
}

/// Something that produces raw frames, normally the camera driver.
pub trait FrameSource {
    type Error: Debug;

    /// The refresh rate the source is currently running at.
    fn refresh_rate(&self) -> RefreshRate;

    /// Change the refresh rate. On failure the previous rate stays in effect.
    fn set_refresh_rate(&mut self, refresh_rate: RefreshRate) -> Result<(), Self::Error>;

    /// Block until both subframes have been read into `frame`.
    fn read_frame(&mut self, frame: &mut RawFrame) -> Result<(), Self::Error>;
}

/// Something that turns raw frames into temperatures.
pub trait FrameProcessor {
    fn process(&self, frame: &RawFrame, emissivity: f32) -> ProcessedFrame;
}

impl FrameProcessor for CalibrationParameters {
    fn process(&self, frame: &RawFrame, emissivity: f32) -> ProcessedFrame {
        calculations::process_frame(self, frame, emissivity)
    }
}

#[cfg(feature = "std")]
impl<P: FrameProcessor + ?Sized> FrameProcessor for std::sync::Arc<P> {
    fn process(&self, frame: &RawFrame, emissivity: f32) -> ProcessedFrame {
        (**self).process(frame, emissivity)
    }
}

#[cfg(test)]
mod test {
    use crate::common::{NUM_PIXELS, WIDTH};

    use super::{to_celsius, ProcessedFrame};

    fn numbered_frame() -> ProcessedFrame {
        let mut temperatures = [0i16; NUM_PIXELS];
        temperatures
            .iter_mut()
            .enumerate()
            .for_each(|(index, t)| *t = index as i16);
        ProcessedFrame::new(temperatures)
    }

    #[test]
    fn temperature_at_mirrors_columns() {
        let frame = numbered_frame();
        assert_eq!(frame.temperature_at(0, 0), 31);
        assert_eq!(frame.temperature_at(31, 0), 0);
        assert_eq!(frame.temperature_at(0, 1), 63);
        assert_eq!(frame.temperature_at(5, 23), (23 * WIDTH + 26) as i16);
    }

    #[test]
    fn summary_values() {
        let frame = numbered_frame();
        assert_eq!(frame.min(), 0);
        assert_eq!(frame.max(), 767);
        assert_eq!(frame.center(), (12 * WIDTH + 15) as i16);
    }

    #[test]
    fn celsius() {
        assert_eq!(to_celsius(321), 80.25);
        assert_eq!(to_celsius(-2), -0.5);
        let frame = numbered_frame();
        assert_eq!(frame.celsius_at(31, 0), 0.0);
        assert_eq!(frame.celsius_at(30, 0), 0.25);
    }
}
