// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Models of the MLX90640 status and control registers.
//!
//! Both registers carry bits that are reserved by Melexis. The register types keep those bits
//! around so that a read-modify-write cycle hands back exactly what the camera gave us, with only
//! the fields we meant to change altered.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::common::Address;
use crate::util::is_bit_set;

/// Trait for common register functionality.
pub trait Register: From<u16> + Into<u16> + Copy {
    /// A bit mask of which bits can be modified by the controller.
    fn write_mask() -> u16;

    /// The address of this register in the camera's memory map.
    fn address() -> Address;
}

/// Represents the possible states of the status register (0x8000).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatusRegister {
    /// The subpage which was last updated by the camera. Read-only.
    pub(crate) last_updated_subpage: Subpage,

    /// Set when there is new data available in RAM.
    ///
    /// This flag is set to true by the camera, and can only be reset by the controller.
    pub(crate) new_data: bool,

    /// Whether data in RAM can be overwritten.
    pub(crate) overwrite_enabled: bool,

    /// Start a measurement in step mode.
    pub(crate) start_measurement: bool,

    /// Every bit not covered by the fields above, as it was read.
    reserved: u16,
}

impl StatusRegister {
    const FIELDS: u16 = 0x0039;

    /// The subpage the camera most recently wrote to RAM.
    pub fn last_updated_subpage(&self) -> Subpage {
        self.last_updated_subpage
    }

    /// Whether the camera has published data the controller hasn't acknowledged yet.
    pub fn new_data(&self) -> bool {
        self.new_data
    }

    /// The same register value with the new data flag cleared.
    ///
    /// Writing this back acknowledges the data currently in RAM.
    pub fn acknowledged(self) -> Self {
        Self {
            new_data: false,
            ..self
        }
    }
}

impl Register for StatusRegister {
    fn write_mask() -> u16 {
        // The three least significant bits are read-only.
        0x0038
    }

    fn address() -> Address {
        0x8000.into()
    }
}

impl From<u16> for StatusRegister {
    fn from(raw: u16) -> Self {
        // Only the first bit is used, the other two bits for this value are Melexis reserved.
        let last_updated_subpage = if is_bit_set(raw, 0) {
            Subpage::One
        } else {
            Subpage::Zero
        };
        Self {
            last_updated_subpage,
            new_data: is_bit_set(raw, 3),
            overwrite_enabled: is_bit_set(raw, 4),
            start_measurement: is_bit_set(raw, 5),
            reserved: raw & !Self::FIELDS,
        }
    }
}

impl From<StatusRegister> for u16 {
    fn from(status: StatusRegister) -> Self {
        let mut raw = status.reserved;
        raw |= status.last_updated_subpage as u16;
        raw |= (status.new_data as u16) << 3;
        raw |= (status.overwrite_enabled as u16) << 4;
        raw |= (status.start_measurement as u16) << 5;
        raw
    }
}

/// Represents the possible states of the control register (0x800D).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
// skip formatting in here as rustfmt will remove the extra blank lines around the "extra" bit
// comments.
#[rustfmt::skip]
pub struct ControlRegister {
    // The fields in this struct are laid out in least to most significant bits they occupy in the
    // control register.

    /// Whether or not to use subpages.
    pub(crate) use_subpages: bool,

    /// Enable "step mode".
    ///
    /// This mode is documented in older versions of the datasheet, but was later removed.
    pub(crate) step_mode: bool,

    /// Enabled data hold.
    pub(crate) data_hold: bool,

    /// Whether or not to keep measuring the same subpage.
    pub(crate) subpage_repeat: bool,

    /// Which subpage to use when `subpage_repeat` is enabled.
    pub(crate) subpage: Subpage,

    // `subpage` takes up three bits.

    /// The refresh rate the camera runs at.
    pub(crate) refresh_rate: RefreshRate,

    // `refresh_rate` takes up three bits

    /// The resolution to run the internal ADC at.
    pub(crate) resolution: Resolution,

    // `resolution` takes up two bits.

    /// Which access pattern to use.
    pub(crate) access_pattern: AccessPattern,

    /// The remaining bits, kept as they were read.
    reserved: u16,
}

impl ControlRegister {
    const FIELDS: u16 = 0x1F9F;

    /// The default settings (as documented in the datasheet) for the MLX90640.
    pub fn default_mlx90640() -> Self {
        Self {
            use_subpages: true,
            step_mode: false,
            data_hold: false,
            subpage_repeat: false,
            subpage: Subpage::Zero,
            refresh_rate: RefreshRate::default(),
            resolution: Resolution::default(),
            access_pattern: AccessPattern::Chess,
            reserved: 0,
        }
    }

    pub fn refresh_rate(&self) -> RefreshRate {
        self.refresh_rate
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn access_pattern(&self) -> AccessPattern {
        self.access_pattern
    }

    /// The same register value with a different refresh rate. All other bits are untouched.
    pub fn with_refresh_rate(self, refresh_rate: RefreshRate) -> Self {
        Self {
            refresh_rate,
            ..self
        }
    }
}

impl Default for ControlRegister {
    fn default() -> Self {
        Self::default_mlx90640()
    }
}

impl Register for ControlRegister {
    fn write_mask() -> u16 {
        // *Technically* it's 0x1FFD, but the second bit is documented to always be 0
        0x1FFF
    }

    fn address() -> Address {
        0x800D.into()
    }
}

impl From<u16> for ControlRegister {
    fn from(raw: u16) -> Self {
        let subpage = if is_bit_set(raw, 4) {
            Subpage::One
        } else {
            Subpage::Zero
        };
        let access_pattern = if is_bit_set(raw, 12) {
            AccessPattern::Chess
        } else {
            AccessPattern::Interleave
        };
        Self {
            use_subpages: is_bit_set(raw, 0),
            step_mode: is_bit_set(raw, 1),
            data_hold: is_bit_set(raw, 2),
            subpage_repeat: is_bit_set(raw, 3),
            subpage,
            refresh_rate: RefreshRate::from_code((raw & 0x0380) >> 7),
            resolution: Resolution::from_code((raw & 0x0C00) >> 10),
            access_pattern,
            reserved: raw & !Self::FIELDS,
        }
    }
}

impl From<ControlRegister> for u16 {
    fn from(register: ControlRegister) -> Self {
        let mut raw = register.reserved;
        raw |= register.use_subpages as u16;
        raw |= (register.step_mode as u16) << 1;
        raw |= (register.data_hold as u16) << 2;
        raw |= (register.subpage_repeat as u16) << 3;
        raw |= (register.subpage as u16) << 4;
        raw |= register.refresh_rate.code() << 7;
        raw |= register.resolution.code() << 10;
        raw |= (register.access_pattern as u16) << 12;
        raw
    }
}

/// Identify which subpage (or subframe) to access.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(usize)]
pub enum Subpage {
    Zero = 0,
    One = 1,
}

impl Subpage {
    /// Both subpages, in the order a frame is assembled.
    pub const ALL: [Subpage; 2] = [Subpage::Zero, Subpage::One];
}

/// The refresh rates supported by the MLX90640, as complete frames (both subpages) per second.
///
/// Before using the higher refresh rates, ensure the I²C bus is fast enough:
///
/// * 100kHz: [2Hz][RefreshRate::Two]
/// * 400kHz: [8Hz][RefreshRate::Eight]
/// * 1MHz: [32Hz][RefreshRate::ThirtyTwo] (barely, [16Hz][RefreshRate::Sixteen] is safer)
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum RefreshRate {
    /// One frame every four seconds.
    Quarter = 0,

    /// One frame every two seconds.
    Half = 1,

    One = 2,

    /// 2Hz, the power-on default.
    Two = 3,

    Four = 4,

    Eight = 5,

    Sixteen = 6,

    ThirtyTwo = 7,
}

impl RefreshRate {
    /// Pick the refresh rate for a user facing frame rate setting.
    ///
    /// Rates are rounded down to the nearest supported rate, and anything under 2 becomes 1. The
    /// sub-1Hz rates are never chosen.
    pub fn from_fps(fps: i32) -> Self {
        match fps {
            fps if fps >= 32 => Self::ThirtyTwo,
            fps if fps >= 16 => Self::Sixteen,
            fps if fps >= 8 => Self::Eight,
            fps if fps >= 4 => Self::Four,
            fps if fps >= 2 => Self::Two,
            _ => Self::One,
        }
    }

    /// The 3-bit value used in the control register.
    pub fn code(self) -> u16 {
        self.into()
    }

    /// Only the low three bits of `code` are used.
    pub(crate) fn from_code(code: u16) -> Self {
        match Self::try_from_primitive(code & 0x7) {
            Ok(rate) => rate,
            // Three bits can't hold anything else.
            Err(_) => Self::default(),
        }
    }

    /// How long the camera takes to measure one subpage, in microseconds.
    pub fn half_period_micros(self) -> u32 {
        2_000_000 >> self.code()
    }
}

impl Default for RefreshRate {
    fn default() -> Self {
        Self::Two
    }
}

/// The resolution of the internal [ADC][adc].
///
/// [adc]: https://en.wikipedia.org/wiki/Analog-to-digital_converter
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Resolution {
    /// 16-bit.
    Sixteen = 0,

    /// 17-bit.
    Seventeen = 1,

    /// 18-bit, the default.
    Eighteen = 2,

    /// 19-bit.
    Nineteen = 3,
}

impl Resolution {
    /// The 2-bit value used in the control register (and the EEPROM).
    pub fn code(self) -> u16 {
        self.into()
    }

    pub(crate) fn from_code(code: u16) -> Self {
        match Self::try_from_primitive(code & 0x3) {
            Ok(resolution) => resolution,
            Err(_) => Self::default(),
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::Eighteen
    }
}

/// The pixel access pattern used by the camera.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum AccessPattern {
    /// Pixels alternate between subpages, resulting in a chess or checker board pattern.
    ///
    /// This is the default (and strongly recommended value) for the MLX90640.
    Chess = 1,

    /// Each row of pixels is in the same subpage, with the rows alternating between subpages.
    Interleave = 0,
}

impl AccessPattern {
    /// Which subpage the pixel at `row`, `column` is measured in.
    pub fn subpage_of(self, row: usize, column: usize) -> Subpage {
        let odd = match self {
            AccessPattern::Chess => (row % 2) ^ (column % 2),
            AccessPattern::Interleave => row % 2,
        };
        if odd == 1 {
            Subpage::One
        } else {
            Subpage::Zero
        }
    }
}
