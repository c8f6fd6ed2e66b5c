// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Sensor geometry and the MLX90640 memory map.
//!
//! A short decoder ring for the names used around the calibration code:
//!
//! <dl>
//! <dt>α, alpha</dt><dd>Sensitivity coefficient</dd>
//! <dt>CP</dt><dd>Compensation pixel, a blind pixel used to track thermal drift</dd>
//! <dt>ε, emissivity</dt><dd>How much IR radiation a surface emits compared to a black body</dd>
//! <dt>K</dt><dd>Prefix for constants</dd>
//! <dt>PTAT</dt><dd>Proportional to ambient temperature</dd>
//! <dt>T<sub>a</sub></dt><dd>Ambient (sensor die) temperature</dd>
//! <dt>T<sub>o</sub></dt><dd>Object temperature, what a pixel sees</dd>
//! <dt>T<sub>r</sub></dt><dd>Reflected temperature</dd>
//! <dt>V<sub>DD</sub></dt><dd>Pixel supply voltage</dd>
//! </dl>
use core::convert::TryFrom;
use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive, TryFromPrimitiveError};

use crate::address_enum_ops;

/// Pixels per row.
pub const WIDTH: usize = 32;

/// Pixels per column.
pub const HEIGHT: usize = 24;

pub const NUM_PIXELS: usize = WIDTH * HEIGHT;

/// Words in the RAM block read for each subframe: the pixels plus 64 auxiliary words.
pub const RAM_WORDS: usize = 832;

/// Words in the calibration EEPROM.
pub const EEPROM_WORDS: usize = 832;

/// Processed temperatures are stored as `°C × SCALE_FACTOR`.
pub const SCALE_FACTOR: i16 = 4;

/// Absolute zero offset used to move between Kelvin and Celsius.
pub(crate) const KELVINS_TO_CELSIUS: f32 = 273.15;

/// Marker newtype for addresses accessible over I<sup>2</sup>C.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Address(u16);

impl Address {
    /// Wrap the given address in an `Address`.
    pub const fn new(address: u16) -> Self {
        Self(address)
    }

    pub(crate) fn as_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#X})", self.0)
    }
}

impl From<u16> for Address {
    fn from(raw_address: u16) -> Self {
        Self::new(raw_address)
    }
}

impl From<Address> for u16 {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// EEPROM words used by the calibration code.
///
/// Discriminants are written out to make comparing against the datasheet easier. Everything in the
/// calibration code works on word offsets from [`Base`][EepromAddress::Base], see
/// [`EepromAddress::word`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum EepromAddress {
    /// The start of the EEPROM. The first 16 words are device configuration, not calibration.
    Base = 0x2400,

    /// The word holding the device select and calibration mode bits.
    DeviceOptions = 0x240A,

    /// α PTAT and offset compensation scaling factors (row, column and remainder).
    OffsetCompensation = 0x2410,

    PixelOffsetAverage = 0x2411,

    OffsetCompensationRowStart = 0x2412,

    OffsetCompensationColumnStart = 0x2418,

    /// α scaling factor, and pixel α compensation scaling factors.
    SensitivityScale = 0x2420,

    PixelSensitivityAverage = 0x2421,

    PixelSensitivityCompensationRowStart = 0x2422,

    PixelSensitivityCompensationColumnStart = 0x2428,

    Gain = 0x2430,

    Ptat25 = 0x2431,

    /// K<sub>V<sub>PTAT</sub></sub> and K<sub>t<sub>PTAT</sub></sub>
    PtatConstants = 0x2432,

    /// K<sub>V<sub>DD</sub></sub> and V<sub>DD<sub>25</sub></sub>
    VddConstants = 0x2433,

    AverageVoltageConstants = 0x2434,

    /// Interleaved mode correction coefficients.
    InterlacedModeCompensation = 0x2435,

    /// K<sub>T<sub>a</sub></sub> averages for even (zero-indexed) columns, both row parities.
    AmbientTemperatureAverageConstantsEvenColumns = 0x2436,

    /// K<sub>T<sub>a</sub></sub> averages for odd (zero-indexed) columns, both row parities.
    AmbientTemperatureAverageConstantsOddColumns = 0x2437,

    /// Scaling factors for K<sub>V</sub> and K<sub>T<sub>a</sub></sub>, and the calibration ADC
    /// resolution.
    VAndTaScale = 0x2438,

    CompensationPixelSensitivity = 0x2439,

    CompensationPixelOffset = 0x243A,

    /// K<sub>v</sub> and K<sub>T<sub>a</sub></sub> for the compensation pixels.
    CompensationPixelConstants = 0x243B,

    /// K<sub>S<sub>T<sub>a</sub></sub></sub> and the temperature gradient coefficient.
    AmbientTemperatureSensitivityConstant = 0x243C,

    /// K<sub>S<sub>T<sub>o</sub></sub></sub> for ranges 0 and 1.
    ObjectTemperatureSensitivityRangeConstants1 = 0x243D,

    /// K<sub>S<sub>T<sub>o</sub></sub></sub> for ranges 2 and 3.
    ObjectTemperatureSensitivityRangeConstants2 = 0x243E,

    /// Corner temperatures, their step, and the K<sub>S<sub>T<sub>o</sub></sub></sub> scale.
    CornerTemperatures = 0x243F,

    /// The start of the per-pixel calibration words, in row-major order.
    PixelCalibrationStart = 0x2440,

    /// The last valid address in the MLX90640 EEPROM.
    End = 0x273F,
}

address_enum_ops!(EepromAddress);

impl EepromAddress {
    /// Index of this address in the EEPROM dump.
    pub fn word(self) -> usize {
        (self - EepromAddress::Base) as usize
    }
}

impl TryFrom<Address> for EepromAddress {
    type Error = TryFromPrimitiveError<EepromAddress>;

    fn try_from(value: Address) -> Result<Self, Self::Error> {
        let raw_address: u16 = value.into();
        Self::try_from(raw_address)
    }
}

impl From<EepromAddress> for Address {
    fn from(eeprom_address: EepromAddress) -> Self {
        let raw_address: u16 = eeprom_address.into();
        raw_address.into()
    }
}

/// RAM words read by the temperature calculations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum RamAddress {
    /// The start of RAM, also the first pixel. Pixels are laid out in row-major order.
    Base = 0x0400,

    /// V<sub>BE</sub>, used with PTAT to compute the ambient temperature.
    AmbientTemperatureVoltageBe = 0x0700,

    /// The compensation pixel for subpage 0.
    CompensationPixelZero = 0x0708,

    /// The current (in the temporal sense, not electrical) gain.
    Gain = 0x070A,

    /// Ambient temperature voltage, labelled T<sub>a<sub>PTAT</sub></sub> in the datasheet.
    AmbientTemperatureVoltage = 0x0720,

    /// The compensation pixel for subpage 1.
    CompensationPixelOne = 0x0728,

    /// The pixel supply voltage, labelled V<sub>DD<sub>pix</sub></sub> in the datasheet.
    PixelSupplyVoltage = 0x072A,

    /// The last valid RAM address for the MLX90640.
    End = 0x073F,
}

address_enum_ops!(RamAddress);

impl RamAddress {
    /// Index of this address within a subframe's RAM block.
    pub fn word(self) -> usize {
        (self - RamAddress::Base) as usize
    }
}

impl From<RamAddress> for Address {
    fn from(ram_address: RamAddress) -> Self {
        let raw_address: u16 = ram_address.into();
        raw_address.into()
    }
}

#[cfg(test)]
mod test {
    use core::convert::TryFrom;

    use super::{Address, EepromAddress, RamAddress, EEPROM_WORDS, RAM_WORDS};

    #[test]
    fn ram_word_offsets() {
        assert_eq!(RamAddress::AmbientTemperatureVoltageBe.word(), 768);
        assert_eq!(RamAddress::CompensationPixelZero.word(), 776);
        assert_eq!(RamAddress::Gain.word(), 778);
        assert_eq!(RamAddress::AmbientTemperatureVoltage.word(), 800);
        assert_eq!(RamAddress::CompensationPixelOne.word(), 808);
        assert_eq!(RamAddress::PixelSupplyVoltage.word(), 810);
        assert_eq!(RamAddress::End.word(), RAM_WORDS - 1);
    }

    #[test]
    fn eeprom_word_offsets() {
        assert_eq!(EepromAddress::DeviceOptions.word(), 10);
        assert_eq!(EepromAddress::Gain.word(), 48);
        assert_eq!(EepromAddress::CornerTemperatures.word(), 63);
        assert_eq!(EepromAddress::PixelCalibrationStart.word(), 64);
        assert_eq!(EepromAddress::End.word(), EEPROM_WORDS - 1);
    }

    #[test]
    fn eeprom_address_conversion() {
        let address = Address::new(0x2433);
        assert_eq!(
            EepromAddress::try_from(address).unwrap(),
            EepromAddress::VddConstants
        );
        assert!(EepromAddress::try_from(Address::new(0x2401)).is_err());
        assert_eq!(u16::from(Address::from(RamAddress::Gain)), 0x070A);
    }
}
