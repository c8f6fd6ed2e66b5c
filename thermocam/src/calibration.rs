// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Factory calibration data for the MLX90640.
//!
//! Every camera has calibration data stored in its EEPROM. That data is used as the input for
//! the constants needed to convert raw pixel readings into temperatures. Field names follow the
//! names used in the datasheet formulas.
use core::fmt;

use arrayvec::ArrayVec;
use num_traits::Float;

use crate::common::{EepromAddress, EEPROM_WORDS, NUM_PIXELS, WIDTH};
use crate::error::LibraryError;
use crate::register::{AccessPattern, Resolution, Subpage};
use crate::util::{copy_be_words, i16_from_bits, is_bit_set, Buffer};

/// The number of corner temperatures an MLX90640 has.
pub const NUM_CORNER_TEMPERATURES: usize = 4;

/// The most broken or outlier pixels a camera may have and still be usable.
pub const MAX_DEVIATING_PIXELS: usize = 4;

/// The index of the basic temperature range (0 to CT2).
const BASIC_TEMPERATURE_RANGE: usize = 1;

/// The word size of the MLX90640 in terms of 8-bit bytes.
const WORD_SIZE: usize = 16 / 8;

/// Why a pixel is listed as deviating.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Deviation {
    /// The calibration word for the pixel is zero, the pixel is dead.
    Broken,

    /// The pixel works but is outside its rated accuracy.
    Outlier,
}

/// A pixel that should not be trusted, along with why.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeviatingPixel {
    pub index: usize,
    pub deviation: Deviation,
}

impl DeviatingPixel {
    fn row(&self) -> usize {
        self.index / WIDTH
    }

    fn column(&self) -> usize {
        self.index % WIDTH
    }

    /// True if the two pixels touch, including diagonally.
    fn is_adjacent_to(&self, other: &DeviatingPixel) -> bool {
        self.index != other.index
            && self.row().max(other.row()) - self.row().min(other.row()) <= 1
            && self.column().max(other.column()) - self.column().min(other.column()) <= 1
    }
}

/// Processed calibration constants for one MLX90640.
///
/// Built once, from a dump of the whole EEPROM, and never modified afterwards.
#[derive(Clone, PartialEq)]
pub struct CalibrationParameters {
    pub(crate) k_v_dd: i16,

    pub(crate) v_dd_25: i16,

    pub(crate) resolution: Resolution,

    pub(crate) k_v_ptat: f32,

    pub(crate) k_t_ptat: f32,

    pub(crate) v_ptat_25: f32,

    pub(crate) alpha_ptat: f32,

    pub(crate) gain: f32,

    pub(crate) k_s_ta: f32,

    pub(crate) corner_temperatures: [i16; NUM_CORNER_TEMPERATURES],

    pub(crate) k_s_to: [f32; NUM_CORNER_TEMPERATURES],

    pub(crate) alpha_correction: [f32; NUM_CORNER_TEMPERATURES],

    pub(crate) alpha_pixels: [f32; NUM_PIXELS],

    pub(crate) alpha_cp: [f32; 2],

    pub(crate) offset_reference_pixels: [i16; NUM_PIXELS],

    pub(crate) offset_reference_cp: [i16; 2],

    /// Indexed with [`chessboard_index`].
    pub(crate) k_v_pattern: [f32; 4],

    pub(crate) k_v_cp: f32,

    pub(crate) k_ta_pixels: [f32; NUM_PIXELS],

    pub(crate) k_ta_cp: f32,

    /// Zero when the camera doesn't use one.
    pub(crate) temperature_gradient_coefficient: f32,

    /// Corrections applied when the camera runs in a different access pattern than it was
    /// calibrated in. The first applies to the subpage 1 compensation pixel, the other two to
    /// each pixel.
    pub(crate) interleave_correction: [f32; 3],

    pub(crate) calibration_pattern: AccessPattern,

    pub(crate) deviating_pixels: ArrayVec<DeviatingPixel, MAX_DEVIATING_PIXELS>,
}

/// Index into the four-entry tables that repeat in a chessboard pattern.
///
/// The order is the order the EEPROM stores them in:
/// 1. even row, even column
/// 2. odd row, even column
/// 3. even row, odd column
/// 4. odd row, odd column
///
/// Rows and columns are 0-indexed here, the datasheet uses 1-indexing so even and odd are swapped
/// between the two.
pub(crate) fn chessboard_index(pixel: usize) -> usize {
    let row = pixel / WIDTH;
    let column = pixel % WIDTH;
    (row % 2) + 2 * (column % 2)
}

fn exp2(exponent: i32) -> f32 {
    Float::powi(2f32, exponent)
}

/// Calculate pixel calibration values based off of the row and column data.
///
/// Remainder data is added in afterwards. This function is used for both offset and sensitivity
/// (alpha) arrays, the buffer must be at the first word of row coefficients.
fn calculate_bulk_pixel_calibration(
    data: &mut &[u8],
    average: i32,
    row_scale: u8,
    column_scale: u8,
) -> [i32; NUM_PIXELS] {
    let mut pixel_calibration = [average; NUM_PIXELS];
    const VALUES_PER_DATA_WORD: usize = 4;
    // Row coefficients, four rows per word. The least significant nibble is the first row.
    for row_chunks in pixel_calibration.chunks_exact_mut(WIDTH * VALUES_PER_DATA_WORD) {
        let rows_coefficients = word_to_i4s(data);
        let rows_coefficients = rows_coefficients
            .iter()
            .rev()
            .map(|coeff| i32::from(*coeff) << row_scale);
        for (row, coefficient) in row_chunks.chunks_exact_mut(WIDTH).zip(rows_coefficients) {
            row.iter_mut().for_each(|element| *element += coefficient);
        }
    }
    // Column coefficients. Slightly more involved as the pixels are in row-major order.
    for column_chunk_index in 0..(WIDTH / VALUES_PER_DATA_WORD) {
        let column_coefficients = word_to_i4s(data);
        let column_coefficients = column_coefficients
            .iter()
            .rev()
            .map(|coeff| i32::from(*coeff) << column_scale);
        let start_index = column_chunk_index * VALUES_PER_DATA_WORD;
        for row in pixel_calibration.chunks_exact_mut(WIDTH) {
            row[start_index..(start_index + VALUES_PER_DATA_WORD)]
                .iter_mut()
                .zip(column_coefficients.clone())
                .for_each(|(element, coefficient)| *element += coefficient);
        }
    }
    pixel_calibration
}

/// Find the broken and outlier pixels, and make sure there aren't too many of them.
fn find_deviating_pixels(
    words: &[u16],
) -> Result<ArrayVec<DeviatingPixel, MAX_DEVIATING_PIXELS>, LibraryError> {
    let pixel_words = &words[EepromAddress::PixelCalibrationStart.word()..];
    let mut deviating = pixel_words
        .iter()
        .enumerate()
        .filter_map(|(index, word)| {
            let deviation = if *word == 0 {
                Deviation::Broken
            } else if is_bit_set(*word, 0) {
                Deviation::Outlier
            } else {
                return None;
            };
            Some(DeviatingPixel { index, deviation })
        });
    let mut found = ArrayVec::new();
    while let Some(pixel) = deviating.next() {
        if found.try_push(pixel).is_err() {
            let total = MAX_DEVIATING_PIXELS + 1 + deviating.by_ref().count();
            return Err(LibraryError::TooManyDeviatingPixels(total));
        }
    }
    for (n, first) in found.iter().enumerate() {
        if let Some(second) = found[n + 1..].iter().find(|p| first.is_adjacent_to(p)) {
            return Err(LibraryError::AdjacentDeviatingPixels(
                first.index,
                second.index,
            ));
        }
    }
    Ok(found)
}

/// The sensitivity correction coefficients (α<sub>corr<sub>range<sub>n</sub></sub></sub>) for
/// the different temperature ranges.
fn alpha_correction_coefficients(
    corner_temperatures: &[i16; NUM_CORNER_TEMPERATURES],
    k_s_to: &[f32; NUM_CORNER_TEMPERATURES],
) -> [f32; NUM_CORNER_TEMPERATURES] {
    let mut coefficients = [1f32; NUM_CORNER_TEMPERATURES];
    for (n, coefficient) in coefficients.iter_mut().enumerate() {
        *coefficient = alpha_corr_n(n, corner_temperatures, k_s_to);
    }
    coefficients
}

/// Built up recursively from the base case of the basic range (which doesn't need correcting, so
/// it's 1).
fn alpha_corr_n(n: usize, ct: &[i16], k_s_to: &[f32]) -> f32 {
    match n.cmp(&BASIC_TEMPERATURE_RANGE) {
        core::cmp::Ordering::Equal => 1f32,
        core::cmp::Ordering::Less => {
            (1f32 + k_s_to[n] * f32::from(ct[n + 1] - ct[n])).recip()
                * alpha_corr_n(n + 1, ct, k_s_to)
        }
        core::cmp::Ordering::Greater => {
            (1f32 + k_s_to[n - 1] * f32::from(ct[n] - ct[n - 1]))
                * alpha_corr_n(n - 1, ct, k_s_to)
        }
    }
}

impl CalibrationParameters {
    /// Generate the constants needed for temperature calculations from a dump of the MLX90640
    /// EEPROM, as big-endian bytes the way it comes off the bus.
    ///
    /// The buffer must cover *all* of the EEPROM.
    pub fn from_data(data: &[u8]) -> Result<Self, LibraryError> {
        if data.len() < EEPROM_WORDS * WORD_SIZE {
            return Err(LibraryError::Other(
                "Not enough space left in buffer to be a full EEPROM dump",
            ));
        }
        let mut words = [0u16; EEPROM_WORDS];
        copy_be_words(data, &mut words);
        let device_options = words[EepromAddress::DeviceOptions.word()];
        if is_bit_set(device_options, 6) {
            return Err(LibraryError::InvalidData(
                "The EEPROM does not belong to an MLX90640",
            ));
        }
        // Bit 11 set means the camera was calibrated in interleaved mode.
        let calibration_pattern = if is_bit_set(device_options, 11) {
            AccessPattern::Interleave
        } else {
            AccessPattern::Chess
        };
        let deviating_pixels = find_deviating_pixels(&words)?;

        let mut buf = &data[EepromAddress::OffsetCompensation.word() * WORD_SIZE..];
        // alpha_PTAT and offset compensation scales
        let [alpha_ptat, offset_row_scale, offset_column_scale, offset_remainder_scale] =
            word_to_u4s(&mut buf);
        let alpha_ptat = f32::from(alpha_ptat) / 4f32 + 8f32;
        let offset_average = i32::from(buf.get_i16());
        let offset_bulk = calculate_bulk_pixel_calibration(
            &mut buf,
            offset_average,
            offset_row_scale,
            offset_column_scale,
        );
        // alpha scale and sensitivity compensation scales
        let [alpha_scale_exp, alpha_row_scale, alpha_column_scale, alpha_remainder_scale] =
            word_to_u4s(&mut buf);
        // The alpha average is unsigned, unlike the offset average.
        let alpha_average = i32::from(buf.get_u16());
        let alpha_bulk = calculate_bulk_pixel_calibration(
            &mut buf,
            alpha_average,
            alpha_row_scale,
            alpha_column_scale,
        );
        // The pixel alpha scale exponent has 30 added to it (not 27 like alpha_scale_cp).
        let alpha_scale = exp2(i32::from(alpha_scale_exp) + 30);

        let gain = buf.get_i16();
        let v_ptat_25 = buf.get_u16();
        let (k_v_ptat, kt_ptat_bytes) = word_6_10_split(&mut buf);
        // k_v_ptat is scaled by 2^12
        let k_v_ptat = f32::from(k_v_ptat) / 4096f32;
        // k_t_ptat is scaled by 2^3
        let k_t_ptat = f32::from(i16_from_bits(&kt_ptat_bytes, 10)) / 8f32;
        let k_v_dd = i16::from(buf.get_i8()) << 5;
        // Unsigned in EEPROM, immediately sent negative by subtracting 256, then multipled by 2^5,
        // and finally has 2^13 subtracted from it.
        let v_dd_25 = (i16::from(buf.get_u8()) - 256) * (1 << 5) - (1 << 13);
        if k_v_dd == 0 || k_t_ptat == 0f32 {
            return Err(LibraryError::InvalidData(
                "Supply voltage or PTAT calibration is zero",
            ));
        }
        let k_v_average = word_to_i4s(&mut buf);
        let interleave_correction = {
            let raw = buf.get_u16();
            let cp_p1_p0 = f32::from(i16_from_bits(&(raw & 0x003F).to_be_bytes(), 6)) / 16f32;
            let column_correction =
                f32::from(i16_from_bits(&((raw & 0x07C0) >> 6).to_be_bytes(), 5)) / 2f32;
            let row_correction =
                f32::from(i16_from_bits(&((raw & 0xF800) >> 11).to_be_bytes(), 5)) / 8f32;
            [cp_p1_p0, column_correction, row_correction]
        };
        let k_ta_average = [buf.get_i8(), buf.get_i8(), buf.get_i8(), buf.get_i8()];
        let [resolution, k_v_scale_exp, k_ta_scale1_exp, k_ta_scale2_exp] = word_to_u4s(&mut buf);
        // The top two bits of the resolution nibble are reserved.
        let resolution = Resolution::from_code(u16::from(resolution));
        let k_v_scale = exp2(i32::from(k_v_scale_exp));
        // k_ta_scale1 has 8 added to it.
        let k_ta_scale1 = exp2(i32::from(k_ta_scale1_exp) + 8);
        let mut k_v_pattern = [0f32; 4];
        k_v_pattern
            .iter_mut()
            .zip(k_v_average.iter())
            .for_each(|(k_v, average)| *k_v = f32::from(*average) / k_v_scale);

        // Compensation pixel parameters
        let alpha_cp = {
            let (alpha_cp_ratio, alpha_cp_bytes) = word_6_10_split(&mut buf);
            let alpha_cp_ratio = f32::from(alpha_cp_ratio) / 128f32;
            // The alpha scale exponent has 27 added to get alpha_scale_cp.
            let alpha_scale_cp = exp2(i32::from(alpha_scale_exp) + 27);
            let alpha_cp0 = f32::from(i16_from_bits(&alpha_cp_bytes, 10)) / alpha_scale_cp;
            [alpha_cp0, alpha_cp0 * (1f32 + alpha_cp_ratio)]
        };
        let offset_reference_cp = {
            let (offset_cp_delta, offset_cp_bytes) = word_6_10_split(&mut buf);
            let offset_cp0 = i16_from_bits(&offset_cp_bytes, 10);
            [offset_cp0, offset_cp0 + i16::from(offset_cp_delta)]
        };
        let k_v_cp = f32::from(buf.get_i8()) / k_v_scale;
        let k_ta_cp = f32::from(buf.get_i8()) / k_ta_scale1;
        let k_s_ta = f32::from(buf.get_i8()) / 8192f32;
        let temperature_gradient_coefficient = f32::from(buf.get_i8()) / 32f32;
        // k_s_to is unscaled until k_s_to_scale is unpacked. The bytes for each pair of ranges
        // are stored swapped.
        let mut k_s_to = [0f32; NUM_CORNER_TEMPERATURES];
        for pair in k_s_to.chunks_exact_mut(2) {
            pair[1] = f32::from(buf.get_i8());
            pair[0] = f32::from(buf.get_i8());
        }
        let [corner_temperature_step, ct3_steps, ct2_steps, k_s_to_scale_exp] =
            word_to_u4s(&mut buf);
        // The top two bits of the step are reserved, and the step is in units of 10℃.
        let corner_temperature_step = i16::from(corner_temperature_step & 0x3) * 10;
        let ct2 = i16::from(ct2_steps) * corner_temperature_step;
        let ct3 = i16::from(ct3_steps) * corner_temperature_step + ct2;
        // -40 and 0 are hard-coded values for CT0 and CT1 (labelled CT1 and CT2 in the datasheet)
        let corner_temperatures = [-40i16, 0, ct2, ct3];
        let k_s_to_scale = exp2(i32::from(k_s_to_scale_exp) + 8);
        k_s_to.iter_mut().for_each(|k_s_to| *k_s_to /= k_s_to_scale);
        let alpha_correction = alpha_correction_coefficients(&corner_temperatures, &k_s_to);

        // Per-pixel remainders, outlier flags and K_Ta
        let mut alpha_pixels = [0f32; NUM_PIXELS];
        let mut offset_reference_pixels = [0i16; NUM_PIXELS];
        let mut k_ta_pixels = [0f32; NUM_PIXELS];
        for pixel in 0..NUM_PIXELS {
            let word = buf.get_u16();
            let offset_remainder = i16_from_bits(&((word & 0xFC00) >> 10).to_be_bytes(), 6);
            let alpha_remainder = i16_from_bits(&((word & 0x03F0) >> 4).to_be_bytes(), 6);
            let k_ta_remainder = i16_from_bits(&((word & 0x000E) >> 1).to_be_bytes(), 3);
            let offset = offset_bulk[pixel] + (i32::from(offset_remainder) << offset_remainder_scale);
            // Offsets fit in 16 bits on any real camera.
            offset_reference_pixels[pixel] = offset as i16;
            let alpha = alpha_bulk[pixel] + (i32::from(alpha_remainder) << alpha_remainder_scale);
            alpha_pixels[pixel] = alpha as f32 / alpha_scale;
            // Do the numerator as ints, then convert to floats for the final division.
            let k_ta_numerator = i32::from(k_ta_average[chessboard_index(pixel)])
                + (i32::from(k_ta_remainder) << k_ta_scale2_exp);
            k_ta_pixels[pixel] = k_ta_numerator as f32 / k_ta_scale1;
        }

        Ok(Self {
            k_v_dd,
            v_dd_25,
            resolution,
            k_v_ptat,
            k_t_ptat,
            v_ptat_25: f32::from(v_ptat_25),
            alpha_ptat,
            gain: f32::from(gain),
            k_s_ta,
            corner_temperatures,
            k_s_to,
            alpha_correction,
            alpha_pixels,
            alpha_cp,
            offset_reference_pixels,
            offset_reference_cp,
            k_v_pattern,
            k_v_cp,
            k_ta_pixels,
            k_ta_cp,
            temperature_gradient_coefficient,
            interleave_correction,
            calibration_pattern,
            deviating_pixels,
        })
    }

    /// Pixel supply voltage constant (K<sub>V<sub>DD</sub></sub>).
    pub fn k_v_dd(&self) -> i16 {
        self.k_v_dd
    }

    /// Pixel supply voltage at 25℃ (V<sub>DD<sub>25</sub></sub>).
    pub fn v_dd_25(&self) -> i16 {
        self.v_dd_25
    }

    /// ADC resolution this camera was calibrated at.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn k_v_ptat(&self) -> f32 {
        self.k_v_ptat
    }

    pub fn k_t_ptat(&self) -> f32 {
        self.k_t_ptat
    }

    pub fn v_ptat_25(&self) -> f32 {
        self.v_ptat_25
    }

    pub fn alpha_ptat(&self) -> f32 {
        self.alpha_ptat
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn k_s_ta(&self) -> f32 {
        self.k_s_ta
    }

    /// The corner temperatures delimiting the temperature ranges.
    ///
    /// Indexed from 0, while the datasheet indexes them from 1.
    pub fn corner_temperatures(&self) -> &[i16; NUM_CORNER_TEMPERATURES] {
        &self.corner_temperatures
    }

    pub fn k_s_to(&self) -> &[f32; NUM_CORNER_TEMPERATURES] {
        &self.k_s_to
    }

    pub fn alpha_correction(&self) -> &[f32; NUM_CORNER_TEMPERATURES] {
        &self.alpha_correction
    }

    pub fn alpha_pixel(&self, pixel: usize) -> f32 {
        self.alpha_pixels[pixel]
    }

    pub fn offset_reference_pixel(&self, pixel: usize) -> i16 {
        self.offset_reference_pixels[pixel]
    }

    pub fn k_ta_pixel(&self, pixel: usize) -> f32 {
        self.k_ta_pixels[pixel]
    }

    pub fn k_v_pixel(&self, pixel: usize) -> f32 {
        self.k_v_pattern[chessboard_index(pixel)]
    }

    pub fn alpha_cp(&self, subpage: Subpage) -> f32 {
        self.alpha_cp[subpage as usize]
    }

    pub fn offset_reference_cp(&self, subpage: Subpage) -> i16 {
        self.offset_reference_cp[subpage as usize]
    }

    pub fn k_v_cp(&self) -> f32 {
        self.k_v_cp
    }

    pub fn k_ta_cp(&self) -> f32 {
        self.k_ta_cp
    }

    /// Temperature gradient coefficient (TGC).
    pub fn temperature_gradient_coefficient(&self) -> f32 {
        self.temperature_gradient_coefficient
    }

    pub fn interleave_correction(&self) -> &[f32; 3] {
        &self.interleave_correction
    }

    /// The access pattern the camera was in when it was calibrated.
    pub fn calibration_pattern(&self) -> AccessPattern {
        self.calibration_pattern
    }

    /// Broken and outlier pixels, in pixel order.
    pub fn deviating_pixels(&self) -> &[DeviatingPixel] {
        &self.deviating_pixels
    }
}

// The pixel tables make the derived output useless.
impl fmt::Debug for CalibrationParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalibrationParameters")
            .field("k_v_dd", &self.k_v_dd)
            .field("v_dd_25", &self.v_dd_25)
            .field("resolution", &self.resolution)
            .field("k_t_ptat", &self.k_t_ptat)
            .field("gain", &self.gain)
            .field("corner_temperatures", &self.corner_temperatures)
            .field("calibration_pattern", &self.calibration_pattern)
            .field("deviating_pixels", &self.deviating_pixels)
            .finish()
    }
}

/// Split a word into a 6-bit value and a 10-bit value.
///
/// Further conversion for the second value is left to the caller.
fn word_6_10_split(data: &mut &[u8]) -> (i8, [u8; 2]) {
    let mut word = [data.get_u8(), data.get_u8()];
    // As signed right shifts are aritmetic, the sign bit gets extended.
    let six_bit = i8::from_ne_bytes([word[0]]) >> 2;
    word[0] &= 0x03;
    (six_bit, word)
}

/// Extract four unsigned, 4-bit integers from a buffer, most significant first.
fn word_to_u4s(data: &mut &[u8]) -> [u8; 4] {
    let high = data.get_u8();
    let low = data.get_u8();
    [(high & 0xF0) >> 4, high & 0xF, (low & 0xF0) >> 4, low & 0xF]
}

/// Split a byte into a pair of signed, four-bit integers.
fn u8_to_i4s(byte: u8) -> [i8; 2] {
    // Put the MSB of each i4 all the way to the left, then arithmetic shift right to extend the
    // sign.
    let high = i8::from_ne_bytes([byte & 0xF0]);
    let low = i8::from_ne_bytes([(byte & 0xF) << 4]);
    [high >> 4, low >> 4]
}

/// Split a word from a buffer into four, 4-bit signed integers, most significant first.
fn word_to_i4s(data: &mut &[u8]) -> [i8; 4] {
    let high = u8_to_i4s(data.get_u8());
    let low = u8_to_i4s(data.get_u8());
    [high[0], high[1], low[0], low[1]]
}
