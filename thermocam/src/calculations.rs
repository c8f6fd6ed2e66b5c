// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Conversion of raw camera data into temperatures.
//!
//! Everything in here is pure: no I/O, no shared state beyond the read-only calibration.
use num_traits::Float;

use crate::calibration::CalibrationParameters;
use crate::common::{RamAddress, HEIGHT, KELVINS_TO_CELSIUS, NUM_PIXELS, SCALE_FACTOR, WIDTH};
use crate::frame::{ProcessedFrame, RawFrame, Subframe};
use crate::register::{Resolution, Subpage};

/// The supply voltage the camera is calibrated against.
const V_DD_0: f32 = 3.3;

/// The reference ambient temperature (T<sub>a<sub>0</sub></sub>).
const T_A_0: f32 = 25.0;

/// How much colder than the sensor die the surroundings are assumed to be.
///
/// This is the default for an MLX90640 in open air.
pub const REFLECTED_TEMPERATURE_SHIFT: f32 = 8.0;

fn exp2(exponent: i32) -> f32 {
    Float::powi(2f32, exponent)
}

/// The correction factor for when the ADC runs at a different resolution than it was calibrated
/// at.
fn resolution_correction(calibrated: Resolution, current: Resolution) -> f32 {
    exp2(i32::from(calibrated.code())) / exp2(i32::from(current.code()))
}

/// The pixel supply voltage (V<sub>DD</sub>) while `subframe` was measured.
pub fn supply_voltage(calibration: &CalibrationParameters, subframe: &Subframe) -> f32 {
    let correction = resolution_correction(calibration.resolution, subframe.control().resolution());
    let v_dd_pixel = f32::from(subframe.word(RamAddress::PixelSupplyVoltage));
    (correction * v_dd_pixel - f32::from(calibration.v_dd_25)) / f32::from(calibration.k_v_dd)
        + V_DD_0
}

fn v_ptat_art(calibration: &CalibrationParameters, t_a_ptat: i16, t_a_v_be: i16) -> f32 {
    let t_a_ptat = f32::from(t_a_ptat);
    t_a_ptat / (t_a_ptat * calibration.alpha_ptat + f32::from(t_a_v_be)) * exp2(18)
}

/// The ambient (sensor die) temperature while `subframe` was measured.
pub fn ambient_temperature(
    calibration: &CalibrationParameters,
    subframe: &Subframe,
    v_dd: f32,
) -> f32 {
    let v_ptat_art = v_ptat_art(
        calibration,
        subframe.word(RamAddress::AmbientTemperatureVoltage),
        subframe.word(RamAddress::AmbientTemperatureVoltageBe),
    );
    let delta_v = v_dd - V_DD_0;
    (v_ptat_art / (1f32 + calibration.k_v_ptat * delta_v) - calibration.v_ptat_25)
        / calibration.k_t_ptat
        + T_A_0
}

/// Values that are common to all pixels in a subframe.
#[derive(Clone, Copy, Debug, PartialEq)]
struct CommonIrData {
    gain: f32,

    delta_t_a: f32,

    delta_v: f32,

    /// The gain and offset compensated compensation pixel for this subframe.
    compensation_pixel: f32,

    /// (T<sub>a</sub><sup>4</sup> - T<sub>r</sub><sup>4</sup>) adjusted for emissivity, in
    /// Kelvin.
    t_ar: f32,
}

impl CommonIrData {
    fn new(
        calibration: &CalibrationParameters,
        subframe: &Subframe,
        emissivity: f32,
        v_dd: f32,
        t_a: f32,
    ) -> Self {
        let t_r = t_a - REFLECTED_TEMPERATURE_SHIFT;
        let delta_t_a = t_a - T_A_0;
        let delta_v = v_dd - V_DD_0;
        let gain = calibration.gain / f32::from(subframe.word(RamAddress::Gain));
        let subpage = subframe.subpage();
        let compensation_address = match subpage {
            Subpage::Zero => RamAddress::CompensationPixelZero,
            Subpage::One => RamAddress::CompensationPixelOne,
        };
        let mut offset_cp = f32::from(calibration.offset_reference_cp[subpage as usize]);
        if subpage == Subpage::One
            && subframe.control().access_pattern() != calibration.calibration_pattern
        {
            offset_cp += calibration.interleave_correction[0];
        }
        let compensation_pixel = f32::from(subframe.word(compensation_address)) * gain
            - offset_cp
                * (1f32 + calibration.k_ta_cp * delta_t_a)
                * (1f32 + calibration.k_v_cp * delta_v);
        Self {
            gain,
            delta_t_a,
            delta_v,
            compensation_pixel,
            t_ar: t_ar(t_a, t_r, emissivity),
        }
    }
}

fn t_ar(t_a: f32, t_r: f32, emissivity: f32) -> f32 {
    let t_a4 = Float::powi(t_a + KELVINS_TO_CELSIUS, 4);
    let t_r4 = Float::powi(t_r + KELVINS_TO_CELSIUS, 4);
    t_r4 - ((t_r4 - t_a4) / emissivity)
}

/// The sign pattern used by the interleave correction for the given pixel.
fn conversion_pattern(pixel: usize) -> f32 {
    let pixel = pixel as i32;
    let row_parity = (pixel / WIDTH as i32) % 2;
    let pattern = (pixel + 2) / 4 - (pixel + 3) / 4 + (pixel + 1) / 4 - pixel / 4;
    (pattern * (1 - 2 * row_parity)) as f32
}

/// The per-pixel calculations to get a raw measurement of infrared radiation.
fn per_pixel_v_ir(
    calibration: &CalibrationParameters,
    common: &CommonIrData,
    subframe: &Subframe,
    pixel: usize,
    emissivity: f32,
) -> f32 {
    let mut v_ir = f32::from(subframe.pixel(pixel)) * common.gain
        - f32::from(calibration.offset_reference_pixels[pixel])
            * (1f32 + calibration.k_ta_pixels[pixel] * common.delta_t_a)
            * (1f32 + calibration.k_v_pixel(pixel) * common.delta_v);
    if subframe.control().access_pattern() != calibration.calibration_pattern {
        let row_sign = (2 * ((pixel / WIDTH) % 2)) as f32 - 1f32;
        v_ir += calibration.interleave_correction[2] * row_sign
            - calibration.interleave_correction[1] * conversion_pattern(pixel);
    }
    v_ir -= calibration.temperature_gradient_coefficient * common.compensation_pixel;
    v_ir / emissivity
}

/// The per-pixel calculations to go from a raw measurement to a temperature in the basic
/// temperature range.
fn per_pixel_temperature(v_ir: f32, alpha: f32, t_ar: f32, k_s_to: f32) -> f32 {
    let s_x = k_s_to * Float::sqrt(Float::sqrt(Float::powi(alpha, 3) * (v_ir + alpha * t_ar)));
    Float::sqrt(Float::sqrt(
        v_ir / (alpha * (1f32 - k_s_to * KELVINS_TO_CELSIUS) + s_x) + t_ar,
    )) - KELVINS_TO_CELSIUS
}

/// Recompute a temperature with the sensitivity correction for the range it falls in.
fn extended_range_temperature(
    calibration: &CalibrationParameters,
    v_ir: f32,
    alpha: f32,
    t_ar: f32,
    basic_temperature: f32,
) -> f32 {
    let ct = &calibration.corner_temperatures;
    let range = ct[1..]
        .iter()
        .take_while(|corner| basic_temperature >= f32::from(**corner))
        .count();
    let k_s_to = calibration.k_s_to[range];
    let corrected_alpha = alpha
        * calibration.alpha_correction[range]
        * (1f32 + k_s_to * (basic_temperature - f32::from(ct[range])));
    Float::sqrt(Float::sqrt(v_ir / corrected_alpha + t_ar)) - KELVINS_TO_CELSIUS
}

/// Scale a temperature for storage in a [`ProcessedFrame`].
fn scale_temperature(temperature: f32) -> i16 {
    // `as` saturates, and NaN becomes 0.
    Float::round(temperature * f32::from(SCALE_FACTOR)) as i16
}

/// Calculate the temperatures for the pixels in `subframe`'s subpage.
///
/// Pixels that belong to the other subpage are left untouched.
pub fn process_subframe(
    calibration: &CalibrationParameters,
    subframe: &Subframe,
    emissivity: f32,
    temperatures: &mut [i16; NUM_PIXELS],
) {
    let v_dd = supply_voltage(calibration, subframe);
    let t_a = ambient_temperature(calibration, subframe, v_dd);
    let common = CommonIrData::new(calibration, subframe, emissivity, v_dd, t_a);
    let subpage = subframe.subpage();
    let access_pattern = subframe.control().access_pattern();
    let alpha_cp = calibration.alpha_cp[subpage as usize];
    let tgc = calibration.temperature_gradient_coefficient;
    let k_s_t_a_factor = 1f32 + calibration.k_s_ta * common.delta_t_a;
    for (pixel, temperature) in temperatures.iter_mut().enumerate() {
        if access_pattern.subpage_of(pixel / WIDTH, pixel % WIDTH) != subpage {
            continue;
        }
        let v_ir = per_pixel_v_ir(calibration, &common, subframe, pixel, emissivity);
        let alpha = (calibration.alpha_pixels[pixel] - tgc * alpha_cp) * k_s_t_a_factor;
        let basic = per_pixel_temperature(v_ir, alpha, common.t_ar, calibration.k_s_to[1]);
        let corrected = extended_range_temperature(calibration, v_ir, alpha, common.t_ar, basic);
        *temperature = scale_temperature(corrected);
    }
}

/// Replace the readings of broken and outlier pixels with the mean of their neighbours.
///
/// Horizontal neighbours are preferred, vertical ones are used when neither horizontal neighbour
/// is usable. A pixel with no usable neighbours keeps its value.
pub fn correct_deviating_pixels(
    calibration: &CalibrationParameters,
    temperatures: &mut [i16; NUM_PIXELS],
) {
    let deviating = calibration.deviating_pixels();
    let usable = |row: Option<usize>, column: Option<usize>| -> Option<usize> {
        let (row, column) = (row?, column?);
        if row >= HEIGHT || column >= WIDTH {
            return None;
        }
        let index = row * WIDTH + column;
        if deviating.iter().any(|p| p.index == index) {
            None
        } else {
            Some(index)
        }
    };
    for pixel in deviating {
        let (row, column) = (pixel.index / WIDTH, pixel.index % WIDTH);
        let horizontal = [
            usable(Some(row), column.checked_sub(1)),
            usable(Some(row), Some(column + 1)),
        ];
        let vertical = [
            usable(row.checked_sub(1), Some(column)),
            usable(Some(row + 1), Some(column)),
        ];
        let neighbours = if horizontal.iter().any(Option::is_some) {
            horizontal
        } else {
            vertical
        };
        let (sum, count) = neighbours
            .iter()
            .flatten()
            .fold((0i32, 0i32), |(sum, count), index| {
                (sum + i32::from(temperatures[*index]), count + 1)
            });
        if count > 0 {
            temperatures[pixel.index] = (sum / count) as i16;
        }
    }
}

/// Convert a raw frame into temperatures.
///
/// `emissivity` applies to the whole scene. The same inputs always give the same output.
pub fn process_frame(
    calibration: &CalibrationParameters,
    frame: &RawFrame,
    emissivity: f32,
) -> ProcessedFrame {
    let mut temperatures = [0i16; NUM_PIXELS];
    for subframe in frame.subframes.iter() {
        process_subframe(calibration, subframe, emissivity, &mut temperatures);
    }
    correct_deviating_pixels(calibration, &mut temperatures);
    ProcessedFrame::new(temperatures)
}
