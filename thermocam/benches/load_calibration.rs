// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use criterion::{criterion_group, criterion_main, Criterion};

use thermocam::CalibrationParameters;
use thermocam_test_data::datasheet_eeprom;

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Calibration Loading");

    group.bench_with_input("MLX90640", &datasheet_eeprom(), |b, eeprom| {
        b.iter(|| CalibrationParameters::from_data(eeprom))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
