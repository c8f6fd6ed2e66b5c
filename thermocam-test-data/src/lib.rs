// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Datasheet data and simulated peripherals for testing `thermocam`.
//!
//! Nothing in here depends on `thermocam` itself, so the crate can be used from both its unit
//! tests and its integration tests. The glue traits (`Clock`, `FlashDevice`) are implemented on
//! the `thermocam` side.
mod clock;
mod eeprom_data;
mod flash_mock;
mod sensor_mock;

pub use clock::VirtualClock;
pub use eeprom_data::{
    datasheet_eeprom, datasheet_ram, eeprom_with_pixel_words, eeprom_words, DATASHEET_CONTROL,
    EEPROM_LENGTH, EEPROM_WORDS, NUM_PIXELS, RAM_WORDS,
};
pub use flash_mock::{FlashFault, MockFlash, BLOCK_SIZE, PAGE_SIZE, SECTOR_SIZE};
pub use sensor_mock::{MockError, MockSensorBus, Operation, DEFAULT_ADDRESS};
