// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross

/// The size of the MLX90640 EEPROM in bytes.
///
/// 0x273F is the last address in the EEPROM, so add one to that to include it, while 0x2400 is the
/// first address. Each address contains a 16-bit value, so we multiply by two to get the number
/// of 8-bit bytes.
pub const EEPROM_LENGTH: usize = (0x2740 - 0x2400) * 2;

/// The number of 16-bit words in the EEPROM.
pub const EEPROM_WORDS: usize = EEPROM_LENGTH / 2;

/// The number of 16-bit words read out of RAM for each subframe.
pub const RAM_WORDS: usize = 0x0740 - 0x0400;

/// The number of pixels on the sensor.
pub const NUM_PIXELS: usize = 32 * 24;

/// The control register value used for the datasheet worked example: chess pattern, 18-bit ADC,
/// subpages enabled.
pub const DATASHEET_CONTROL: u16 = 0x1901;

/// Example MLX90640 EEPROM data from the datasheet (from the worked example).
// Each line is 8 words. The first two lines are device configuration, ignored for calibration
// purposes, except that word 10 must leave the device select bit clear. The next six lines are
// the shared calibration data.
const DATASHEET_EEPROM_HEADER: &[u8] = b"\
    \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
    \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
    \x42\x10\xff\xbb\x02\x02\xf2\x02\xf2\xf2\xe2\xe2\xd1\xe1\xb1\xd1\
    \xf1\x0f\xf0\x0f\xe0\xef\xe0\xef\xe1\xe1\xf3\xf2\xf4\x04\xe5\x04\
    \x79\xa6\x2f\x44\xff\xdd\x22\x10\x33\x33\x22\x33\xef\x01\x9a\xcc\
    \xee\xdc\x10\xff\x22\x21\x33\x33\x23\x33\x01\x12\xee\xff\xbb\xdd\
    \x18\xef\x2f\xf1\x59\x52\x9d\x68\x54\x54\x09\x94\x69\x56\x53\x54\
    \x23\x63\xe4\x46\xfb\xb5\x04\x4b\xf0\x20\x97\x97\x97\x97\x28\x89";

/// The per-pixel calibration word from the worked example.
const DATASHEET_PIXEL_WORD: u16 = 0x08A0;

/// Offset of the first per-pixel calibration word.
const PIXEL_WORDS_START: usize = 0x40;

/// Create a buffer with the example EEPROM data, every pixel using the worked example's
/// calibration word.
pub fn datasheet_eeprom() -> [u8; EEPROM_LENGTH] {
    let pixel_data = DATASHEET_PIXEL_WORD.to_be_bytes();
    let mut eeprom_data = [0u8; EEPROM_LENGTH];
    let header_slice = DATASHEET_EEPROM_HEADER;
    eeprom_data[..header_slice.len()].copy_from_slice(header_slice);
    eeprom_data[header_slice.len()..]
        .iter_mut()
        .zip(pixel_data.iter().copied().cycle())
        .for_each(|(eeprom_byte, pixel_byte)| *eeprom_byte = pixel_byte);
    eeprom_data
}

/// The datasheet EEPROM with some per-pixel calibration words replaced.
///
/// Each override is a pixel index (row-major) and the raw calibration word for it. A word of
/// `0x0000` marks a broken pixel, and setting bit 0 marks an outlier.
pub fn eeprom_with_pixel_words(overrides: &[(usize, u16)]) -> [u8; EEPROM_LENGTH] {
    let mut eeprom_data = datasheet_eeprom();
    for &(pixel, word) in overrides {
        let offset = (PIXEL_WORDS_START + pixel) * 2;
        eeprom_data[offset..(offset + 2)].copy_from_slice(&word.to_be_bytes());
    }
    eeprom_data
}

/// One subframe of RAM from the datasheet worked example.
///
/// Every pixel reads `0x0261`, and the auxiliary words are filled in where the example gives
/// values. The rest are reserved and left as zero.
pub fn datasheet_ram() -> [u16; RAM_WORDS] {
    let mut ram = [0u16; RAM_WORDS];
    ram[..NUM_PIXELS].iter_mut().for_each(|word| *word = 0x0261);
    // T_a V_BE
    ram[0x0300] = 0x4BF2;
    // Compensation pixel, subpage 0
    ram[0x0308] = 0xFFCA;
    ram[0x030A] = 0x1881;
    // T_a PTAT
    ram[0x0320] = 0x06AF;
    // Compensation pixel, subpage 1
    ram[0x0328] = 0xFFC8;
    // V_DD pix
    ram[0x032A] = 0xCCC5;
    ram
}

/// Unpack big-endian EEPROM bytes into words, the way the camera stores them.
pub fn eeprom_words(eeprom: &[u8; EEPROM_LENGTH]) -> [u16; EEPROM_WORDS] {
    let mut words = [0u16; EEPROM_WORDS];
    words
        .iter_mut()
        .zip(eeprom.chunks_exact(2))
        .for_each(|(word, bytes)| *word = u16::from_be_bytes([bytes[0], bytes[1]]));
    words
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn datasheet_layout() {
        let eeprom = datasheet_eeprom();
        // Gain is at 0x2430.
        assert_eq!(&eeprom[0x60..0x62], b"\x18\xef");
        assert_eq!(&eeprom[0x80..0x82], b"\x08\xa0");
        assert_eq!(&eeprom[EEPROM_LENGTH - 2..], b"\x08\xa0");
    }

    #[test]
    fn pixel_overrides() {
        let eeprom = eeprom_with_pixel_words(&[(0, 0x0000), (767, 0x08A1)]);
        let words = eeprom_words(&eeprom);
        assert_eq!(words[0x40], 0x0000);
        assert_eq!(words[0x41], 0x08A0);
        assert_eq!(words[EEPROM_WORDS - 1], 0x08A1);
    }

    #[test]
    fn ram_auxiliary_words() {
        let ram = datasheet_ram();
        assert_eq!(ram[0], 0x0261);
        assert_eq!(ram[767], 0x0261);
        assert_eq!(ram[768], 0x4BF2);
        assert_eq!(ram[810], 0xCCC5);
    }
}
