// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Wear-leveled, power-loss tolerant storage of a single small record in one flash sector.
//!
//! Each page of the sector holds at most one record:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | `written`, `0x00` once the record has been written |
//! | 1 | 1 | `invalidated`, `0x00` once a newer record replaced this one |
//! | 2 | 2 | CRC-16/CCITT-FALSE of the payload, little endian |
//! | 4 | `P::SIZE` | payload |
//!
//! Saving invalidates the current record and writes the new one into the next erased page, so
//! the sector is only erased once every page has been used. Both markers start out as `0xFF`
//! after an erase and are cleared by programming, which NOR flash can do without an erase.
use core::fmt;
use core::marker::PhantomData;

use log::{debug, info, warn};

use super::flash::FlashDevice;
use super::Payload;

const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740);

const HEADER_SIZE: usize = 4;

const WRITTEN_OFFSET: usize = 0;

const INVALIDATED_OFFSET: usize = 1;

/// Records are limited to the smallest page size in common use.
pub const MAX_RECORD_SIZE: usize = 256;

const MARKER_SET: u8 = 0x00;

const MARKER_CLEAR: u8 = 0xFF;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StoreError<E> {
    /// The flash device reported an error.
    Flash(E),

    /// A record (header and payload) doesn't fit within a page.
    RecordTooLarge,

    /// The sector address isn't the start of a sector.
    Misaligned,

    /// The sector is past the end of the device.
    OutOfBounds,
}

impl<E: fmt::Debug> fmt::Display for StoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Flash(err) => write!(f, "flash error: {:?}", err),
            StoreError::RecordTooLarge => write!(f, "record does not fit in a flash page"),
            StoreError::Misaligned => write!(f, "sector address is not aligned to a sector"),
            StoreError::OutOfBounds => write!(f, "sector is past the end of the device"),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for StoreError<E> {}

/// What [`ConfigStore::save`] ended up doing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SaveOutcome {
    /// The live record already holds the same payload, nothing was written.
    Unchanged,

    /// A new record was written at `offset` within the sector, after erasing the sector if
    /// `erased` is set.
    Written { offset: u32, erased: bool },
}

/// A record header as read from flash.
#[derive(Clone, Copy, Debug)]
struct RecordHeader {
    written: u8,
    invalidated: u8,
    crc: u16,
}

impl RecordHeader {
    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            written: bytes[WRITTEN_OFFSET],
            invalidated: bytes[INVALIDATED_OFFSET],
            crc: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    fn new_live(crc: u16) -> Self {
        Self {
            written: MARKER_SET,
            invalidated: MARKER_CLEAR,
            crc,
        }
    }

    fn write_to(&self, bytes: &mut [u8]) {
        bytes[WRITTEN_OFFSET] = self.written;
        bytes[INVALIDATED_OFFSET] = self.invalidated;
        bytes[2..HEADER_SIZE].copy_from_slice(&self.crc.to_le_bytes());
    }

    fn is_written(&self) -> bool {
        self.written == MARKER_SET
    }

    fn is_invalidated(&self) -> bool {
        self.invalidated == MARKER_SET
    }
}

/// Loads and saves a [`Payload`] in one sector of a flash device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConfigStore<P> {
    sector: u32,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload> ConfigStore<P> {
    /// Header and payload.
    pub const RECORD_SIZE: usize = HEADER_SIZE + P::SIZE;

    /// A store using the sector starting at `sector`.
    pub const fn new(sector: u32) -> Self {
        Self {
            sector,
            _payload: PhantomData,
        }
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    fn check_device<F: FlashDevice>(&self, flash: &F) -> Result<(), StoreError<F::Error>> {
        let sector_size = flash.sector_size();
        if Self::RECORD_SIZE >= flash.page_size() as usize || Self::RECORD_SIZE > MAX_RECORD_SIZE
        {
            Err(StoreError::RecordTooLarge)
        } else if sector_size == 0 || self.sector % sector_size != 0 {
            Err(StoreError::Misaligned)
        } else if u64::from(self.sector) + u64::from(sector_size) > u64::from(flash.size()) {
            Err(StoreError::OutOfBounds)
        } else {
            Ok(())
        }
    }

    /// Offsets of each page in the sector, relative to the start of the sector.
    fn page_offsets<F: FlashDevice>(flash: &F) -> impl Iterator<Item = u32> {
        (0..flash.sector_size()).step_by(flash.page_size() as usize)
    }

    /// Load the live record into `payload`, returning its offset within the sector.
    ///
    /// Corrupt and replaced records are skipped. If there is no live record, `payload` is left
    /// as it was so that it can be pre-filled with defaults.
    pub fn load<F: FlashDevice>(
        &self,
        mut flash: F,
        payload: &mut P,
    ) -> Result<Option<u32>, StoreError<F::Error>> {
        self.check_device(&flash)?;
        let mut buffer = [0u8; MAX_RECORD_SIZE];
        let record = &mut buffer[..Self::RECORD_SIZE];
        for offset in Self::page_offsets(&flash) {
            flash.read(self.sector + offset, record).map_err(|err| {
                warn!("failed to read settings at {:#x}: {:?}", offset, err);
                StoreError::Flash(err)
            })?;
            let header = RecordHeader::from_bytes(record);
            if !header.is_written() {
                debug!("no more settings records after {:#x}", offset);
                break;
            }
            if header.is_invalidated() {
                debug!("skipping replaced settings record at {:#x}", offset);
                continue;
            }
            if header.crc != CRC.checksum(&record[HEADER_SIZE..]) {
                debug!("skipping corrupt settings record at {:#x}", offset);
                continue;
            }
            payload.decode(&record[HEADER_SIZE..]);
            info!("loaded settings from {:#x}", offset);
            return Ok(Some(offset));
        }
        info!("no saved settings found");
        Ok(None)
    }

    /// Save `payload`, replacing the current record.
    ///
    /// Nothing is written if the live record already matches.
    pub fn save<F: FlashDevice>(
        &self,
        mut flash: F,
        payload: &P,
    ) -> Result<SaveOutcome, StoreError<F::Error>> {
        self.check_device(&flash)?;
        let mut new_buffer = [0u8; MAX_RECORD_SIZE];
        let new_record = &mut new_buffer[..Self::RECORD_SIZE];
        payload.encode(&mut new_record[HEADER_SIZE..]);
        let crc = CRC.checksum(&new_record[HEADER_SIZE..]);
        RecordHeader::new_live(crc).write_to(new_record);

        let mut existing_buffer = [0u8; MAX_RECORD_SIZE];
        let existing = &mut existing_buffer[..Self::RECORD_SIZE];
        let mut target = None;
        for offset in Self::page_offsets(&flash) {
            let address = self.sector + offset;
            flash
                .read(address, existing)
                .map_err(|err| Self::flash_failure("read", offset, err))?;
            let header = RecordHeader::from_bytes(existing);
            if header.is_invalidated() {
                continue;
            }
            if header.is_written() {
                if header.crc == crc && existing[HEADER_SIZE..] == new_record[HEADER_SIZE..] {
                    info!("settings unchanged, not saving");
                    return Ok(SaveOutcome::Unchanged);
                }
                debug!("invalidating settings record at {:#x}", offset);
                flash
                    .write(address + INVALIDATED_OFFSET as u32, &[MARKER_SET])
                    .map_err(|err| Self::flash_failure("invalidate", offset, err))?;
                continue;
            }
            target = Some(offset);
            break;
        }
        let (offset, erased) = match target {
            Some(offset) => (offset, false),
            None => {
                info!("settings sector full, erasing");
                flash
                    .erase_sector(self.sector)
                    .map_err(|err| Self::flash_failure("erase", 0, err))?;
                (0, true)
            }
        };
        flash
            .write(self.sector + offset, new_record)
            .map_err(|err| Self::flash_failure("write", offset, err))?;
        info!("saved settings to {:#x}", offset);
        Ok(SaveOutcome::Written { offset, erased })
    }

    fn flash_failure<E: fmt::Debug>(action: &str, offset: u32, err: E) -> StoreError<E> {
        warn!("failed to {} settings at {:#x}: {:?}", action, offset, err);
        StoreError::Flash(err)
    }
}

impl<P: Payload> Default for ConfigStore<P> {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod test {
    use float_cmp::assert_approx_eq;
    use proptest::prelude::*;
    use thermocam_test_data::{FlashFault, MockFlash, PAGE_SIZE, SECTOR_SIZE};

    use crate::config::{FlashDevice, Options, Payload};

    use super::{ConfigStore, SaveOutcome, StoreError, CRC, HEADER_SIZE};

    const PAGES: u32 = SECTOR_SIZE / PAGE_SIZE;

    fn options(frame_rate: i32) -> Options {
        Options {
            frame_rate,
            emissivity: 0.95,
        }
    }

    fn load(store: &ConfigStore<Options>, flash: &mut MockFlash) -> (Option<u32>, Options) {
        let mut loaded = Options::default();
        let offset = store.load(flash, &mut loaded).unwrap();
        (offset, loaded)
    }

    #[test]
    fn crc_is_ccitt_false() {
        assert_eq!(CRC.checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn blank_flash_keeps_defaults() {
        let mut flash = MockFlash::small();
        let store = ConfigStore::default();
        let mut loaded = Options {
            frame_rate: 2,
            emissivity: 0.5,
        };
        assert_eq!(store.load(&mut flash, &mut loaded), Ok(None));
        assert_eq!(loaded.frame_rate, 2);
        assert_approx_eq!(f32, loaded.emissivity, 0.5);
    }

    #[test]
    fn round_trip() {
        let mut flash = MockFlash::small();
        let store = ConfigStore::default();
        let saved = Options {
            frame_rate: 4,
            emissivity: 0.7,
        };
        assert_eq!(
            store.save(&mut flash, &saved),
            Ok(SaveOutcome::Written {
                offset: 0,
                erased: false
            })
        );
        assert_eq!(load(&store, &mut flash), (Some(0), saved));
        // Header is written, live, then the CRC.
        let record = &flash.contents()[..4];
        assert_eq!(record[0], 0x00);
        assert_eq!(record[1], 0xFF);
    }

    #[test]
    fn identical_save_writes_nothing() {
        let mut flash = MockFlash::small();
        let store = ConfigStore::default();
        store.save(&mut flash, &options(4)).unwrap();
        flash.reset_counters();
        assert_eq!(
            store.save(&mut flash, &options(4)),
            Ok(SaveOutcome::Unchanged)
        );
        assert_eq!(flash.writes(), 0);
        assert_eq!(flash.erases(), 0);
    }

    #[test]
    fn newer_record_replaces_older() {
        let mut flash = MockFlash::small();
        let store = ConfigStore::default();
        store.save(&mut flash, &options(1)).unwrap();
        assert_eq!(
            store.save(&mut flash, &options(2)),
            Ok(SaveOutcome::Written {
                offset: PAGE_SIZE,
                erased: false
            })
        );
        assert_eq!(flash.contents()[1], 0x00, "first record invalidated");
        assert_eq!(load(&store, &mut flash), (Some(PAGE_SIZE), options(2)));
    }

    #[test]
    fn full_sector_is_erased() {
        let mut flash = MockFlash::small();
        let store = ConfigStore::default();
        for n in 0..PAGES {
            let outcome = store.save(&mut flash, &options(n as i32)).unwrap();
            assert_eq!(
                outcome,
                SaveOutcome::Written {
                    offset: n * PAGE_SIZE,
                    erased: false
                }
            );
        }
        assert_eq!(
            store.save(&mut flash, &options(-1)),
            Ok(SaveOutcome::Written {
                offset: 0,
                erased: true
            })
        );
        assert_eq!(flash.erases(), 1);
        assert_eq!(load(&store, &mut flash), (Some(0), options(-1)));
    }

    #[test]
    fn store_in_other_sector() {
        let mut flash = MockFlash::small();
        let store = ConfigStore::new(3 * SECTOR_SIZE);
        store.save(&mut flash, &options(16)).unwrap();
        assert_eq!(flash.contents()[0], 0xFF);
        assert_eq!(flash.contents()[3 * SECTOR_SIZE as usize], 0x00);
        assert_eq!(load(&store, &mut flash), (Some(0), options(16)));
        let (offset, _) = load(&ConfigStore::default(), &mut flash);
        assert_eq!(offset, None);
    }

    #[test]
    fn corrupt_record_is_skipped() {
        let mut flash = MockFlash::small();
        let store = ConfigStore::default();
        store.save(&mut flash, &options(2)).unwrap();
        store.save(&mut flash, &options(4)).unwrap();
        // Flip a payload bit in the live record.
        let address = PAGE_SIZE + HEADER_SIZE as u32;
        let byte = flash.contents()[address as usize];
        flash.poke(address, &[byte ^ 0x01]);
        let (offset, loaded) = load(&store, &mut flash);
        assert_eq!(offset, None);
        assert_eq!(loaded, Options::default());
        // The corrupt record gets invalidated on the next save.
        assert_eq!(
            store.save(&mut flash, &options(4)),
            Ok(SaveOutcome::Written {
                offset: 2 * PAGE_SIZE,
                erased: false
            })
        );
        assert_eq!(load(&store, &mut flash), (Some(2 * PAGE_SIZE), options(4)));
    }

    #[test]
    fn power_lost_after_invalidation() {
        let mut flash = MockFlash::small();
        let store = ConfigStore::default();
        store.save(&mut flash, &options(2)).unwrap();
        // The invalidation goes through, the record write does not.
        flash.lose_power_after(1);
        assert_eq!(
            store.save(&mut flash, &options(4)),
            Err(StoreError::Flash(FlashFault::PowerLost))
        );
        flash.restore_power();
        let (offset, loaded) = load(&store, &mut flash);
        assert_eq!(offset, None);
        assert_eq!(loaded, Options::default());
        // And saving works again afterwards.
        store.save(&mut flash, &options(4)).unwrap();
        assert_eq!(load(&store, &mut flash), (Some(PAGE_SIZE), options(4)));
    }

    #[test]
    fn torn_write_is_ignored() {
        let mut flash = MockFlash::small();
        let store = ConfigStore::default();
        // Only the header and the first payload byte make it to the chip.
        flash.tear_next_write(HEADER_SIZE + 1);
        assert_eq!(
            store.save(&mut flash, &options(4)),
            Err(StoreError::Flash(FlashFault::PowerLost))
        );
        let (offset, loaded) = load(&store, &mut flash);
        assert_eq!(offset, None);
        assert_eq!(loaded, Options::default());
        assert_eq!(
            store.save(&mut flash, &options(4)),
            Ok(SaveOutcome::Written {
                offset: PAGE_SIZE,
                erased: false
            })
        );
        assert_eq!(flash.contents()[1], 0x00, "torn record invalidated");
        assert_eq!(load(&store, &mut flash), (Some(PAGE_SIZE), options(4)));
    }

    #[test]
    fn read_errors_are_reported() {
        let mut flash = MockFlash::small();
        let store = ConfigStore::<Options>::default();
        flash.fail_next_read();
        let mut loaded = Options::default();
        assert_eq!(
            store.load(&mut flash, &mut loaded),
            Err(StoreError::Flash(FlashFault::ReadFailed))
        );
    }

    #[test]
    fn geometry_checks() {
        let mut flash = MockFlash::small();
        let mut loaded = Options::default();
        assert_eq!(
            ConfigStore::<Options>::new(100).load(&mut flash, &mut loaded),
            Err(StoreError::Misaligned)
        );
        assert_eq!(
            ConfigStore::<Options>::new(16 * SECTOR_SIZE).load(&mut flash, &mut loaded),
            Err(StoreError::OutOfBounds)
        );

        struct Huge;

        impl Payload for Huge {
            const SIZE: usize = 252;

            fn encode(&self, _bytes: &mut [u8]) {}

            fn decode(&mut self, _bytes: &[u8]) {}
        }

        assert_eq!(
            ConfigStore::<Huge>::default().save(&mut flash, &Huge),
            Err(StoreError::RecordTooLarge)
        );
    }

    /// A device that reports sectors with no size.
    struct NoSectors(MockFlash);

    impl FlashDevice for NoSectors {
        type Error = FlashFault;

        fn size(&self) -> u32 {
            self.0.size()
        }

        fn page_size(&self) -> u32 {
            self.0.page_size()
        }

        fn sector_size(&self) -> u32 {
            0
        }

        fn block_size(&self) -> u32 {
            self.0.block_size()
        }

        fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Self::Error> {
            FlashDevice::read(&mut self.0, address, buffer)
        }

        fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
            FlashDevice::write(&mut self.0, address, data)
        }

        fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error> {
            FlashDevice::erase_sector(&mut self.0, address)
        }

        fn erase_block(&mut self, address: u32) -> Result<(), Self::Error> {
            FlashDevice::erase_block(&mut self.0, address)
        }
    }

    #[test]
    fn zero_sector_size_is_rejected() {
        let mut flash = NoSectors(MockFlash::small());
        let mut loaded = Options::default();
        let store = ConfigStore::<Options>::default();
        assert_eq!(store.load(&mut flash, &mut loaded), Err(StoreError::Misaligned));
        assert_eq!(store.save(&mut flash, &loaded), Err(StoreError::Misaligned));
        assert_eq!(flash.0.writes(), 0);
    }

    proptest! {
        #[test]
        fn wear_and_single_live_record(rates in proptest::collection::vec(1i32..64, 1..80)) {
            let mut flash = MockFlash::small();
            let store = ConfigStore::default();
            let mut last = None;
            let mut distinct_saves = 0u32;
            for rate in rates {
                let outcome = store.save(&mut flash, &options(rate)).unwrap();
                if last == Some(rate) {
                    prop_assert_eq!(outcome, SaveOutcome::Unchanged);
                } else {
                    distinct_saves += 1;
                }
                last = Some(rate);
                let live = (0..PAGES)
                    .map(|page| &flash.contents()[(page * PAGE_SIZE) as usize..])
                    .filter(|record| record[0] == 0x00 && record[1] == 0xFF)
                    .count();
                prop_assert_eq!(live, 1);
            }
            let max_erases = (distinct_saves + PAGES - 1) / PAGES;
            prop_assert!(flash.erases() as u32 <= max_erases);
            let (_, loaded) = load(&store, &mut flash);
            prop_assert_eq!(Some(loaded.frame_rate), last);
        }
    }
}
