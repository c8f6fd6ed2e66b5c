// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use std::vec;
use std::vec::Vec;

/// Geometry of the W25Q-style NOR parts the firmware is usually paired with.
pub const PAGE_SIZE: u32 = 256;

pub const SECTOR_SIZE: u32 = 4096;

pub const BLOCK_SIZE: u32 = 65536;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlashFault {
    /// The access runs past the end of the device.
    OutOfBounds { address: u32, length: usize },

    /// A program operation crossed a page boundary.
    PageOverrun { address: u32, length: usize },

    /// An erase address wasn't aligned to the erase size.
    Misaligned(u32),

    /// Power was cut, see [`MockFlash::lose_power_after`].
    PowerLost,

    /// A read failure requested with [`MockFlash::fail_next_read`].
    ReadFailed,
}

/// An in-memory NOR flash.
///
/// Programming can only clear bits (the new contents are the old contents ANDed with the data),
/// and only erasing sets them back to `0xFF`. Operation counters and fault injection are there
/// for checking wear and power loss behaviour.
#[derive(Clone, Debug)]
pub struct MockFlash {
    data: Vec<u8>,
    writes: usize,
    erases: usize,
    reads: usize,
    /// Writes left before power is cut.
    writes_until_power_loss: Option<usize>,
    /// Bytes of the next write that make it to the chip before power is cut.
    tear_next_write: Option<usize>,
    fail_next_read: bool,
}

impl MockFlash {
    /// A blank (fully erased) device of `size` bytes.
    pub fn new(size: u32) -> Self {
        Self {
            data: vec![0xFF; size as usize],
            writes: 0,
            erases: 0,
            reads: 0,
            writes_until_power_loss: None,
            tear_next_write: None,
            fail_next_read: false,
        }
    }

    /// A blank 16 sector device.
    pub fn small() -> Self {
        Self::new(SECTOR_SIZE * 16)
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    pub fn sector_size(&self) -> u32 {
        SECTOR_SIZE
    }

    pub fn block_size(&self) -> u32 {
        BLOCK_SIZE
    }

    fn range(&self, address: u32, length: usize) -> Result<core::ops::Range<usize>, FlashFault> {
        let start = address as usize;
        let end = start + length;
        if end > self.data.len() {
            Err(FlashFault::OutOfBounds { address, length })
        } else {
            Ok(start..end)
        }
    }

    pub fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), FlashFault> {
        if self.fail_next_read {
            self.fail_next_read = false;
            return Err(FlashFault::ReadFailed);
        }
        let range = self.range(address, buffer.len())?;
        buffer.copy_from_slice(&self.data[range]);
        self.reads += 1;
        Ok(())
    }

    /// Program `data` at `address`. The write must stay within one page.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashFault> {
        let range = self.range(address, data.len())?;
        let page_offset = address % PAGE_SIZE;
        if page_offset as usize + data.len() > PAGE_SIZE as usize {
            return Err(FlashFault::PageOverrun {
                address,
                length: data.len(),
            });
        }
        if let Some(remaining) = self.writes_until_power_loss {
            if remaining == 0 {
                return Err(FlashFault::PowerLost);
            }
            self.writes_until_power_loss = Some(remaining - 1);
        }
        let programmed = match self.tear_next_write.take() {
            Some(bytes) => bytes.min(data.len()),
            None => data.len(),
        };
        self.data[range]
            .iter_mut()
            .zip(data[..programmed].iter())
            .for_each(|(cell, byte)| *cell &= *byte);
        self.writes += 1;
        if programmed < data.len() {
            Err(FlashFault::PowerLost)
        } else {
            Ok(())
        }
    }

    fn erase(&mut self, address: u32, size: u32) -> Result<(), FlashFault> {
        if address % size != 0 {
            return Err(FlashFault::Misaligned(address));
        }
        let range = self.range(address, size as usize)?;
        self.data[range].iter_mut().for_each(|cell| *cell = 0xFF);
        self.erases += 1;
        Ok(())
    }

    pub fn erase_sector(&mut self, address: u32) -> Result<(), FlashFault> {
        self.erase(address, SECTOR_SIZE)
    }

    pub fn erase_block(&mut self, address: u32) -> Result<(), FlashFault> {
        self.erase(address, BLOCK_SIZE)
    }

    /// Successful program operations so far, torn writes included.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn erases(&self) -> usize {
        self.erases
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn reset_counters(&mut self) {
        self.writes = 0;
        self.erases = 0;
        self.reads = 0;
    }

    /// Let `writes` more program operations through, then fail every one after that.
    pub fn lose_power_after(&mut self, writes: usize) {
        self.writes_until_power_loss = Some(writes);
    }

    /// Bring the power back after [`lose_power_after`][MockFlash::lose_power_after].
    pub fn restore_power(&mut self) {
        self.writes_until_power_loss = None;
    }

    /// Only program the first `bytes` bytes of the next write, then report power loss.
    pub fn tear_next_write(&mut self, bytes: usize) {
        self.tear_next_write = Some(bytes);
    }

    pub fn fail_next_read(&mut self) {
        self.fail_next_read = true;
    }

    /// The raw contents of the device.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Overwrite raw contents, bypassing NOR semantics. Useful for planting corrupted records.
    pub fn poke(&mut self, address: u32, data: &[u8]) {
        let start = address as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nor_semantics() {
        let mut flash = MockFlash::small();
        flash.write(0, &[0xF0, 0x0F]).unwrap();
        flash.write(0, &[0x3C, 0xFF]).unwrap();
        assert_eq!(&flash.contents()[..3], &[0x30, 0x0F, 0xFF]);
        flash.erase_sector(0).unwrap();
        assert_eq!(&flash.contents()[..2], &[0xFF, 0xFF]);
        assert_eq!(flash.writes(), 2);
        assert_eq!(flash.erases(), 1);
    }

    #[test]
    fn page_and_alignment_checks() {
        let mut flash = MockFlash::small();
        assert_eq!(
            flash.write(250, &[0u8; 8]),
            Err(FlashFault::PageOverrun {
                address: 250,
                length: 8
            })
        );
        assert_eq!(flash.erase_sector(100), Err(FlashFault::Misaligned(100)));
        let mut buf = [0u8; 4];
        assert!(flash.read(flash.size() - 2, &mut buf).is_err());
    }

    #[test]
    fn power_loss() {
        let mut flash = MockFlash::small();
        flash.lose_power_after(1);
        flash.write(0, &[0x00]).unwrap();
        assert_eq!(flash.write(1, &[0x00]), Err(FlashFault::PowerLost));
        assert_eq!(flash.contents()[1], 0xFF);
        flash.restore_power();
        flash.tear_next_write(2);
        assert_eq!(flash.write(8, &[0x11, 0x22, 0x33]), Err(FlashFault::PowerLost));
        assert_eq!(&flash.contents()[8..11], &[0x11, 0x22, 0xFF]);
    }
}
