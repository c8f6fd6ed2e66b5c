// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Hooks the simulated peripherals from `thermocam-test-data` up to this crate's traits.
use thermocam_test_data::{FlashFault, MockFlash, VirtualClock};

use crate::config::FlashDevice;
use crate::timer::Clock;

impl Clock for VirtualClock {
    fn now_micros(&mut self) -> u64 {
        self.now()
    }
}

impl FlashDevice for MockFlash {
    type Error = FlashFault;

    fn size(&self) -> u32 {
        MockFlash::size(self)
    }

    fn page_size(&self) -> u32 {
        MockFlash::page_size(self)
    }

    fn sector_size(&self) -> u32 {
        MockFlash::sector_size(self)
    }

    fn block_size(&self) -> u32 {
        MockFlash::block_size(self)
    }

    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Self::Error> {
        MockFlash::read(self, address, buffer)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        MockFlash::write(self, address, data)
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error> {
        MockFlash::erase_sector(self, address)
    }

    fn erase_block(&mut self, address: u32) -> Result<(), Self::Error> {
        MockFlash::erase_block(self, address)
    }
}
