// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec::Vec;

use embedded_hal::blocking::i2c;

use crate::clock::VirtualClock;
use crate::eeprom_data::{
    datasheet_eeprom, datasheet_ram, eeprom_words, DATASHEET_CONTROL, EEPROM_LENGTH,
    EEPROM_WORDS, RAM_WORDS,
};

/// The factory default I²C address.
pub const DEFAULT_ADDRESS: u8 = 0x33;

const RAM_START: u16 = 0x0400;

const EEPROM_START: u16 = 0x2400;

const STATUS_REGISTER_ADDRESS: u16 = 0x8000;

// Bits 0-2 are read-only (last measured subpage).
const STATUS_REGISTER_WRITE_MASK: u16 = 0x0038;

const CONTROL_REGISTER_ADDRESS: u16 = 0x800D;

// Only the top three bits of control register 1 are reserved.
const CONTROL_REGISTER_WRITE_MASK: u16 = 0x1FFF;

const NEW_DATA: u16 = 0x0008;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MockError {
    /// An unknown I²C address was given.
    UnknownI2cAddress(u8),

    /// The given memory address isn't mapped, or the access runs off the end of a region.
    UnknownAddress(u16),

    /// The requested operation is not allowed.
    ///
    /// This covers things like a combined write-read with more than an address in the write
    /// half, a zero length read, or an odd number of bytes.
    IllegalOperation,

    /// A write tried to change read-only or reserved bits.
    IllegalWrite { address: u16, value: u16 },

    /// A failure requested with [`MockSensorBus::fail_next`].
    Injected,
}

/// A bus transaction as seen by the mock, with the virtual time it happened at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Read { address: u16, words: usize, at: u64 },
    Write { address: u16, value: u16, at: u64 },
}

impl Operation {
    pub fn address(&self) -> u16 {
        match self {
            Operation::Read { address, .. } | Operation::Write { address, .. } => *address,
        }
    }

    pub fn at(&self) -> u64 {
        match self {
            Operation::Read { at, .. } | Operation::Write { at, .. } => *at,
        }
    }

    pub fn is_ram_read(&self) -> bool {
        matches!(self, Operation::Read { address, .. } if *address == RAM_START)
    }
}

#[derive(Debug)]
struct MockState {
    eeprom: [u16; EEPROM_WORDS],
    ram: [u16; RAM_WORDS],
    status: u16,
    control: u16,
    /// When the camera will next publish a subpage.
    next_ready_at: u64,
    /// Keep publishing this subpage instead of alternating.
    repeat_subpage: Option<u16>,
    /// RAM reads that will see new data published while they were running.
    pending_races: usize,
    /// Transactions that will fail before the mock starts responding again.
    pending_faults: usize,
    operations: Vec<Operation>,
}

impl MockState {
    fn half_period(&self) -> u64 {
        2_000_000 >> ((self.control >> 7) & 0x7)
    }

    /// Publish every subpage the camera would have measured by `now`.
    fn latch(&mut self, now: u64) {
        while now >= self.next_ready_at {
            let subpage = self
                .repeat_subpage
                .unwrap_or((self.status & 0x0001) ^ 0x0001);
            self.status = (self.status & !0x0007) | subpage | NEW_DATA;
            self.next_ready_at += self.half_period();
        }
    }

    fn read(&mut self, address: u16, out_buffer: &mut [u8]) -> Result<(), MockError> {
        let words = out_buffer.len() / 2;
        let source: &[u16] = match address {
            STATUS_REGISTER_ADDRESS if words == 1 => core::slice::from_ref(&self.status),
            CONTROL_REGISTER_ADDRESS if words == 1 => core::slice::from_ref(&self.control),
            a if (RAM_START..RAM_START + RAM_WORDS as u16).contains(&a) => {
                let start = (a - RAM_START) as usize;
                self.ram
                    .get(start..start + words)
                    .ok_or(MockError::UnknownAddress(a))?
            }
            a if (EEPROM_START..EEPROM_START + EEPROM_WORDS as u16).contains(&a) => {
                let start = (a - EEPROM_START) as usize;
                self.eeprom
                    .get(start..start + words)
                    .ok_or(MockError::UnknownAddress(a))?
            }
            a => return Err(MockError::UnknownAddress(a)),
        };
        out_buffer
            .chunks_exact_mut(2)
            .zip(source.iter())
            .for_each(|(bytes, word)| bytes.copy_from_slice(&word.to_be_bytes()));
        if address == RAM_START && self.pending_races > 0 {
            self.pending_races -= 1;
            self.status |= NEW_DATA;
        }
        Ok(())
    }

    fn write(&mut self, address: u16, value: u16) -> Result<(), MockError> {
        let (register, mask) = match address {
            STATUS_REGISTER_ADDRESS => (&mut self.status, STATUS_REGISTER_WRITE_MASK),
            CONTROL_REGISTER_ADDRESS => (&mut self.control, CONTROL_REGISTER_WRITE_MASK),
            _ => return Err(MockError::UnknownAddress(address)),
        };
        if (value & !mask) != (*register & !mask) {
            return Err(MockError::IllegalWrite { address, value });
        }
        *register = value;
        Ok(())
    }

    fn take_fault(&mut self) -> Result<(), MockError> {
        if self.pending_faults > 0 {
            self.pending_faults -= 1;
            Err(MockError::Injected)
        } else {
            Ok(())
        }
    }
}

/// A simulated MLX90640 on an I²C bus.
///
/// The camera free-runs off the shared [`VirtualClock`], publishing a new subpage every half
/// period of whatever refresh rate is in its control register, alternating between subpages.
/// Clones share the same camera, so a test can keep a handle after moving one into a driver.
#[derive(Clone, Debug)]
pub struct MockSensorBus {
    i2c_address: u8,
    clock: VirtualClock,
    state: Arc<Mutex<MockState>>,
}

impl MockSensorBus {
    pub fn new(
        i2c_address: u8,
        clock: VirtualClock,
        eeprom: &[u8; EEPROM_LENGTH],
        ram: [u16; RAM_WORDS],
        control: u16,
    ) -> Self {
        let mut state = MockState {
            eeprom: eeprom_words(eeprom),
            ram,
            // Claim subpage 1 was measured last, so subpage 0 comes first.
            status: 0x0001,
            control,
            next_ready_at: 0,
            repeat_subpage: None,
            pending_races: 0,
            pending_faults: 0,
            operations: Vec::new(),
        };
        state.next_ready_at = clock.now() + state.half_period();
        Self {
            i2c_address,
            clock,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A camera loaded with the datasheet worked example.
    pub fn datasheet(i2c_address: u8, clock: VirtualClock) -> Self {
        Self::new(
            i2c_address,
            clock,
            &datasheet_eeprom(),
            datasheet_ram(),
            DATASHEET_CONTROL,
        )
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_ram(&self, ram: [u16; RAM_WORDS]) {
        self.state().ram = ram;
    }

    pub fn status(&self) -> u16 {
        self.state().status
    }

    pub fn control(&self) -> u16 {
        self.state().control
    }

    /// Always publish `subpage` (0 or 1), or go back to alternating with `None`.
    pub fn repeat_subpage(&self, subpage: Option<u16>) {
        self.state().repeat_subpage = subpage.map(|s| s & 0x0001);
    }

    /// Have the next `count` RAM reads race with the camera publishing new data.
    pub fn inject_races(&self, count: usize) {
        self.state().pending_races = count;
    }

    /// Fail the next `count` transactions.
    pub fn fail_next(&self, count: usize) {
        self.state().pending_faults = count;
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.state().operations.clear()
    }

    pub fn ram_reads(&self) -> usize {
        self.state()
            .operations
            .iter()
            .filter(|op| op.is_ram_read())
            .count()
    }
}

impl i2c::Write for MockSensorBus {
    type Error = MockError;

    fn write(&mut self, i2c_address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        if i2c_address != self.i2c_address {
            return Err(MockError::UnknownI2cAddress(i2c_address));
        }
        // Writes are always a single register: address then value.
        if bytes.len() != 4 {
            return Err(MockError::IllegalOperation);
        }
        let address = u16::from_be_bytes([bytes[0], bytes[1]]);
        let value = u16::from_be_bytes([bytes[2], bytes[3]]);
        let now = self.clock.now();
        let mut state = self.state();
        state.latch(now);
        state.operations.push(Operation::Write {
            address,
            value,
            at: now,
        });
        state.take_fault()?;
        state.write(address, value)
    }
}

impl i2c::WriteRead for MockSensorBus {
    type Error = MockError;

    fn write_read(
        &mut self,
        i2c_address: u8,
        write_buffer: &[u8],
        out_buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        if i2c_address != self.i2c_address {
            return Err(MockError::UnknownI2cAddress(i2c_address));
        }
        // Write-reads should only be writing the address, so write_buffer should only be two bytes
        if write_buffer.len() != 2 || out_buffer.is_empty() || out_buffer.len() % 2 != 0 {
            return Err(MockError::IllegalOperation);
        }
        let address = u16::from_be_bytes([write_buffer[0], write_buffer[1]]);
        let now = self.clock.now();
        let mut state = self.state();
        state.latch(now);
        state.operations.push(Operation::Read {
            address,
            words: out_buffer.len() / 2,
            at: now,
        });
        state.take_fault()?;
        state.read(address, out_buffer)
    }
}

#[cfg(test)]
mod test {
    use embedded_hal::blocking::i2c::{Write, WriteRead};

    use super::*;

    fn read_status(bus: &mut MockSensorBus) -> u16 {
        let mut buf = [0u8; 2];
        bus.write_read(DEFAULT_ADDRESS, &[0x80, 0x00], &mut buf)
            .unwrap();
        u16::from_be_bytes(buf)
    }

    #[test]
    fn publishes_alternating_subpages() {
        let clock = VirtualClock::new();
        let mut bus = MockSensorBus::datasheet(DEFAULT_ADDRESS, clock.clone());
        assert_eq!(read_status(&mut bus) & NEW_DATA, 0);
        // 0x1901 is refresh code 2, a 500ms half period.
        clock.advance(500_000);
        assert_eq!(read_status(&mut bus), 0x0008);
        bus.write(DEFAULT_ADDRESS, &[0x80, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(read_status(&mut bus), 0x0000);
        clock.advance(500_000);
        assert_eq!(read_status(&mut bus), 0x0009);
    }

    #[test]
    fn rejects_read_only_bits() {
        let mut bus = MockSensorBus::datasheet(DEFAULT_ADDRESS, VirtualClock::new());
        assert_eq!(
            bus.write(DEFAULT_ADDRESS, &[0x80, 0x00, 0x00, 0x00]),
            Err(MockError::IllegalWrite {
                address: 0x8000,
                value: 0x0000
            })
        );
        assert_eq!(
            bus.write(DEFAULT_ADDRESS, &[0x80, 0x0D, 0xF9, 0x01]),
            Err(MockError::IllegalWrite {
                address: 0x800D,
                value: 0xF901
            })
        );
    }

    #[test]
    fn injected_faults_and_races() {
        let clock = VirtualClock::new();
        let mut bus = MockSensorBus::datasheet(DEFAULT_ADDRESS, clock.clone());
        bus.fail_next(1);
        let mut buf = [0u8; 2];
        assert_eq!(
            bus.write_read(DEFAULT_ADDRESS, &[0x80, 0x00], &mut buf),
            Err(MockError::Injected)
        );
        bus.inject_races(1);
        let mut ram = [0u8; RAM_WORDS * 2];
        bus.write_read(DEFAULT_ADDRESS, &[0x04, 0x00], &mut ram)
            .unwrap();
        assert_eq!(&ram[..2], b"\x02\x61");
        assert_eq!(bus.status() & NEW_DATA, NEW_DATA);
        assert_eq!(bus.ram_reads(), 1);
        assert_eq!(bus.operations().len(), 2);
    }

    #[test]
    fn wrong_address() {
        let mut bus = MockSensorBus::datasheet(DEFAULT_ADDRESS, VirtualClock::new());
        let mut buf = [0u8; 2];
        assert_eq!(
            bus.write_read(0x10, &[0x80, 0x00], &mut buf),
            Err(MockError::UnknownI2cAddress(0x10))
        );
    }
}
