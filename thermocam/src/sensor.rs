// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! The MLX90640 driver.
//!
//! The camera measures continuously, alternating between its two subpages, and flags each new
//! subpage in the status register. The driver sleeps through most of a subpage period, polls the
//! status register near the end of it, and then copies RAM out while making sure the camera
//! didn't publish anything else in the meantime.
use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::blocking::i2c;
use log::{debug, warn};

use crate::calculations;
use crate::calibration::CalibrationParameters;
use crate::common::{Address, EepromAddress, RamAddress, EEPROM_WORDS, RAM_WORDS};
use crate::error::{Error, LibraryError};
use crate::frame::{FrameSource, ProcessedFrame, RawFrame, Subframe};
use crate::register::{ControlRegister, RefreshRate, Register, StatusRegister, Subpage};
use crate::timer::{Clock, SubframeTiming};
use crate::util::copy_be_words;

/// How many times a subframe read is attempted, both for racing the camera while copying RAM
/// and for getting the wrong subpage.
const MAX_ATTEMPTS: usize = 3;

/// The refresh rate committed when the driver is created.
const INITIAL_REFRESH_RATE: RefreshRate = RefreshRate::One;

/// Driver for an MLX90640 on an I²C bus.
///
/// `C` provides both the time base for subframe scheduling and the sleeps in between polls.
#[derive(Debug)]
pub struct Mlx90640<I2C, C> {
    /// The I²C bus this camera is accessible on.
    bus: I2C,

    /// The I²C address this camera is accessible at.
    address: u8,

    clock: C,

    calibration: CalibrationParameters,

    timing: SubframeTiming,
}

impl<I2C, C> Mlx90640<I2C, C>
where
    I2C: i2c::WriteRead + i2c::Write,
    C: Clock + DelayUs<u32>,
{
    /// Create a driver for the camera at `address`.
    ///
    /// The calibration data is read out of the camera's EEPROM and checked, then the refresh rate
    /// is set to 1Hz. Nothing is returned if any of that fails.
    ///
    /// MLX90640s can be configured to use any I²C address (except 0x00), but the default address
    /// is 0x33.
    pub fn new(bus: I2C, address: u8, clock: C) -> Result<Self, Error<I2C>> {
        // We own the bus now, make it mutable.
        let mut bus = bus;
        let mut clock = clock;
        let mut eeprom = [0u8; EEPROM_WORDS * 2];
        read_words(&mut bus, address, EepromAddress::Base.into(), &mut eeprom)?;
        let calibration = CalibrationParameters::from_data(&eeprom)?;
        debug!("loaded calibration: {:?}", calibration);
        let timing = SubframeTiming::new(INITIAL_REFRESH_RATE, clock.now_micros());
        let mut camera = Self {
            bus,
            address,
            clock,
            calibration,
            timing,
        };
        camera.set_refresh(INITIAL_REFRESH_RATE)?;
        Ok(camera)
    }

    /// The calibration parameters read when the driver was created.
    pub fn calibration(&self) -> &CalibrationParameters {
        &self.calibration
    }

    /// The refresh rate most recently set successfully.
    pub fn refresh_rate(&self) -> RefreshRate {
        self.timing.refresh_rate()
    }

    /// Change the camera's refresh rate.
    ///
    /// Only the refresh rate bits of the control register are changed. If any part of this fails
    /// the previous rate is kept.
    pub fn set_refresh(&mut self, refresh_rate: RefreshRate) -> Result<(), Error<I2C>> {
        let control: ControlRegister = read_register(&mut self.bus, self.address)?;
        write_register(
            &mut self.bus,
            self.address,
            control.with_refresh_rate(refresh_rate),
        )?;
        self.timing.set_refresh_rate(refresh_rate);
        Ok(())
    }

    /// Read a complete frame, subpage 0 into `frame.subframes[0]`, then subpage 1 into
    /// `frame.subframes[1]`.
    ///
    /// On failure the frame is left partially filled and the whole frame should be read again.
    pub fn read_frame(&mut self, frame: &mut RawFrame) -> Result<(), Error<I2C>> {
        for subpage in Subpage::ALL {
            self.read_specific_subframe(subpage, &mut frame.subframes[subpage as usize])?;
        }
        Ok(())
    }

    /// Read subframes until one for `subpage` shows up, giving up after three tries.
    pub fn read_specific_subframe(
        &mut self,
        subpage: Subpage,
        subframe: &mut Subframe,
    ) -> Result<(), Error<I2C>> {
        for attempt in 1..=MAX_ATTEMPTS {
            self.read_subframe(subframe)?;
            if subframe.subpage() == subpage {
                return Ok(());
            }
            debug!(
                "wanted subpage {:?} but got {:?} ({}/{})",
                subpage,
                subframe.subpage(),
                attempt,
                MAX_ATTEMPTS
            );
        }
        warn!("gave up waiting for subpage {:?}", subpage);
        Err(LibraryError::SubpageMismatch(subpage).into())
    }

    /// Wait for the next subframe the camera publishes and read it into `subframe`.
    pub fn read_subframe(&mut self, subframe: &mut Subframe) -> Result<(), Error<I2C>> {
        let now = self.clock.now_micros();
        let wait = self.timing.remaining_wait(now);
        if wait > 0 {
            self.clock.delay_us(wait);
        }
        let polled = self.poll_new_data();
        // Successful or not, the next subframe is scheduled off of this one.
        let now = self.clock.now_micros();
        self.timing.mark_ready(now);
        let mut status = polled?;
        let mut attempt = 1;
        loop {
            write_register(&mut self.bus, self.address, status.acknowledged())?;
            let mut ram = [0u8; RAM_WORDS * 2];
            read_words(&mut self.bus, self.address, RamAddress::Base.into(), &mut ram)?;
            copy_be_words(&ram, subframe.data_mut());
            status = read_register(&mut self.bus, self.address)?;
            if !status.new_data() {
                break;
            }
            if attempt >= MAX_ATTEMPTS {
                warn!("camera kept publishing data while RAM was being read");
                return Err(LibraryError::DataRace.into());
            }
            debug!(
                "new data published mid-read, retrying ({}/{})",
                attempt, MAX_ATTEMPTS
            );
            attempt += 1;
        }
        let control: ControlRegister = read_register(&mut self.bus, self.address)?;
        subframe.set_control(control);
        subframe.set_subpage(status.last_updated_subpage());
        Ok(())
    }

    /// Convert a raw frame into temperatures using this camera's calibration.
    pub fn process_frame(&self, frame: &RawFrame, emissivity: f32) -> ProcessedFrame {
        calculations::process_frame(&self.calibration, frame, emissivity)
    }

    /// Poll the status register until the camera flags new data.
    fn poll_new_data(&mut self) -> Result<StatusRegister, Error<I2C>> {
        loop {
            let status: StatusRegister = read_register(&mut self.bus, self.address)?;
            if status.new_data() {
                return Ok(status);
            }
            self.clock.delay_us(self.timing.poll_time());
        }
    }
}

impl<I2C, C> FrameSource for Mlx90640<I2C, C>
where
    I2C: i2c::WriteRead + i2c::Write,
    <I2C as i2c::WriteRead>::Error: core::fmt::Debug,
    <I2C as i2c::Write>::Error: core::fmt::Debug,
    C: Clock + DelayUs<u32>,
{
    type Error = Error<I2C>;

    fn refresh_rate(&self) -> RefreshRate {
        Mlx90640::refresh_rate(self)
    }

    fn set_refresh_rate(&mut self, refresh_rate: RefreshRate) -> Result<(), Self::Error> {
        self.set_refresh(refresh_rate)
    }

    fn read_frame(&mut self, frame: &mut RawFrame) -> Result<(), Self::Error> {
        Mlx90640::read_frame(self, frame)
    }
}

/// Read `buffer.len() / 2` words starting at `start` in a single transaction.
fn read_words<I2C>(
    bus: &mut I2C,
    i2c_address: u8,
    start: Address,
    buffer: &mut [u8],
) -> Result<(), Error<I2C>>
where
    I2C: i2c::WriteRead + i2c::Write,
{
    bus.write_read(i2c_address, &start.as_bytes(), buffer)
        .map_err(Error::I2cWriteReadError)
}

fn read_register<R, I2C>(bus: &mut I2C, address: u8) -> Result<R, Error<I2C>>
where
    I2C: i2c::WriteRead + i2c::Write,
    R: Register,
{
    let mut register_bytes = [0u8; 2];
    read_words(bus, address, R::address(), &mut register_bytes)?;
    Ok(R::from(u16::from_be_bytes(register_bytes)))
}

fn write_register<R, I2C>(bus: &mut I2C, address: u8, register: R) -> Result<(), Error<I2C>>
where
    I2C: i2c::Write + i2c::WriteRead,
    R: Register,
{
    let register_address = R::address();
    let raw: u16 = register.into();
    // Read-only bits are written as zero.
    let register_value = raw & R::write_mask();
    write_raw_register(
        bus,
        address,
        register_address.as_bytes(),
        register_value.to_be_bytes(),
    )
    .map_err(Error::I2cWriteError)
}

fn write_raw_register<I2C: i2c::Write>(
    bus: &mut I2C,
    i2c_address: u8,
    register_address: [u8; 2],
    register_data: [u8; 2],
) -> Result<(), I2C::Error> {
    let combined: [u8; 4] = [
        register_address[0],
        register_address[1],
        register_data[0],
        register_data[1],
    ];
    bus.write(i2c_address, &combined)
}
