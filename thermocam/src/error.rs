// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
#[cfg(feature = "std")]
extern crate std;

use core::fmt;

use embedded_hal::blocking::i2c;

use crate::register::Subpage;

/// Errors that don't involve I²C.
#[derive(Clone, Debug, PartialEq)]
pub enum LibraryError {
    /// When a value from the camera is malformed in some way.
    InvalidData(&'static str),

    /// The camera kept publishing new data while a subframe was being copied out of RAM.
    DataRace,

    /// The camera never delivered the requested subframe.
    SubpageMismatch(Subpage),

    /// The EEPROM marks more pixels as broken or outliers than the camera is allowed to have.
    TooManyDeviatingPixels(usize),

    /// Two broken or outlier pixels are next to each other, so neither can be interpolated.
    AdjacentDeviatingPixels(usize, usize),

    Other(&'static str),
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryError::InvalidData(msg) => write!(f, "{}", msg),
            LibraryError::DataRace => write!(f, "new data arrived while reading a subframe"),
            LibraryError::SubpageMismatch(subpage) => {
                write!(f, "subpage {:?} was never delivered", subpage)
            }
            LibraryError::TooManyDeviatingPixels(count) => {
                write!(f, "{} deviating pixels, at most 4 are allowed", count)
            }
            LibraryError::AdjacentDeviatingPixels(first, second) => write!(
                f,
                "deviating pixels {} and {} are adjacent to each other",
                first, second
            ),
            LibraryError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LibraryError {}

pub enum Error<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
{
    /// Errors from combined write-read transactions (so any reads).
    I2cWriteReadError(<I2C as i2c::WriteRead>::Error),

    /// Errors from plain write transactions.
    I2cWriteError(<I2C as i2c::Write>::Error),

    /// Errors originating from within this library.
    LibraryError(LibraryError),
}

// Custom Debug implementation so that I2C doesn't need to implement Debug (like the one from
// linux-embedded-hal).
impl<I2C> fmt::Debug for Error<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
    <I2C as i2c::WriteRead>::Error: fmt::Debug,
    <I2C as i2c::Write>::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::I2cWriteReadError(err) => f
                .debug_tuple("Error::I2cWriteReadError")
                .field(err)
                .finish(),
            Error::I2cWriteError(err) => f.debug_tuple("Error::I2cWriteError").field(err).finish(),
            Error::LibraryError(err) => f.debug_tuple("Error::LibraryError").field(err).finish(),
        }
    }
}

impl<I2C> fmt::Display for Error<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
    <I2C as i2c::WriteRead>::Error: fmt::Debug,
    <I2C as i2c::Write>::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::I2cWriteReadError(err) => write!(f, "I2C read error: {:?}", err),
            Error::I2cWriteError(err) => write!(f, "I2C write error: {:?}", err),
            Error::LibraryError(err) => write!(f, "Library Error: {}", err),
        }
    }
}

#[cfg(feature = "std")]
impl<I2C> std::error::Error for Error<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
    <I2C as i2c::WriteRead>::Error: std::error::Error + 'static,
    <I2C as i2c::Write>::Error: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::I2cWriteReadError(err) => Some(err),
            Error::I2cWriteError(err) => Some(err),
            Error::LibraryError(lib_err) => Some(lib_err),
        }
    }
}

impl<I2C> From<LibraryError> for Error<I2C>
where
    I2C: i2c::WriteRead + i2c::Write,
{
    fn from(lib_err: LibraryError) -> Self {
        Self::LibraryError(lib_err)
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use std::format;

    use super::LibraryError;
    use crate::register::Subpage;

    #[test]
    fn library_error_messages() {
        assert_eq!(
            format!("{}", LibraryError::SubpageMismatch(Subpage::One)),
            "subpage One was never delivered"
        );
        assert_eq!(
            format!("{}", LibraryError::AdjacentDeviatingPixels(3, 4)),
            "deviating pixels 3 and 4 are adjacent to each other"
        );
        assert_eq!(
            format!("{}", LibraryError::InvalidData("bad")),
            "bad"
        );
    }
}
