// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! The core of a handheld thermal camera built around the Melexis MLX90640.
//!
//! There are three parts:
//!
//! * [`Mlx90640`], a driver that talks to the camera over I²C, reads its calibration data, and
//!   reads complete frames (both [subpages](#subpages)) while staying in step with the camera's
//!   own measurement schedule.
//! * [`Pipeline`], which runs acquisition, temperature processing, and rendering on their own
//!   threads, handing frames between them through single slot [mailboxes][mailbox::Mailbox].
//!   Only available with the `std` feature.
//! * [`config`], for keeping the user's [`Options`] in a sector of NOR flash, wear-leveled across
//!   the pages of that sector and tolerant of losing power part way through a save.
//!
//! The driver uses the [`embedded-hal`][embedded-hal] I²C and delay traits, so anything with an
//! `embedded-hal` implementation should work. Everything except the pipeline is `no_std`
//! compatible, with either the `std` or `libm` feature providing the floating point functions.
//!
//! [embedded-hal]: https://docs.rs/embedded-hal/*/embedded_hal/blocking/i2c/index.html
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use linux_embedded_hal::I2cdev;
//! use thermocam::{LiveOptions, Mlx90640, Options, Pipeline, ProcessedFrame, StdClock};
//!
//! let bus = I2cdev::new("/dev/i2c-1").expect("/dev/i2c-1 needs to be an I2C controller");
//! // Default address for these cameras is 0x33
//! let camera = Mlx90640::new(bus, 0x33, StdClock::new())?;
//! let calibration = Arc::new(camera.calibration().clone());
//! let options = Arc::new(LiveOptions::new(Options::default()));
//! let pipeline = Pipeline::start(camera, calibration, |frame: ProcessedFrame| {
//!     println!("center: {:.2}°C", thermocam::frame::to_celsius(frame.center()));
//! }, options).expect("the pipeline threads should start");
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! pipeline.shutdown().expect("no pipeline thread should panic");
//! # Ok::<(), thermocam::Error<I2cdev>>(())
//! ```
//!
//! # Subpages
//! The camera doesn't update its whole image at once. The imaging area is divided into two
//! [subpages][Subpage], measured in turn. In the default chess board [access
//! pattern][AccessPattern], pixels alternate subpages in both the X and Y axes:
//! ```text
//! 0 1 0 1 0 1 0 1
//! 1 0 1 0 1 0 1 0
//! 0 1 0 1 0 1 0 1
//! 1 0 1 0 1 0 1 0
//! ```
//! A [`RawFrame`] holds one of each subpage, and every pixel of a [`ProcessedFrame`] comes from
//! the subpage it was measured in.
#![no_std]

#[cfg(feature = "std")]
extern crate std;

#[cfg(not(any(feature = "std", feature = "libm")))]
compile_error!("Either the `std` or `libm` feature is required for floating point math.");

pub mod calculations;
pub mod calibration;
pub mod common;
pub mod config;
pub mod error;
pub mod frame;
#[cfg(feature = "std")]
pub mod mailbox;
#[cfg(feature = "std")]
pub mod pipeline;
pub mod register;
pub mod sensor;
#[cfg(test)]
mod test;
pub mod timer;
mod util;

pub use calibration::CalibrationParameters;
pub use common::Address;
pub use config::{ConfigStore, FlashDevice, LiveOptions, Options, SaveOutcome, StoreError};
pub use error::{Error, LibraryError};
pub use frame::{FrameProcessor, FrameSource, ProcessedFrame, RawFrame, Subframe};
#[cfg(feature = "std")]
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineStats, RenderSink, Unit};
pub use register::*;
pub use sensor::Mlx90640;
#[cfg(feature = "std")]
pub use timer::StdClock;
pub use timer::{Clock, SubframeTiming};
