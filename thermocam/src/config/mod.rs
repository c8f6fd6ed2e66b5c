// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Persistent user settings.
mod flash;
mod options;
mod store;

pub use flash::FlashDevice;
#[cfg(feature = "std")]
pub use flash::SharedFlash;
pub use options::{LiveOptions, Options};
pub use store::{ConfigStore, SaveOutcome, StoreError, MAX_RECORD_SIZE};

/// A fixed size value that can be stored in a [`ConfigStore`].
///
/// The encoding is up to the implementation, but it has to be exactly `SIZE` bytes, and decoding
/// what was encoded has to give back the same value.
pub trait Payload {
    const SIZE: usize;

    /// Write the value into `bytes`, which is `SIZE` bytes long.
    fn encode(&self, bytes: &mut [u8]);

    /// Replace this value with the one encoded in `bytes`, which is `SIZE` bytes long.
    fn decode(&mut self, bytes: &[u8]);
}
