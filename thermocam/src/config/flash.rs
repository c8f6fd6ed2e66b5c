// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! The block device the settings live on.
use core::fmt::Debug;

/// A NOR flash chip (or anything that behaves like one).
///
/// Erasing sets every bit in a sector or block to 1, and programming can only clear bits. Writes
/// must not cross a page boundary.
pub trait FlashDevice {
    type Error: Debug;

    /// Total size of the device in bytes.
    fn size(&self) -> u32;

    /// The largest unit that can be programmed in a single write.
    fn page_size(&self) -> u32;

    /// The smallest erasable unit.
    fn sector_size(&self) -> u32;

    fn block_size(&self) -> u32;

    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Program `data` at `address`. The range must be within a single page.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Erase the sector starting at `address`.
    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error>;

    /// Erase the block starting at `address`.
    fn erase_block(&mut self, address: u32) -> Result<(), Self::Error>;
}

impl<F: FlashDevice + ?Sized> FlashDevice for &mut F {
    type Error = F::Error;

    fn size(&self) -> u32 {
        (**self).size()
    }

    fn page_size(&self) -> u32 {
        (**self).page_size()
    }

    fn sector_size(&self) -> u32 {
        (**self).sector_size()
    }

    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(address, buffer)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        (**self).write(address, data)
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error> {
        (**self).erase_sector(address)
    }

    fn erase_block(&mut self, address: u32) -> Result<(), Self::Error> {
        (**self).erase_block(address)
    }
}

#[cfg(feature = "std")]
pub use self::shared::SharedFlash;

#[cfg(feature = "std")]
mod shared {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use super::FlashDevice;

    /// A flash device shared between threads.
    ///
    /// `&SharedFlash<F>` is itself a [`FlashDevice`], taking the lock for each operation, so the
    /// settings store and anything else on the chip can hold plain references to it.
    #[derive(Debug, Default)]
    pub struct SharedFlash<F> {
        device: Mutex<F>,
    }

    impl<F> SharedFlash<F> {
        pub fn new(device: F) -> Self {
            Self {
                device: Mutex::new(device),
            }
        }

        /// Lock the device for a sequence of operations.
        pub fn lock(&self) -> MutexGuard<'_, F> {
            self.device.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub fn into_inner(self) -> F {
            self.device
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl<F: FlashDevice> FlashDevice for &SharedFlash<F> {
        type Error = F::Error;

        fn size(&self) -> u32 {
            self.lock().size()
        }

        fn page_size(&self) -> u32 {
            self.lock().page_size()
        }

        fn sector_size(&self) -> u32 {
            self.lock().sector_size()
        }

        fn block_size(&self) -> u32 {
            self.lock().block_size()
        }

        fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Self::Error> {
            self.lock().read(address, buffer)
        }

        fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
            self.lock().write(address, data)
        }

        fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error> {
            self.lock().erase_sector(address)
        }

        fn erase_block(&mut self, address: u32) -> Result<(), Self::Error> {
            self.lock().erase_block(address)
        }
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use std::sync::Arc;
    use std::thread;

    use thermocam_test_data::MockFlash;

    use super::FlashDevice;

    #[cfg(feature = "std")]
    #[test]
    fn shared_by_reference() {
        use super::SharedFlash;

        let shared = Arc::new(SharedFlash::new(MockFlash::small()));
        let writer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let mut flash = &*shared;
                flash.write(0, &[0x12, 0x34]).unwrap();
            })
        };
        writer.join().unwrap();
        let mut flash = &*shared;
        let mut buf = [0u8; 2];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0x12, 0x34]);
        assert_eq!(flash.sector_size(), 4096);
        assert_eq!(shared.lock().writes(), 1);
    }

    #[test]
    fn mutable_reference_forwards() {
        let mut mock = MockFlash::small();
        {
            // Called through the trait, or the inherent methods would be picked.
            let mut flash = &mut mock;
            FlashDevice::write(&mut flash, 16, &[0x00]).unwrap();
            let mut byte = [0xFF];
            FlashDevice::read(&mut flash, 16, &mut byte).unwrap();
            assert_eq!(byte, [0x00]);
            FlashDevice::erase_sector(&mut flash, 0).unwrap();
            FlashDevice::erase_block(&mut flash, 0).unwrap();
            assert_eq!(FlashDevice::page_size(&flash), 256);
            assert_eq!(FlashDevice::sector_size(&flash), 4096);
            assert_eq!(FlashDevice::block_size(&flash), 65536);
            assert_eq!(FlashDevice::size(&flash), 16 * 4096);
        }
        assert_eq!(mock.writes(), 1);
        assert_eq!(mock.erases(), 2);
        assert_eq!(mock.contents()[16], 0xFF);
    }
}
