// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use embedded_hal::blocking::delay::DelayUs;
use thermocam::config::SharedFlash;
use thermocam::{
    Clock, ConfigStore, FlashDevice, LiveOptions, Mlx90640, Options, Pipeline, ProcessedFrame,
    SaveOutcome,
};
use thermocam_test_data::{
    FlashFault, MockFlash, MockSensorBus, VirtualClock, DATASHEET_CONTROL, DEFAULT_ADDRESS,
    SECTOR_SIZE,
};

/// The virtual clock, as seen by the driver.
#[derive(Clone, Debug, Default)]
struct TestClock(VirtualClock);

impl Clock for TestClock {
    fn now_micros(&mut self) -> u64 {
        self.0.now()
    }
}

impl DelayUs<u32> for TestClock {
    fn delay_us(&mut self, us: u32) {
        self.0.delay_us(us)
    }
}

/// The mock flash, as seen by the settings store.
#[derive(Debug)]
struct TestFlash(MockFlash);

impl FlashDevice for TestFlash {
    type Error = FlashFault;

    fn size(&self) -> u32 {
        self.0.size()
    }

    fn page_size(&self) -> u32 {
        self.0.page_size()
    }

    fn sector_size(&self) -> u32 {
        self.0.sector_size()
    }

    fn block_size(&self) -> u32 {
        self.0.block_size()
    }

    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.0.read(address, buffer)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.0.write(address, data)
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error> {
        self.0.erase_sector(address)
    }

    fn erase_block(&mut self, address: u32) -> Result<(), Self::Error> {
        self.0.erase_block(address)
    }
}

const TIMEOUT: Duration = Duration::from_secs(10);

const SETTINGS: ConfigStore<Options> = ConfigStore::new(2 * SECTOR_SIZE);

fn start_camera() -> (Mlx90640<MockSensorBus, TestClock>, MockSensorBus) {
    let clock = TestClock::default();
    let bus = MockSensorBus::datasheet(DEFAULT_ADDRESS, clock.0.clone());
    let camera = Mlx90640::new(bus.clone(), DEFAULT_ADDRESS, clock)
        .expect("the datasheet camera should load");
    (camera, bus)
}

fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn datasheet_frames_reach_the_renderer() {
    let (camera, _bus) = start_camera();
    let calibration = Arc::new(camera.calibration().clone());
    let options = Arc::new(LiveOptions::new(Options {
        frame_rate: 1,
        emissivity: 1.0,
    }));
    let (sender, receiver) = mpsc::channel();
    let pipeline = Pipeline::start(
        camera,
        calibration,
        move |frame: ProcessedFrame| {
            // The test may have stopped listening already.
            let _ = sender.send(frame);
        },
        options,
    )
    .unwrap();
    for _ in 0..3 {
        let frame = receiver.recv_timeout(TIMEOUT).unwrap();
        // Row 12, column 16 of the worked example in the datasheet.
        assert_eq!(frame.temperatures()[11 * 32 + 15], 321);
    }
    let stats = pipeline.stats();
    assert!(stats.frames_acquired >= 3);
    assert_eq!(stats.read_failures, 0);
    pipeline.shutdown().unwrap();
}

#[test]
fn frame_rate_changes_reach_the_camera() {
    let (camera, bus) = start_camera();
    assert_eq!(bus.control(), DATASHEET_CONTROL);
    let calibration = Arc::new(camera.calibration().clone());
    let options = Arc::new(LiveOptions::new(Options {
        frame_rate: 1,
        emissivity: 0.95,
    }));
    let pipeline = Pipeline::start(camera, calibration, |_: ProcessedFrame| {}, options).unwrap();
    // 1 -> 2 -> 4 -> 8
    for _ in 0..3 {
        pipeline.options().cycle_frame_rate();
    }
    wait_until(|| bus.control() == 0x1A81);
    pipeline.shutdown().unwrap();
}

#[test]
fn settings_survive_a_restart() {
    let flash = SharedFlash::new(TestFlash(MockFlash::small()));

    // First boot: nothing saved yet, so the defaults stay.
    let mut boot_options = Options::default();
    assert_eq!(SETTINGS.load(&flash, &mut boot_options).unwrap(), None);
    let (camera, _bus) = start_camera();
    let calibration = Arc::new(camera.calibration().clone());
    let options = Arc::new(LiveOptions::new(boot_options));
    let pipeline = Pipeline::start(
        camera,
        calibration,
        |_: ProcessedFrame| {},
        Arc::clone(&options),
    )
    .unwrap();
    options.cycle_frame_rate();
    options.cycle_emissivity();
    // Saving happens off of the pipeline threads, while they keep running.
    let saver = {
        let options = Arc::clone(&options);
        let flash = &flash;
        thread::scope(|scope| {
            scope
                .spawn(move || SETTINGS.save(flash, &options.snapshot()))
                .join()
                .unwrap()
        })
    };
    assert_eq!(
        saver.unwrap(),
        SaveOutcome::Written {
            offset: 0,
            erased: false
        }
    );
    pipeline.shutdown().unwrap();

    // Second boot.
    let mut restored = Options::default();
    assert_eq!(SETTINGS.load(&flash, &mut restored).unwrap(), Some(0));
    assert_eq!(restored, options.snapshot());
    assert_eq!(restored.frame_rate, 1);
    assert_eq!(SETTINGS.save(&flash, &restored).unwrap(), SaveOutcome::Unchanged);
    // Nothing outside the settings sector was touched.
    let contents = flash.into_inner().0;
    let (before, rest) = contents.contents().split_at(2 * SECTOR_SIZE as usize);
    assert!(before.iter().all(|byte| *byte == 0xFF));
    assert!(rest[SECTOR_SIZE as usize..].iter().all(|byte| *byte == 0xFF));
}
