// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use linux_embedded_hal::I2cdev;
use thermocam::config::SharedFlash;
use thermocam::frame::to_celsius;
use thermocam::{
    ConfigStore, FlashDevice, LiveOptions, Mlx90640, Options, Pipeline, ProcessedFrame, StdClock,
};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::FmtSubscriber;

const FLASH_SIZE: u32 = 64 * 1024;
const PAGE_SIZE: u32 = 256;
const SECTOR_SIZE: u32 = 4 * 1024;
const BLOCK_SIZE: u32 = 64 * 1024;

/// Settings live in the first sector.
const SETTINGS: ConfigStore<Options> = ConfigStore::new(0);

fn main() -> anyhow::Result<()> {
    // Also picks up the library's `log` records.
    FmtSubscriber::builder()
        .with_max_level(LevelFilter::INFO)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        bail!("Three arguments required: <I2C bus> <camera address> <settings file>");
    }
    let address: u8 = if args[2].starts_with("0x") {
        let hex_digits = args[2].split_at(2).1;
        u8::from_str_radix(hex_digits, 16)?
    } else {
        args[2].parse()?
    };
    let flash = SharedFlash::new(FileFlash::open(Path::new(&args[3]))?);
    let mut boot_options = Options::default();
    SETTINGS
        .load(&flash, &mut boot_options)
        .context("unable to load settings")?;
    let options = Arc::new(LiveOptions::new(boot_options));

    let bus = I2cdev::new(Path::new(&args[1]))?;
    let camera = Mlx90640::new(bus, address, StdClock::new())?;
    let calibration = Arc::new(camera.calibration().clone());
    let pipeline = Pipeline::start(camera, calibration, print_frame, Arc::clone(&options))?;
    println!("Commands: p (pause), f (frame rate), e (emissivity), s (save), q (quit)");

    for line in io::stdin().lock().lines() {
        match line?.trim() {
            "p" => {
                let paused = pipeline.toggle_pause();
                println!("{}", if paused { "paused" } else { "running" });
            }
            "f" => println!("frame rate: {}", options.cycle_frame_rate()),
            "e" => println!("emissivity: {:.2}", options.cycle_emissivity()),
            "s" => match SETTINGS.save(&flash, &options.snapshot()) {
                Ok(outcome) => println!("saved: {:?}", outcome),
                Err(err) => eprintln!("unable to save settings: {}", err),
            },
            "q" => break,
            "" => {}
            other => eprintln!("unknown command {:?}", other),
        }
    }
    let stats = pipeline.stats();
    pipeline.shutdown()?;
    println!("{:?}", stats);
    Ok(())
}

fn print_frame(frame: ProcessedFrame) {
    println!(
        "center {:6.2}°C  min {:6.2}°C  max {:6.2}°C",
        to_celsius(frame.center()),
        to_celsius(frame.min()),
        to_celsius(frame.max())
    );
}

/// A file pretending to be a NOR flash chip.
#[derive(Debug)]
struct FileFlash {
    file: File,
}

impl FileFlash {
    /// Open (or create) the backing file, padding it out as erased flash.
    fn open(path: &Path) -> anyhow::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("unable to open {}", path.display()))?;
        let length = file.metadata()?.len();
        if length < u64::from(FLASH_SIZE) {
            file.seek(SeekFrom::End(0))?;
            file.write_all(&vec![0xFF; (u64::from(FLASH_SIZE) - length) as usize])?;
        }
        Ok(Self { file })
    }

    fn fill(&mut self, address: u32, length: u32) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(u64::from(address)))?;
        self.file.write_all(&vec![0xFF; length as usize])?;
        self.file.flush()
    }

    fn check(&self, address: u32, length: usize) -> io::Result<()> {
        if u64::from(address) + length as u64 > u64::from(FLASH_SIZE) {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} bytes at {:#x} is past the end of flash", length, address),
            ))
        } else {
            Ok(())
        }
    }
}

impl FlashDevice for FileFlash {
    type Error = io::Error;

    fn size(&self) -> u32 {
        FLASH_SIZE
    }

    fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    fn sector_size(&self) -> u32 {
        SECTOR_SIZE
    }

    fn block_size(&self) -> u32 {
        BLOCK_SIZE
    }

    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.check(address, buffer.len())?;
        self.file.seek(SeekFrom::Start(u64::from(address)))?;
        self.file.read_exact(buffer)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.check(address, data.len())?;
        if (address % PAGE_SIZE) as usize + data.len() > PAGE_SIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "writes can't cross a page boundary",
            ));
        }
        // Programming only clears bits.
        let mut programmed = vec![0u8; data.len()];
        self.read(address, &mut programmed)?;
        programmed
            .iter_mut()
            .zip(data)
            .for_each(|(old, new)| *old &= new);
        self.file.seek(SeekFrom::Start(u64::from(address)))?;
        self.file.write_all(&programmed)?;
        self.file.flush()
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error> {
        self.check(address, SECTOR_SIZE as usize)?;
        self.fill(address - address % SECTOR_SIZE, SECTOR_SIZE)
    }

    fn erase_block(&mut self, address: u32) -> Result<(), Self::Error> {
        self.check(address, BLOCK_SIZE as usize)?;
        self.fill(address - address % BLOCK_SIZE, BLOCK_SIZE)
    }
}
