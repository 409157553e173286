use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local, Timelike};
use sdfat::{Block, BlockDevice, DateTime, TimeSource, Timestamp};

const BLOCK_BYTES: u64 = 512;

/// Disk image file seen as a block device.
pub struct ImageDevice {
    file: File,
    blocks: u32,
}

impl ImageDevice {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open image {}", path.display()))?;
        let len = file.metadata()?.len();
        if len % BLOCK_BYTES != 0 {
            bail!("{}: size {len} is not a multiple of 512", path.display());
        }
        let blocks = u32::try_from(len / BLOCK_BYTES)
            .with_context(|| format!("{}: image too large", path.display()))?;
        Ok(Self { file, blocks })
    }

    /// Creates (or truncates) a zero-filled image of `blocks` blocks.
    pub fn create(path: &Path, blocks: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("create image {}", path.display()))?;
        file.set_len(blocks as u64 * BLOCK_BYTES)?;
        Ok(Self { file, blocks })
    }

    pub fn block_count(&self) -> u32 {
        self.blocks
    }

    fn seek_to(&mut self, block: u32) -> io::Result<()> {
        if block >= self.blocks {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("block {block} past end of image ({} blocks)", self.blocks),
            ));
        }
        self.file.seek(SeekFrom::Start(block as u64 * BLOCK_BYTES))?;
        Ok(())
    }
}

impl BlockDevice for ImageDevice {
    type Error = io::Error;

    fn read_block(&mut self, block: u32, buf: &mut Block) -> io::Result<()> {
        self.seek_to(block)?;
        self.file.read_exact(buf)
    }

    fn write_block(&mut self, block: u32, buf: &Block) -> io::Result<()> {
        self.seek_to(block)?;
        self.file.write_all(buf)
    }
}

/// Local wall-clock time. Yields nothing outside the years FAT can store.
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now(&mut self) -> Option<Timestamp> {
        let now = Local::now();
        let stamp = DateTime {
            year: u16::try_from(now.year()).ok()?,
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second().min(59) as u8,
        };
        stamp.is_valid().then(|| stamp.to_timestamp())
    }
}
