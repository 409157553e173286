#![allow(dead_code)]

use std::collections::BTreeMap;

use sdfat::{format, Block, BlockDevice, File, FatType, FormatOptions, NoClock, Volume};

pub const BLOCK_SIZE: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskError {
    OutOfRange(u32),
    Injected(u32),
}

/// Sparse in-memory disk. All-zero blocks are not stored.
#[derive(Default)]
pub struct RamDisk {
    blocks: BTreeMap<u32, Box<Block>>,
    pub total_blocks: u32,
    pub reads: usize,
    pub writes: usize,
    /// Fail reads of these blocks.
    pub bad_reads: Vec<u32>,
    /// Fail every write once this many more writes succeeded.
    pub writes_before_failure: Option<usize>,
}

impl RamDisk {
    pub fn new(total_blocks: u32) -> Self {
        Self {
            total_blocks,
            ..Self::default()
        }
    }

    pub fn formatted(fat_type: FatType, total_blocks: u32, blocks_per_cluster: u8) -> Self {
        let mut disk = Self::new(total_blocks);
        let options = FormatOptions::new(fat_type, total_blocks, blocks_per_cluster);
        format(&mut disk, &options).unwrap();
        disk.reset_counters();
        disk
    }

    pub fn block(&self, block: u32) -> Block {
        self.blocks.get(&block).map_or([0; BLOCK_SIZE], |b| **b)
    }

    pub fn reset_counters(&mut self) {
        self.reads = 0;
        self.writes = 0;
    }
}

impl BlockDevice for RamDisk {
    type Error = DiskError;

    fn read_block(&mut self, block: u32, buf: &mut Block) -> Result<(), DiskError> {
        if block >= self.total_blocks {
            return Err(DiskError::OutOfRange(block));
        }
        if self.bad_reads.contains(&block) {
            return Err(DiskError::Injected(block));
        }
        self.reads += 1;
        *buf = self.block(block);
        Ok(())
    }

    fn write_block(&mut self, block: u32, buf: &Block) -> Result<(), DiskError> {
        if block >= self.total_blocks {
            return Err(DiskError::OutOfRange(block));
        }
        if let Some(left) = self.writes_before_failure.as_mut() {
            if *left == 0 {
                return Err(DiskError::Injected(block));
            }
            *left -= 1;
        }
        self.writes += 1;
        if buf.iter().all(|&b| b == 0) {
            self.blocks.remove(&block);
        } else {
            self.blocks.insert(block, Box::new(*buf));
        }
        Ok(())
    }
}

pub fn fat12() -> Volume<RamDisk> {
    Volume::mount(RamDisk::formatted(FatType::Fat12, 2880, 1), NoClock).unwrap()
}

pub fn fat16() -> Volume<RamDisk> {
    Volume::mount(RamDisk::formatted(FatType::Fat16, 32_768, 4), NoClock).unwrap()
}

pub fn fat32() -> Volume<RamDisk> {
    Volume::mount(RamDisk::formatted(FatType::Fat32, 70_000, 1), NoClock).unwrap()
}

pub fn all_types() -> Vec<Volume<RamDisk>> {
    vec![fat12(), fat16(), fat32()]
}

pub fn open_root(vol: &mut Volume<RamDisk>) -> File {
    let mut root = File::new();
    root.open_root(vol).unwrap();
    root
}

/// Deterministic test payload.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
        .collect()
}
