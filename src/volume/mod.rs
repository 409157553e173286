//! A mounted FAT volume: geometry, the shared block cache and the FAT chain walker.

mod boot;
mod fat;

use log::{debug, info};

use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::error::FatError;
use crate::time::{NoClock, TimeSource, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    /// Bytes needed for `entries` FAT entries.
    pub fn table_bytes(self, entries: u32) -> u64 {
        let entries = entries as u64;
        match self {
            FatType::Fat12 => (entries * 3).div_ceil(2),
            FatType::Fat16 => entries * 2,
            FatType::Fat32 => entries * 4,
        }
    }

    /// Value written to terminate a chain.
    pub fn eoc(self) -> u32 {
        match self {
            FatType::Fat12 => 0x0FFF,
            FatType::Fat16 => 0xFFFF,
            FatType::Fat32 => 0x0FFF_FFFF,
        }
    }

    /// Lowest value read back as end-of-chain.
    pub fn eoc_min(self) -> u32 {
        match self {
            FatType::Fat12 => 0x0FF8,
            FatType::Fat16 => 0xFFF8,
            FatType::Fat32 => 0x0FFF_FFF8,
        }
    }
}

/// Where the root directory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootDir {
    /// FAT12/16: a fixed run of blocks that cannot grow.
    Fixed { start_block: u32, entries: u16 },
    /// FAT32: an ordinary cluster chain.
    Cluster(u32),
}

/// Layout fixed at mount time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub fat_type: FatType,
    pub volume_start_block: u32,
    pub blocks_per_cluster: u8,
    /// log2 of `blocks_per_cluster`.
    pub cluster_shift: u8,
    pub fat_start_block: u32,
    pub fat_count: u8,
    pub blocks_per_fat: u32,
    pub root: RootDir,
    pub data_start_block: u32,
    pub cluster_count: u32,
}

pub struct Volume<D, T = NoClock> {
    pub(crate) cache: BlockCache<D>,
    pub(crate) clock: T,
    geometry: Geometry,
    /// Next cluster a single-cluster allocation starts searching from.
    alloc_cursor: u32,
}

impl<D: BlockDevice, T: TimeSource> Volume<D, T> {
    /// Mounts MBR partition 1, falling back to an unpartitioned volume.
    ///
    /// Pass `&mut device` to keep the device when mounting fails.
    pub fn mount(device: D, clock: T) -> Result<Self, FatError<D::Error>> {
        let mut cache = BlockCache::new(device);
        let geometry = match probe(&mut cache, 1) {
            Ok(geometry) => geometry,
            Err(err) => {
                debug!("sdfat: mount partition=1 err={err:?}, trying whole device");
                probe(&mut cache, 0)?
            }
        };
        Ok(Self::with_geometry(cache, clock, geometry))
    }

    /// Mounts partition `part` of the MBR, or the whole device when `part` is 0.
    pub fn mount_partition(device: D, part: u8, clock: T) -> Result<Self, FatError<D::Error>> {
        let mut cache = BlockCache::new(device);
        let geometry = probe(&mut cache, part)?;
        Ok(Self::with_geometry(cache, clock, geometry))
    }

    fn with_geometry(mut cache: BlockCache<D>, clock: T, geometry: Geometry) -> Self {
        cache.invalidate();
        info!(
            "sdfat: mount fat_type={:?} start={} clusters={} blocks_per_cluster={}",
            geometry.fat_type,
            geometry.volume_start_block,
            geometry.cluster_count,
            geometry.blocks_per_cluster
        );
        Self {
            cache,
            clock,
            geometry,
            alloc_cursor: 2,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn fat_type(&self) -> FatType {
        self.geometry.fat_type
    }

    pub fn blocks_per_cluster(&self) -> u8 {
        self.geometry.blocks_per_cluster
    }

    pub fn cluster_size_shift(&self) -> u8 {
        self.geometry.cluster_shift
    }

    pub fn cluster_count(&self) -> u32 {
        self.geometry.cluster_count
    }

    pub fn fat_start_block(&self) -> u32 {
        self.geometry.fat_start_block
    }

    pub fn fat_count(&self) -> u8 {
        self.geometry.fat_count
    }

    pub fn blocks_per_fat(&self) -> u32 {
        self.geometry.blocks_per_fat
    }

    pub fn root_dir(&self) -> RootDir {
        self.geometry.root
    }

    pub fn data_start_block(&self) -> u32 {
        self.geometry.data_start_block
    }

    pub fn device(&self) -> &D {
        self.cache.device()
    }

    /// Raw device access. Flush first; the cached block is not updated.
    pub fn device_mut(&mut self) -> &mut D {
        self.cache.device_mut()
    }

    pub fn clock_mut(&mut self) -> &mut T {
        &mut self.clock
    }

    /// Stamp for a new entry: the clock reading, or the fixed default.
    pub(crate) fn timestamp(&mut self) -> Timestamp {
        self.clock.now().unwrap_or(Timestamp::DEFAULT)
    }

    /// Writes back the resident block if dirty.
    pub fn flush(&mut self) -> Result<(), FatError<D::Error>> {
        self.cache.flush()
    }

    /// Flushes and hands the device back.
    pub fn into_device(mut self) -> Result<D, FatError<D::Error>> {
        self.cache.flush()?;
        Ok(self.cache.into_inner())
    }
}

fn probe<D: BlockDevice>(cache: &mut BlockCache<D>, part: u8) -> Result<Geometry, FatError<D::Error>> {
    let volume_start = if part == 0 {
        0
    } else {
        let mbr = cache.stage_for_read(0)?;
        boot::partition_start(mbr, part)?
    };
    let block = cache.stage_for_read(volume_start)?;
    boot::parse_boot_sector(block, volume_start)
}
