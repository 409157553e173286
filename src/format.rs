//! Writes an empty FAT12/16/32 file system onto a block device.

use log::info;

use crate::block::{Block, BlockDevice};
use crate::config::{
    BLOCK_SIZE, BOOT_SIGNATURE, DIR_ENTRY_SIZE, FAT12_MAX_CLUSTERS, FAT16_MAX_CLUSTERS,
    MAX_BLOCKS_PER_CLUSTER,
};
use crate::dirent::{self, Attributes, DirEntry};
use crate::error::FatError;
use crate::name::ShortName;
use crate::time::Timestamp;
use crate::volume::FatType;

/// First block of the partition when an MBR is written.
pub const PARTITION_START: u32 = 8;

const MEDIA_FIXED: u8 = 0xF8;
const FAT_COUNT: u8 = 2;
const FAT32_RESERVED: u32 = 32;
const FAT32_FSINFO_BLOCK: u16 = 1;
const FAT32_BACKUP_BOOT_BLOCK: u16 = 6;
const FAT32_ROOT_CLUSTER: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatOptions {
    pub fat_type: FatType,
    /// Size of the whole device.
    pub total_blocks: u32,
    pub blocks_per_cluster: u8,
    /// Write an MBR with one primary partition starting at [`PARTITION_START`].
    pub partitioned: bool,
    pub volume_id: u32,
    /// Also stored as a volume-label entry in the root directory.
    pub volume_label: Option<ShortName>,
}

impl FormatOptions {
    pub fn new(fat_type: FatType, total_blocks: u32, blocks_per_cluster: u8) -> Self {
        Self {
            fat_type,
            total_blocks,
            blocks_per_cluster,
            partitioned: false,
            volume_id: 0x1234_5678,
            volume_label: None,
        }
    }
}

/// Block counts of a planned volume, relative to its start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Layout {
    volume_start: u32,
    volume_blocks: u32,
    reserved: u32,
    blocks_per_fat: u32,
    root_entries: u16,
    root_blocks: u32,
    cluster_count: u32,
}

impl Layout {
    fn fat_start(&self) -> u32 {
        self.volume_start + self.reserved
    }

    fn root_start(&self) -> u32 {
        self.fat_start() + self.blocks_per_fat * FAT_COUNT as u32
    }

    fn data_start(&self) -> u32 {
        self.root_start() + self.root_blocks
    }
}

fn plan<E>(options: &FormatOptions) -> Result<Layout, FatError<E>> {
    let spc = options.blocks_per_cluster;
    if spc == 0 || !spc.is_power_of_two() || spc > MAX_BLOCKS_PER_CLUSTER {
        return Err(FatError::UnsupportedBlocksPerCluster(spc));
    }
    let volume_start = if options.partitioned { PARTITION_START } else { 0 };
    let volume_blocks = options
        .total_blocks
        .checked_sub(volume_start)
        .ok_or(FatError::InvalidGeometry)?;
    let (reserved, root_entries) = match options.fat_type {
        FatType::Fat12 => (1, 224u16),
        FatType::Fat16 => (1, 512),
        FatType::Fat32 => (FAT32_RESERVED, 0),
    };
    let root_blocks = (root_entries as u32 * DIR_ENTRY_SIZE as u32).div_ceil(BLOCK_SIZE as u32);

    let mut blocks_per_fat = 1u32;
    let cluster_count = loop {
        let overhead = reserved + root_blocks + blocks_per_fat * FAT_COUNT as u32;
        let data_blocks = volume_blocks
            .checked_sub(overhead)
            .ok_or(FatError::InvalidGeometry)?;
        let clusters = data_blocks / spc as u32;
        let needed = options
            .fat_type
            .table_bytes(clusters + 2)
            .div_ceil(BLOCK_SIZE as u64) as u32;
        if needed <= blocks_per_fat {
            break clusters;
        }
        blocks_per_fat = needed;
    };

    let fits = match options.fat_type {
        FatType::Fat12 => (1..=FAT12_MAX_CLUSTERS).contains(&cluster_count),
        FatType::Fat16 => (FAT12_MAX_CLUSTERS + 1..=FAT16_MAX_CLUSTERS).contains(&cluster_count),
        FatType::Fat32 => cluster_count > FAT16_MAX_CLUSTERS && cluster_count < 0x0FFF_FFF5,
    };
    if !fits {
        return Err(FatError::InvalidGeometry);
    }

    Ok(Layout {
        volume_start,
        volume_blocks,
        reserved,
        blocks_per_fat,
        root_entries,
        root_blocks,
        cluster_count,
    })
}

/// Formats `device`. Only metadata blocks are written; the data area is left as is
/// apart from the FAT32 root cluster.
pub fn format<D: BlockDevice>(device: &mut D, options: &FormatOptions) -> Result<(), FatError<D::Error>> {
    let layout = plan(options)?;
    let zero = [0u8; BLOCK_SIZE];

    if options.partitioned {
        device
            .write_block(0, &master_boot_record(options, &layout))
            .map_err(FatError::Device)?;
    }

    let boot = boot_sector(options, &layout);
    device
        .write_block(layout.volume_start, &boot)
        .map_err(FatError::Device)?;
    for block in layout.volume_start + 1..layout.fat_start() {
        device.write_block(block, &zero).map_err(FatError::Device)?;
    }
    if options.fat_type == FatType::Fat32 {
        let fsinfo = fs_info(&layout);
        let backup = layout.volume_start + FAT32_BACKUP_BOOT_BLOCK as u32;
        device
            .write_block(layout.volume_start + FAT32_FSINFO_BLOCK as u32, &fsinfo)
            .map_err(FatError::Device)?;
        device.write_block(backup, &boot).map_err(FatError::Device)?;
        device
            .write_block(backup + FAT32_FSINFO_BLOCK as u32, &fsinfo)
            .map_err(FatError::Device)?;
    }

    let first_fat_block = reserved_fat_entries(options.fat_type);
    for copy in 0..FAT_COUNT as u32 {
        let start = layout.fat_start() + copy * layout.blocks_per_fat;
        device
            .write_block(start, &first_fat_block)
            .map_err(FatError::Device)?;
        for block in start + 1..start + layout.blocks_per_fat {
            device.write_block(block, &zero).map_err(FatError::Device)?;
        }
    }

    let (root_start, root_blocks) = if options.fat_type == FatType::Fat32 {
        (layout.data_start(), options.blocks_per_cluster as u32)
    } else {
        (layout.root_start(), layout.root_blocks)
    };
    let mut root = zero;
    if let Some(label) = options.volume_label {
        let mut entry = DirEntry::new(label, Timestamp::DEFAULT);
        entry.attributes = Attributes::VOLUME_ID;
        dirent::store_entry(&mut root, 0, &entry);
    }
    device
        .write_block(root_start, &root)
        .map_err(FatError::Device)?;
    for block in root_start + 1..root_start + root_blocks {
        device.write_block(block, &zero).map_err(FatError::Device)?;
    }

    info!(
        "sdfat: format fat_type={:?} start={} clusters={} blocks_per_fat={}",
        options.fat_type, layout.volume_start, layout.cluster_count, layout.blocks_per_fat
    );
    Ok(())
}

fn master_boot_record(options: &FormatOptions, layout: &Layout) -> Block {
    let mut mbr = [0u8; BLOCK_SIZE];
    let entry = 446;
    mbr[entry] = 0x00;
    mbr[entry + 1..entry + 4].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
    mbr[entry + 4] = match options.fat_type {
        FatType::Fat12 => 0x01,
        FatType::Fat16 => 0x06,
        FatType::Fat32 => 0x0C,
    };
    mbr[entry + 5..entry + 8].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
    mbr[entry + 8..entry + 12].copy_from_slice(&layout.volume_start.to_le_bytes());
    mbr[entry + 12..entry + 16].copy_from_slice(&layout.volume_blocks.to_le_bytes());
    mbr[510..512].copy_from_slice(&BOOT_SIGNATURE);
    mbr
}

fn boot_sector(options: &FormatOptions, layout: &Layout) -> Block {
    let mut boot = [0u8; BLOCK_SIZE];
    let is_fat32 = options.fat_type == FatType::Fat32;
    boot[0..3].copy_from_slice(if is_fat32 {
        &[0xEB, 0x58, 0x90]
    } else {
        &[0xEB, 0x3C, 0x90]
    });
    boot[3..11].copy_from_slice(b"SDFAT   ");
    boot[11..13].copy_from_slice(&(BLOCK_SIZE as u16).to_le_bytes());
    boot[13] = options.blocks_per_cluster;
    boot[14..16].copy_from_slice(&(layout.reserved as u16).to_le_bytes());
    boot[16] = FAT_COUNT;
    boot[17..19].copy_from_slice(&layout.root_entries.to_le_bytes());
    if !is_fat32 && layout.volume_blocks < 0x1_0000 {
        boot[19..21].copy_from_slice(&(layout.volume_blocks as u16).to_le_bytes());
    } else {
        boot[32..36].copy_from_slice(&layout.volume_blocks.to_le_bytes());
    }
    boot[21] = MEDIA_FIXED;
    if !is_fat32 {
        boot[22..24].copy_from_slice(&(layout.blocks_per_fat as u16).to_le_bytes());
    }
    boot[24..26].copy_from_slice(&63u16.to_le_bytes());
    boot[26..28].copy_from_slice(&255u16.to_le_bytes());
    boot[28..32].copy_from_slice(&layout.volume_start.to_le_bytes());

    let label = options
        .volume_label
        .map_or(*b"NO NAME    ", |name| *name.as_bytes());
    let ext = if is_fat32 {
        boot[36..40].copy_from_slice(&layout.blocks_per_fat.to_le_bytes());
        boot[44..48].copy_from_slice(&FAT32_ROOT_CLUSTER.to_le_bytes());
        boot[48..50].copy_from_slice(&FAT32_FSINFO_BLOCK.to_le_bytes());
        boot[50..52].copy_from_slice(&FAT32_BACKUP_BOOT_BLOCK.to_le_bytes());
        64
    } else {
        36
    };
    boot[ext] = 0x80;
    boot[ext + 2] = 0x29;
    boot[ext + 3..ext + 7].copy_from_slice(&options.volume_id.to_le_bytes());
    boot[ext + 7..ext + 18].copy_from_slice(&label);
    boot[ext + 18..ext + 26].copy_from_slice(match options.fat_type {
        FatType::Fat12 => b"FAT12   ",
        FatType::Fat16 => b"FAT16   ",
        FatType::Fat32 => b"FAT32   ",
    });
    boot[510..512].copy_from_slice(&BOOT_SIGNATURE);
    boot
}

fn fs_info(layout: &Layout) -> Block {
    let mut info = [0u8; BLOCK_SIZE];
    info[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
    info[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
    // root directory holds one cluster
    info[488..492].copy_from_slice(&(layout.cluster_count - 1).to_le_bytes());
    info[492..496].copy_from_slice(&(FAT32_ROOT_CLUSTER + 1).to_le_bytes());
    info[508..512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());
    info
}

/// First FAT block: media descriptor entry, reserved entry 1, and the FAT32 root cluster.
fn reserved_fat_entries(fat_type: FatType) -> Block {
    let mut fat = [0u8; BLOCK_SIZE];
    match fat_type {
        FatType::Fat12 => fat[0..3].copy_from_slice(&[MEDIA_FIXED, 0xFF, 0xFF]),
        FatType::Fat16 => fat[0..4].copy_from_slice(&[MEDIA_FIXED, 0xFF, 0xFF, 0xFF]),
        FatType::Fat32 => {
            fat[0..4].copy_from_slice(&(0x0FFF_FF00 | MEDIA_FIXED as u32).to_le_bytes());
            fat[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
            fat[8..12].copy_from_slice(&fat_type.eoc().to_le_bytes());
        }
    }
    fat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_floppy_sized_fat12() {
        let layout = plan::<()>(&FormatOptions::new(FatType::Fat12, 2880, 1)).unwrap();
        assert_eq!(layout.reserved, 1);
        assert_eq!(layout.root_blocks, 14);
        assert_eq!(layout.blocks_per_fat, 9);
        assert_eq!(layout.cluster_count, 2880 - 1 - 14 - 18);
    }

    #[test]
    fn fat_is_large_enough_for_every_cluster() {
        for (fat_type, blocks, spc) in [
            (FatType::Fat12, 2880, 1),
            (FatType::Fat16, 32_768, 4),
            (FatType::Fat32, 70_000, 1),
        ] {
            let layout = plan::<()>(&FormatOptions::new(fat_type, blocks, spc)).unwrap();
            let capacity = layout.blocks_per_fat as u64 * BLOCK_SIZE as u64;
            assert!(fat_type.table_bytes(layout.cluster_count + 2) <= capacity);
            assert!(layout.data_start() + layout.cluster_count * spc as u32 <= blocks);
        }
    }

    #[test]
    fn rejects_cluster_counts_outside_the_fat_type() {
        assert!(matches!(
            plan::<()>(&FormatOptions::new(FatType::Fat16, 2880, 1)),
            Err(FatError::InvalidGeometry)
        ));
        assert!(matches!(
            plan::<()>(&FormatOptions::new(FatType::Fat32, 32_768, 1)),
            Err(FatError::InvalidGeometry)
        ));
        assert!(matches!(
            plan::<()>(&FormatOptions::new(FatType::Fat12, 10, 1)),
            Err(FatError::InvalidGeometry)
        ));
        assert!(matches!(
            plan::<()>(&FormatOptions::new(FatType::Fat12, 2880, 3)),
            Err(FatError::UnsupportedBlocksPerCluster(3))
        ));
    }

    #[test]
    fn fat32_boot_sector_points_at_root_and_fsinfo() {
        let options = FormatOptions::new(FatType::Fat32, 70_000, 1);
        let layout = plan::<()>(&options).unwrap();
        let boot = boot_sector(&options, &layout);
        assert_eq!(&boot[82..90], b"FAT32   ");
        assert_eq!(u32::from_le_bytes([boot[44], boot[45], boot[46], boot[47]]), 2);
        assert_eq!(u16::from_le_bytes([boot[22], boot[23]]), 0);
        assert_eq!(
            u32::from_le_bytes([boot[36], boot[37], boot[38], boot[39]]),
            layout.blocks_per_fat
        );
        assert_eq!(&boot[510..], &BOOT_SIGNATURE);
    }
}
