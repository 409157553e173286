pub const BLOCK_SIZE: usize = 512;
pub const BLOCK_SHIFT: u32 = 9;
pub const DIR_ENTRY_SIZE: usize = 32;
pub const DIR_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

/// First byte of a slot that ends the directory.
pub const DIR_NAME_FREE: u8 = 0x00;
/// First byte of a deleted, reusable slot.
pub const DIR_NAME_DELETED: u8 = 0xE5;

/// Stamp used for new entries when no time source is registered: 2000-01-01 01:00:00.
pub const DEFAULT_DATE: u16 = ((2000 - 1980) << 9) | (1 << 5) | 1;
pub const DEFAULT_TIME: u16 = 1 << 11;

pub const MAX_BLOCKS_PER_CLUSTER: u8 = 128;
pub const MIN_PARTITION_BLOCKS: u32 = 100;

pub const FAT12_MAX_CLUSTERS: u32 = 4_084;
pub const FAT16_MAX_CLUSTERS: u32 = 65_524;

pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
