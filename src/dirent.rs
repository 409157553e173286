//! 32-byte short directory entry codec.

use bitflags::bitflags;

use crate::block::Block;
use crate::config::{DIR_ENTRY_SIZE, DIR_NAME_DELETED, DIR_NAME_FREE};
use crate::name::ShortName;
use crate::time::Timestamp;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        /// Marks a long-name fragment.
        const LONG_NAME = 0x0F;
    }
}

/// Byte offsets inside a directory entry.
mod offset {
    pub const NAME: usize = 0;
    pub const ATTRIBUTES: usize = 11;
    pub const RESERVED_NT: usize = 12;
    pub const CREATION_TENTHS: usize = 13;
    pub const CREATION_TIME: usize = 14;
    pub const CREATION_DATE: usize = 16;
    pub const LAST_ACCESS_DATE: usize = 18;
    pub const FIRST_CLUSTER_HIGH: usize = 20;
    pub const LAST_WRITE_TIME: usize = 22;
    pub const LAST_WRITE_DATE: usize = 24;
    pub const FIRST_CLUSTER_LOW: usize = 26;
    pub const FILE_SIZE: usize = 28;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: ShortName,
    pub attributes: Attributes,
    pub reserved_nt: u8,
    pub creation_tenths: u8,
    pub creation: Timestamp,
    pub last_access_date: u16,
    pub first_cluster: u32,
    pub last_write: Timestamp,
    pub file_size: u32,
}

impl DirEntry {
    /// A fresh entry: every stamp set to `stamp`, no attributes, no clusters.
    pub fn new(name: ShortName, stamp: Timestamp) -> Self {
        Self {
            name,
            attributes: Attributes::empty(),
            reserved_nt: 0,
            creation_tenths: 0,
            creation: stamp,
            last_access_date: stamp.date,
            first_cluster: 0,
            last_write: stamp,
            file_size: 0,
        }
    }

    pub fn parse(raw: &[u8; DIR_ENTRY_SIZE]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[offset::NAME..offset::NAME + 11]);
        let high = read_u16(raw, offset::FIRST_CLUSTER_HIGH) as u32;
        let low = read_u16(raw, offset::FIRST_CLUSTER_LOW) as u32;
        Self {
            name: ShortName::from_raw(name),
            attributes: Attributes::from_bits_retain(raw[offset::ATTRIBUTES]),
            reserved_nt: raw[offset::RESERVED_NT],
            creation_tenths: raw[offset::CREATION_TENTHS],
            creation: Timestamp {
                date: read_u16(raw, offset::CREATION_DATE),
                time: read_u16(raw, offset::CREATION_TIME),
            },
            last_access_date: read_u16(raw, offset::LAST_ACCESS_DATE),
            first_cluster: (high << 16) | low,
            last_write: Timestamp {
                date: read_u16(raw, offset::LAST_WRITE_DATE),
                time: read_u16(raw, offset::LAST_WRITE_TIME),
            },
            file_size: u32::from_le_bytes([
                raw[offset::FILE_SIZE],
                raw[offset::FILE_SIZE + 1],
                raw[offset::FILE_SIZE + 2],
                raw[offset::FILE_SIZE + 3],
            ]),
        }
    }

    pub fn write_to(&self, raw: &mut [u8; DIR_ENTRY_SIZE]) {
        raw[offset::NAME..offset::NAME + 11].copy_from_slice(self.name.as_bytes());
        raw[offset::ATTRIBUTES] = self.attributes.bits();
        raw[offset::RESERVED_NT] = self.reserved_nt;
        raw[offset::CREATION_TENTHS] = self.creation_tenths;
        write_u16(raw, offset::CREATION_TIME, self.creation.time);
        write_u16(raw, offset::CREATION_DATE, self.creation.date);
        write_u16(raw, offset::LAST_ACCESS_DATE, self.last_access_date);
        write_u16(raw, offset::FIRST_CLUSTER_HIGH, (self.first_cluster >> 16) as u16);
        write_u16(raw, offset::LAST_WRITE_TIME, self.last_write.time);
        write_u16(raw, offset::LAST_WRITE_DATE, self.last_write.date);
        write_u16(raw, offset::FIRST_CLUSTER_LOW, self.first_cluster as u16);
        raw[offset::FILE_SIZE..offset::FILE_SIZE + 4].copy_from_slice(&self.file_size.to_le_bytes());
    }

    pub fn is_subdir(&self) -> bool {
        self.attributes & (Attributes::DIRECTORY | Attributes::VOLUME_ID) == Attributes::DIRECTORY
    }

    pub fn is_file(&self) -> bool {
        !self
            .attributes
            .intersects(Attributes::DIRECTORY | Attributes::VOLUME_ID)
    }

    pub fn is_file_or_subdir(&self) -> bool {
        !self.attributes.contains(Attributes::VOLUME_ID)
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes.contains(Attributes::READ_ONLY)
    }
}

/// State of a raw slot judged by its first name byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Never used; no live entries follow.
    Free,
    Deleted,
    Used,
}

pub fn slot_state(first: u8) -> SlotState {
    match first {
        DIR_NAME_FREE => SlotState::Free,
        DIR_NAME_DELETED => SlotState::Deleted,
        _ => SlotState::Used,
    }
}

/// Copy of the `index`-th raw entry of a directory block.
pub fn raw_entry(block: &Block, index: usize) -> [u8; DIR_ENTRY_SIZE] {
    let start = index * DIR_ENTRY_SIZE;
    let mut raw = [0u8; DIR_ENTRY_SIZE];
    raw.copy_from_slice(&block[start..start + DIR_ENTRY_SIZE]);
    raw
}

pub fn read_entry(block: &Block, index: usize) -> DirEntry {
    DirEntry::parse(&raw_entry(block, index))
}

pub fn store_raw_entry(block: &mut Block, index: usize, raw: &[u8; DIR_ENTRY_SIZE]) {
    let start = index * DIR_ENTRY_SIZE;
    block[start..start + DIR_ENTRY_SIZE].copy_from_slice(raw);
}

pub fn store_entry(block: &mut Block, index: usize, entry: &DirEntry) {
    let mut raw = [0u8; DIR_ENTRY_SIZE];
    entry.write_to(&mut raw);
    store_raw_entry(block, index, &raw);
}

fn read_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

fn write_u16(raw: &mut [u8], at: usize, value: u16) {
    raw[at..at + 2].copy_from_slice(&value.to_le_bytes());
}
