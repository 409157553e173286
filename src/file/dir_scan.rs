use log::debug;

use crate::block::BlockDevice;
use crate::config::{DIR_ENTRY_SIZE, DIR_ENTRIES_PER_BLOCK};
use crate::dirent::{self, Attributes, DirEntry, SlotState};
use crate::error::FatError;
use crate::name::ShortName;
use crate::time::TimeSource;
use crate::volume::{RootDir, Volume};

use super::{File, FileKind, HandleState, OpenFlags};

/// Location of one directory slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct Slot {
    pub block: u32,
    pub index: usize,
}

impl File {
    /// Opens the root directory read-only.
    pub fn open_root<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        if self.is_open() {
            return Err(FatError::AlreadyOpen);
        }
        let (kind, first_cluster, file_size) = match vol.root_dir() {
            RootDir::Fixed { entries, .. } => {
                (FileKind::Root16, 0, entries as u32 * DIR_ENTRY_SIZE as u32)
            }
            RootDir::Cluster(cluster) => (FileKind::Root32, cluster, vol.chain_size(cluster)?),
        };
        *self = Self {
            state: HandleState::Open,
            kind,
            flags: OpenFlags::READ,
            first_cluster,
            file_size,
            ..Self::new()
        };
        Ok(())
    }

    /// Opens `name` in directory `dir`.
    ///
    /// The directory is scanned from its start. With CREAT a missing name is
    /// created in the first free or deleted slot, growing the directory by one
    /// cluster when it has none. CREAT|EXCL fails on an existing name.
    pub fn open<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        dir: &mut File,
        name: &str,
        flags: OpenFlags,
    ) -> Result<(), FatError<D::Error>> {
        if self.is_open() {
            return Err(FatError::AlreadyOpen);
        }
        flags.validate()?;
        dir.check_open()?;
        if !dir.is_dir() {
            return Err(FatError::NotADirectory);
        }
        let name = ShortName::new(name).map_err(|_| FatError::InvalidName)?;
        let found = dir.find_or_create(vol, &name, flags);
        let slot = dir.track(found)?;
        self.open_cached_entry(vol, slot, flags)
    }

    /// Slot holding `name` in this directory, created when CREAT allows it.
    fn find_or_create<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        name: &ShortName,
        flags: OpenFlags,
    ) -> Result<Slot, FatError<D::Error>> {
        self.rewind();
        let mut empty: Option<Slot> = None;
        while let Some(slot) = self.next_dir_slot(vol)? {
            let block = vol.cache.stage_for_read(slot.block)?;
            let raw = dirent::raw_entry(block, slot.index);
            match dirent::slot_state(raw[0]) {
                state @ (SlotState::Free | SlotState::Deleted) => {
                    if empty.is_none() {
                        empty = Some(slot);
                    }
                    if state == SlotState::Free {
                        break;
                    }
                }
                SlotState::Used => {
                    let attributes = Attributes::from_bits_retain(raw[11]);
                    if raw[..11] == name.as_bytes()[..]
                        && !attributes.contains(Attributes::VOLUME_ID)
                    {
                        if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                            return Err(FatError::AlreadyExists);
                        }
                        return Ok(slot);
                    }
                }
            }
        }

        if !flags.contains(OpenFlags::CREAT) {
            return Err(FatError::NotFound);
        }
        let slot = match empty {
            Some(slot) => slot,
            None => {
                if self.kind == FileKind::Root16 {
                    return Err(FatError::DirectoryFull);
                }
                self.add_dir_cluster(vol)?;
                Slot {
                    block: vol.cluster_start_block(self.cur_cluster),
                    index: 0,
                }
            }
        };

        let entry = DirEntry::new(*name, vol.timestamp());
        let block = vol.cache.stage_for_write(slot.block)?;
        dirent::store_entry(block, slot.index, &entry);
        vol.flush()?;
        debug!("sdfat: create name={} block={} index={}", name, slot.block, slot.index);
        Ok(slot)
    }

    /// Opens the entry at slot `index` of `dir`. Free, deleted and dot entries are rejected.
    pub fn open_index<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        dir: &mut File,
        index: u16,
        flags: OpenFlags,
    ) -> Result<(), FatError<D::Error>> {
        if self.is_open() {
            return Err(FatError::AlreadyOpen);
        }
        flags.validate()?;
        if flags.intersects(OpenFlags::CREAT | OpenFlags::EXCL) {
            return Err(FatError::InvalidFlags);
        }
        dir.check_open()?;
        if !dir.is_dir() {
            return Err(FatError::NotADirectory);
        }
        let result = dir
            .seek_inner(vol, index as u32 * DIR_ENTRY_SIZE as u32)
            .and_then(|()| dir.next_dir_slot(vol));
        let slot = dir.track(result)?.ok_or(FatError::NotFound)?;
        let block = vol.cache.stage_for_read(slot.block)?;
        let first = block[slot.index * DIR_ENTRY_SIZE];
        if dirent::slot_state(first) != SlotState::Used {
            return Err(FatError::NotFound);
        }
        if first == b'.' {
            return Err(FatError::NotAFile);
        }
        self.open_cached_entry(vol, slot, flags)
    }

    pub(super) fn open_cached_entry<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        slot: Slot,
        flags: OpenFlags,
    ) -> Result<(), FatError<D::Error>> {
        let block = vol.cache.stage_for_read(slot.block)?;
        let entry = dirent::read_entry(block, slot.index);

        if entry.attributes.intersects(Attributes::READ_ONLY | Attributes::DIRECTORY)
            && flags.intersects(OpenFlags::WRITE | OpenFlags::TRUNC)
        {
            return Err(if entry.is_subdir() {
                FatError::IsADirectory
            } else {
                FatError::ReadOnly
            });
        }

        let (kind, file_size) = if entry.is_file() {
            (FileKind::Normal, entry.file_size)
        } else if entry.is_subdir() {
            if entry.first_cluster == 0 {
                // `..` of a first-level directory
                return self.open_root(vol);
            }
            (FileKind::SubDir, vol.chain_size(entry.first_cluster)?)
        } else {
            return Err(FatError::NotAFile);
        };

        *self = Self {
            state: HandleState::Open,
            kind,
            flags: flags & OpenFlags::KEPT,
            first_cluster: entry.first_cluster,
            file_size,
            dir_block: slot.block,
            dir_index: slot.index as u8,
            ..Self::new()
        };
        if flags.contains(OpenFlags::TRUNC) {
            return self.truncate(vol, 0);
        }
        Ok(())
    }

    /// Location of the slot at the position, advancing past it. `None` at end of directory.
    pub(super) fn next_dir_slot<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<Option<Slot>, FatError<D::Error>> {
        if self.cur_position >= self.file_size {
            return Ok(None);
        }
        let index = (self.cur_position as usize / DIR_ENTRY_SIZE) % DIR_ENTRIES_PER_BLOCK;
        let block = self.position_block(vol)?;
        self.cur_position += DIR_ENTRY_SIZE as u32;
        Ok(Some(Slot { block, index }))
    }

    /// Appends one cluster to the chain and makes it current.
    pub(super) fn add_cluster<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        let link = (self.cur_cluster != 0).then_some(self.cur_cluster);
        self.cur_cluster = vol.allocate_contiguous(1, link)?;
        if self.first_cluster == 0 {
            self.first_cluster = self.cur_cluster;
            self.dir_dirty = true;
        }
        Ok(())
    }

    /// Grows a directory by one zeroed cluster. The cluster's first block is left resident.
    pub(super) fn add_dir_cluster<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        let cluster_bytes = vol.cluster_bytes();
        let new_size = self
            .file_size
            .checked_add(cluster_bytes)
            .ok_or(FatError::DirectoryFull)?;
        self.add_cluster(vol)?;
        let start = vol.cluster_start_block(self.cur_cluster);
        for offset in (0..vol.blocks_per_cluster() as u32).rev() {
            vol.cache.zero_block(start + offset)?;
        }
        self.file_size = new_size;
        debug!("sdfat: dir_grow cluster={} size={}", self.cur_cluster, new_size);
        Ok(())
    }
}
