use log::{debug, warn};

use crate::block::BlockDevice;
use crate::config::{BLOCK_SHIFT, DIR_ENTRY_SIZE, DIR_NAME_DELETED};
use crate::dirent::{self, Attributes, SlotState};
use crate::error::FatError;
use crate::name::ShortName;
use crate::time::{DateTime, TimeSource};
use crate::volume::Volume;

use super::{File, FileKind, OpenFlags, StampFields};

impl File {
    /// Shrinks the file to `length` bytes, releasing clusters past it.
    pub fn truncate<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        length: u32,
    ) -> Result<(), FatError<D::Error>> {
        self.check_open()?;
        if self.kind != FileKind::Normal {
            return Err(FatError::IsADirectory);
        }
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(FatError::AccessDenied);
        }
        if length > self.file_size {
            return Err(FatError::InvalidSize);
        }
        if self.first_cluster == 0 {
            return Ok(());
        }
        let result = self.truncate_inner(vol, length);
        self.track(result)
    }

    fn truncate_inner<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        length: u32,
    ) -> Result<(), FatError<D::Error>> {
        let new_position = self.cur_position.min(length);
        self.seek_inner(vol, length)?;

        if length == 0 {
            vol.free_chain(self.first_cluster)?;
            self.first_cluster = 0;
        } else {
            let next = vol.fat_get(self.cur_cluster)?;
            if !vol.is_eoc(next) {
                vol.free_chain(next)?;
                vol.fat_put_eoc(self.cur_cluster)?;
            }
        }
        self.file_size = length;
        self.dir_dirty = true;
        self.sync_inner(vol)?;
        self.seek_inner(vol, new_position)
    }

    /// Truncates to zero, marks the entry deleted and closes the handle.
    pub fn remove<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        self.truncate(vol, 0)?;
        let result = self.unlink(vol);
        self.track(result)
    }

    fn unlink<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        let block = vol.cache.stage_for_write(self.dir_block)?;
        block[self.dir_index as usize * DIR_ENTRY_SIZE] = DIR_NAME_DELETED;
        *self = Self::new();
        vol.flush()
    }

    /// Removes file `name` from `dir`.
    pub fn remove_in<D: BlockDevice, T: TimeSource>(
        vol: &mut Volume<D, T>,
        dir: &mut File,
        name: &str,
    ) -> Result<(), FatError<D::Error>> {
        let mut file = File::new();
        file.open(vol, dir, name, OpenFlags::WRITE)?;
        file.remove(vol)
    }

    /// Removes an empty subdirectory.
    pub fn rm_dir<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        self.check_open()?;
        if self.kind != FileKind::SubDir {
            return Err(if self.is_root() {
                FatError::IsRoot
            } else {
                FatError::NotADirectory
            });
        }
        let result = self.ensure_empty(vol);
        self.track(result)?;

        self.kind = FileKind::Normal;
        self.flags |= OpenFlags::WRITE;
        self.remove(vol)
    }

    fn ensure_empty<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        self.rewind();
        while let Some(slot) = self.next_dir_slot(vol)? {
            let block = vol.cache.stage_for_read(slot.block)?;
            let entry = dirent::read_entry(block, slot.index);
            match dirent::slot_state(entry.name.as_bytes()[0]) {
                SlotState::Free => break,
                SlotState::Deleted => continue,
                SlotState::Used => {}
            }
            if !entry.name.is_dot() && entry.is_file_or_subdir() {
                return Err(FatError::DirectoryNotEmpty);
            }
        }
        Ok(())
    }

    /// Deletes everything below this directory, then the directory itself unless it is the root.
    pub fn rm_rf_star<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        self.check_open()?;
        if !self.is_dir() {
            return Err(FatError::NotADirectory);
        }
        self.rewind();
        while self.cur_position < self.file_size {
            let index = self.cur_position / DIR_ENTRY_SIZE as u32;
            let result = self.next_dir_slot(vol).and_then(|slot| {
                let slot = slot.ok_or(FatError::ChainTooShort)?;
                let block = vol.cache.stage_for_read(slot.block)?;
                Ok(dirent::read_entry(block, slot.index))
            });
            let entry = self.track(result)?;
            match dirent::slot_state(entry.name.as_bytes()[0]) {
                SlotState::Free => break,
                SlotState::Deleted => continue,
                SlotState::Used => {}
            }
            if entry.name.is_dot() || !entry.is_file_or_subdir() {
                continue;
            }

            let mut child = File::new();
            child.open_index(vol, self, index as u16, OpenFlags::READ)?;
            if child.is_subdir() {
                child.rm_rf_star(vol)?;
            } else {
                child.flags |= OpenFlags::WRITE;
                child.remove(vol)?;
            }

            let next = (index + 1) * DIR_ENTRY_SIZE as u32;
            if self.cur_position != next {
                let result = self.seek_inner(vol, next);
                self.track(result)?;
            }
        }
        if self.is_root() {
            return Ok(());
        }
        self.rm_dir(vol)
    }

    /// Creates subdirectory `name` in `dir` and leaves this handle open on it.
    pub fn make_dir<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        dir: &mut File,
        name: &str,
    ) -> Result<(), FatError<D::Error>> {
        self.open(vol, dir, name, OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::RDWR)?;
        self.flags = OpenFlags::READ;
        self.kind = FileKind::SubDir;
        let parent_cluster = if dir.is_root() { 0 } else { dir.first_cluster };
        let result = self.init_dir(vol, parent_cluster);
        self.track(result)
    }

    fn init_dir<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        parent_cluster: u32,
    ) -> Result<(), FatError<D::Error>> {
        self.add_dir_cluster(vol)?;
        self.sync_inner(vol)?;

        let block = vol.cache.stage_for_write(self.dir_block)?;
        let mut entry = dirent::read_entry(block, self.dir_index as usize);
        entry.attributes = Attributes::DIRECTORY;
        dirent::store_entry(block, self.dir_index as usize, &entry);

        let first_block = vol.cluster_start_block(self.first_cluster);
        let block = vol.cache.stage_for_write(first_block)?;
        entry.name = ShortName::DOT;
        dirent::store_entry(block, 0, &entry);
        entry.name = ShortName::DOT_DOT;
        entry.first_cluster = parent_cluster;
        dirent::store_entry(block, 1, &entry);

        self.cur_position = 2 * DIR_ENTRY_SIZE as u32;
        vol.flush()
    }

    /// Creates `name` in `dir` backed by one contiguous run of clusters covering `size` bytes.
    pub fn create_contiguous<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        dir: &mut File,
        name: &str,
        size: u32,
    ) -> Result<(), FatError<D::Error>> {
        if size == 0 {
            return Err(FatError::InvalidSize);
        }
        self.open(vol, dir, name, OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::RDWR)?;

        let shift = vol.cluster_size_shift() as u32 + BLOCK_SHIFT;
        let count = ((size - 1) >> shift) + 1;
        match vol.allocate_contiguous(count, None) {
            Ok(first) => self.first_cluster = first,
            Err(err) => {
                if let Err(cleanup) = self.remove(vol) {
                    warn!("sdfat: create_contiguous cleanup_failed err={:?}", cleanup);
                }
                return Err(err);
            }
        }
        self.file_size = size;
        self.dir_dirty = true;
        debug!("sdfat: contiguous first={} clusters={}", self.first_cluster, count);
        self.sync(vol)
    }

    /// First and last block of the file when its clusters form one run.
    pub fn contiguous_range<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(u32, u32), FatError<D::Error>> {
        self.check_open()?;
        if self.first_cluster == 0 {
            return Err(FatError::NotContiguous);
        }
        let result = self.contiguous_inner(vol);
        self.track(result)
    }

    fn contiguous_inner<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(u32, u32), FatError<D::Error>> {
        let mut cluster = self.first_cluster;
        let mut visited = 0u32;
        loop {
            visited += 1;
            if visited > vol.cluster_count() {
                return Err(FatError::ClusterChainTooLong);
            }
            match vol.next_cluster(cluster)? {
                None => break,
                Some(next) if next == cluster + 1 => cluster = next,
                Some(_) => return Err(FatError::NotContiguous),
            }
        }
        let bgn = vol.cluster_start_block(self.first_cluster);
        let end = vol.cluster_start_block(cluster) + vol.blocks_per_cluster() as u32 - 1;
        Ok((bgn, end))
    }

    /// Moves this file's entry to `new_name` in `dir`. The handle stays open on the new entry.
    pub fn rename<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        dir: &mut File,
        new_name: &str,
    ) -> Result<(), FatError<D::Error>> {
        self.check_open()?;
        if self.is_root() {
            return Err(FatError::IsRoot);
        }
        let result = self.sync_inner(vol);
        self.track(result)?;

        let mut target = File::new();
        target.open(
            vol,
            dir,
            new_name,
            OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRITE,
        )?;
        let parent_cluster = if dir.is_root() { 0 } else { dir.first_cluster };
        let result = self.move_entry(vol, &target, parent_cluster);
        self.track(result)
    }

    fn move_entry<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        target: &File,
        parent_cluster: u32,
    ) -> Result<(), FatError<D::Error>> {
        let block = vol.cache.stage_for_read(self.dir_block)?;
        let old = dirent::raw_entry(block, self.dir_index as usize);

        let block = vol.cache.stage_for_write(target.dir_block)?;
        let mut moved = dirent::raw_entry(block, target.dir_index as usize);
        moved[11..].copy_from_slice(&old[11..]);
        dirent::store_raw_entry(block, target.dir_index as usize, &moved);

        let block = vol.cache.stage_for_write(self.dir_block)?;
        block[self.dir_index as usize * DIR_ENTRY_SIZE] = DIR_NAME_DELETED;

        self.dir_block = target.dir_block;
        self.dir_index = target.dir_index;

        if self.kind == FileKind::SubDir {
            let first_block = vol.cluster_start_block(self.first_cluster);
            let block = vol.cache.stage_for_write(first_block)?;
            let mut dot_dot = dirent::read_entry(block, 1);
            dot_dot.first_cluster = parent_cluster;
            dirent::store_entry(block, 1, &dot_dot);
        }
        vol.flush()
    }

    /// Sets the selected stamps of this entry to `when`.
    pub fn timestamp<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        fields: StampFields,
        when: DateTime,
    ) -> Result<(), FatError<D::Error>> {
        self.check_open()?;
        if self.is_root() {
            return Err(FatError::IsRoot);
        }
        if !when.is_valid() {
            return Err(FatError::InvalidTimestamp);
        }
        let result = self.stamp_inner(vol, fields, when);
        self.track(result)
    }

    fn stamp_inner<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        fields: StampFields,
        when: DateTime,
    ) -> Result<(), FatError<D::Error>> {
        self.sync_inner(vol)?;
        let stamp = when.to_timestamp();
        let block = vol.cache.stage_for_write(self.dir_block)?;
        let index = self.dir_index as usize;
        let mut entry = dirent::read_entry(block, index);
        if fields.contains(StampFields::ACCESS) {
            entry.last_access_date = stamp.date;
        }
        if fields.contains(StampFields::CREATE) {
            entry.creation = stamp;
            entry.creation_tenths = if when.second & 1 == 1 { 100 } else { 0 };
        }
        if fields.contains(StampFields::WRITE) {
            entry.last_write = stamp;
        }
        dirent::store_entry(block, index, &entry);
        vol.flush()
    }
}
