//! Directory/file engine: per-handle state over the shared volume cache.

mod api_mutate;
mod api_read_write;
mod dir_scan;
#[cfg(test)]
mod tests;

use bitflags::bitflags;
use log::warn;

use crate::block::BlockDevice;
use crate::dirent::{self, DirEntry};
use crate::error::FatError;
use crate::time::TimeSource;
use crate::volume::Volume;

bitflags! {
    /// Open mode. Only READ, WRITE, APPEND and SYNC stay on the handle.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct OpenFlags: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const RDWR = Self::READ.bits() | Self::WRITE.bits();
        /// Every write positions at end of file first.
        const APPEND = 0x04;
        /// Commit the directory entry after every write.
        const SYNC = 0x08;
        const CREAT = 0x10;
        /// With CREAT: fail if the name exists.
        const EXCL = 0x20;
        const TRUNC = 0x40;
    }
}

impl OpenFlags {
    const KEPT: Self = Self::RDWR.union(Self::APPEND).union(Self::SYNC);

    fn validate<E>(self) -> Result<(), FatError<E>> {
        if !self.intersects(Self::RDWR) {
            return Err(FatError::InvalidFlags);
        }
        let needs_write = Self::CREAT | Self::TRUNC | Self::APPEND;
        if self.intersects(needs_write) && !self.contains(Self::WRITE) {
            return Err(FatError::InvalidFlags);
        }
        if self.contains(Self::EXCL) && !self.contains(Self::CREAT) {
            return Err(FatError::InvalidFlags);
        }
        Ok(())
    }
}

bitflags! {
    /// Stamps updated by [`File::timestamp`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct StampFields: u8 {
        const ACCESS = 0x01;
        const CREATE = 0x02;
        const WRITE = 0x04;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    Closed,
    Open,
    /// A device or corruption error hit this handle; only `close` is accepted.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Normal,
    /// FAT12/16 root: a fixed block range, no clusters.
    Root16,
    Root32,
    SubDir,
}

/// An open file or directory. Every operation borrows the volume it was opened on.
#[derive(Clone, Debug)]
pub struct File {
    state: HandleState,
    kind: FileKind,
    flags: OpenFlags,
    dir_dirty: bool,
    first_cluster: u32,
    cur_cluster: u32,
    cur_position: u32,
    file_size: u32,
    dir_block: u32,
    dir_index: u8,
}

impl Default for File {
    fn default() -> Self {
        Self::new()
    }
}

impl File {
    pub const fn new() -> Self {
        Self {
            state: HandleState::Closed,
            kind: FileKind::Normal,
            flags: OpenFlags::empty(),
            dir_dirty: false,
            first_cluster: 0,
            cur_cluster: 0,
            cur_position: 0,
            file_size: 0,
            dir_block: 0,
            dir_index: 0,
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != HandleState::Closed
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_file(&self) -> bool {
        self.is_open() && self.kind == FileKind::Normal
    }

    pub fn is_dir(&self) -> bool {
        self.is_open() && self.kind != FileKind::Normal
    }

    pub fn is_subdir(&self) -> bool {
        self.is_open() && self.kind == FileKind::SubDir
    }

    pub fn is_root(&self) -> bool {
        self.is_open() && matches!(self.kind, FileKind::Root16 | FileKind::Root32)
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn cur_position(&self) -> u32 {
        self.cur_position
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    pub fn cur_cluster(&self) -> u32 {
        self.cur_cluster
    }

    /// Bytes between the position and end of file.
    pub fn available(&self) -> u32 {
        self.file_size.saturating_sub(self.cur_position)
    }

    /// Block and slot of this handle's own directory entry.
    pub fn dir_location(&self) -> (u32, u8) {
        (self.dir_block, self.dir_index)
    }

    pub fn rewind(&mut self) {
        self.cur_position = 0;
        self.cur_cluster = 0;
    }

    fn check_open<E>(&self) -> Result<(), FatError<E>> {
        match self.state {
            HandleState::Open => Ok(()),
            HandleState::Closed => Err(FatError::NotOpen),
            HandleState::Failed => Err(FatError::HandleFailed),
        }
    }

    /// Moves the handle into `Failed` when `result` is a device or corruption error.
    fn track<R, E: core::fmt::Debug>(&mut self, result: Result<R, FatError<E>>) -> Result<R, FatError<E>> {
        if let Err(err) = &result {
            if err.is_fatal() && self.state == HandleState::Open {
                warn!("sdfat: handle failed err={:?}", err);
                self.state = HandleState::Failed;
            }
        }
        result
    }

    pub fn seek_set<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        pos: u32,
    ) -> Result<(), FatError<D::Error>> {
        self.check_open()?;
        let result = self.seek_inner(vol, pos);
        self.track(result)
    }

    /// Seeks relative to the current position.
    pub fn seek_cur<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        offset: i32,
    ) -> Result<(), FatError<D::Error>> {
        let pos = self
            .cur_position
            .checked_add_signed(offset)
            .ok_or(FatError::SeekOutOfRange)?;
        self.seek_set(vol, pos)
    }

    /// Seeks relative to end of file.
    pub fn seek_end<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        offset: i32,
    ) -> Result<(), FatError<D::Error>> {
        let pos = self
            .file_size
            .checked_add_signed(offset)
            .ok_or(FatError::SeekOutOfRange)?;
        self.seek_set(vol, pos)
    }

    fn seek_inner<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        pos: u32,
    ) -> Result<(), FatError<D::Error>> {
        if pos > self.file_size {
            return Err(FatError::SeekOutOfRange);
        }
        if self.kind == FileKind::Root16 {
            self.cur_position = pos;
            return Ok(());
        }
        if pos == 0 {
            self.rewind();
            return Ok(());
        }

        let shift = vol.cluster_size_shift() as u32 + crate::config::BLOCK_SHIFT;
        let n_cur = self.cur_position.wrapping_sub(1) >> shift;
        let mut n_new = (pos - 1) >> shift;
        if n_new < n_cur || self.cur_position == 0 {
            self.cur_cluster = self.first_cluster;
        } else {
            n_new -= n_cur;
        }
        while n_new > 0 {
            self.cur_cluster = vol
                .next_cluster(self.cur_cluster)?
                .ok_or(FatError::ChainTooShort)?;
            n_new -= 1;
        }
        self.cur_position = pos;
        Ok(())
    }

    /// Writes a pending size, first cluster and modification stamp to the
    /// directory entry, then flushes the cache.
    pub fn sync<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        self.check_open()?;
        let result = self.sync_inner(vol);
        self.track(result)
    }

    fn sync_inner<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        if self.dir_dirty {
            let stamp = vol.clock.now();
            let block = vol.cache.stage_for_write(self.dir_block)?;
            let index = self.dir_index as usize;
            let mut entry = dirent::read_entry(block, index);
            if !self.is_dir() {
                entry.file_size = self.file_size;
            }
            entry.first_cluster = self.first_cluster;
            if let Some(stamp) = stamp {
                entry.last_write = stamp;
                entry.last_access_date = stamp.date;
            }
            dirent::store_entry(block, index, &entry);
            self.dir_dirty = false;
        }
        vol.flush()
    }

    /// Syncs and closes. A failed handle closes without touching the device.
    pub fn close<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<(), FatError<D::Error>> {
        let result = match self.state {
            HandleState::Closed => return Err(FatError::NotOpen),
            HandleState::Failed => Ok(()),
            HandleState::Open => self.sync_inner(vol),
        };
        self.state = HandleState::Closed;
        self.dir_dirty = false;
        result
    }

    /// Copy of this handle's directory entry after a sync.
    pub fn dir_entry<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<DirEntry, FatError<D::Error>> {
        self.check_open()?;
        if self.is_root() {
            return Err(FatError::IsRoot);
        }
        let result = self.sync_inner(vol).and_then(|()| {
            let block = vol.cache.stage_for_read(self.dir_block)?;
            Ok(dirent::read_entry(block, self.dir_index as usize))
        });
        self.track(result)
    }

    pub fn short_name<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<crate::name::ShortName, FatError<D::Error>> {
        self.dir_entry(vol).map(|entry| entry.name)
    }
}
