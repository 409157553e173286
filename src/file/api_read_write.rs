use core::cmp;

use crate::block::BlockDevice;
use crate::config::{BLOCK_SHIFT, BLOCK_SIZE, DIR_ENTRY_SIZE};
use crate::dirent::{self, DirEntry, SlotState};
use crate::error::FatError;
use crate::time::TimeSource;
use crate::volume::{RootDir, Volume};

use super::{File, FileKind, OpenFlags};

impl File {
    /// Block holding the byte at the position. Steps `cur_cluster` forward one
    /// link when the position sits on a cluster boundary.
    pub(super) fn position_block<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<u32, FatError<D::Error>> {
        if self.kind == FileKind::Root16 {
            let RootDir::Fixed { start_block, .. } = vol.root_dir() else {
                return Err(FatError::InvalidGeometry);
            };
            return Ok(start_block + (self.cur_position >> BLOCK_SHIFT));
        }
        let block_of_cluster = vol.block_of_cluster(self.cur_position);
        let offset = self.cur_position as usize & (BLOCK_SIZE - 1);
        if offset == 0 && block_of_cluster == 0 {
            self.cur_cluster = if self.cur_position == 0 {
                self.first_cluster
            } else {
                vol.next_cluster(self.cur_cluster)?
                    .ok_or(FatError::ChainTooShort)?
            };
        }
        Ok(vol.cluster_start_block(self.cur_cluster) + block_of_cluster)
    }

    /// Reads up to `buf.len()` bytes from the position. Returns 0 at end of file.
    pub fn read<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        buf: &mut [u8],
    ) -> Result<usize, FatError<D::Error>> {
        self.check_open()?;
        if !self.flags.contains(OpenFlags::READ) {
            return Err(FatError::AccessDenied);
        }
        let result = self.read_inner(vol, buf);
        self.track(result)
    }

    fn read_inner<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        buf: &mut [u8],
    ) -> Result<usize, FatError<D::Error>> {
        let n = cmp::min(buf.len(), self.available() as usize);
        let mut done = 0usize;
        while done < n {
            let offset = self.cur_position as usize & (BLOCK_SIZE - 1);
            let block = self.position_block(vol)?;
            let chunk = cmp::min(BLOCK_SIZE - offset, n - done);
            let dst = &mut buf[done..done + chunk];
            match dst.first_chunk_mut::<BLOCK_SIZE>() {
                Some(whole) if vol.cache.resident() != Some(block) => {
                    vol.cache.read_uncached(block, whole)?;
                }
                _ => {
                    let data = vol.cache.stage_for_read(block)?;
                    dst.copy_from_slice(&data[offset..offset + chunk]);
                }
            }
            self.cur_position += chunk as u32;
            done += chunk;
        }
        Ok(n)
    }

    /// Writes `buf` at the position, growing the chain as needed.
    ///
    /// The new size reaches the directory entry on `sync`/`close`, or right
    /// away with SYNC.
    pub fn write<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        buf: &[u8],
    ) -> Result<usize, FatError<D::Error>> {
        self.check_open()?;
        if self.kind != FileKind::Normal {
            return Err(FatError::IsADirectory);
        }
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(FatError::AccessDenied);
        }
        let end_size = if self.flags.contains(OpenFlags::APPEND) {
            self.file_size
        } else {
            self.cur_position
        };
        if u32::try_from(buf.len())
            .ok()
            .and_then(|len| end_size.checked_add(len))
            .is_none()
        {
            return Err(FatError::FileTooLarge);
        }
        let result = self.write_inner(vol, buf);
        if result.is_err() && self.cur_position > self.file_size {
            // keep the bytes that reached the device
            self.file_size = self.cur_position;
            self.dir_dirty = true;
        }
        self.track(result)
    }

    fn write_inner<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
        buf: &[u8],
    ) -> Result<usize, FatError<D::Error>> {
        if self.flags.contains(OpenFlags::APPEND) && self.cur_position != self.file_size {
            self.seek_inner(vol, self.file_size)?;
        }

        let mut done = 0usize;
        while done < buf.len() {
            let block_of_cluster = vol.block_of_cluster(self.cur_position);
            let offset = self.cur_position as usize & (BLOCK_SIZE - 1);
            if offset == 0 && block_of_cluster == 0 {
                if self.cur_cluster == 0 {
                    if self.first_cluster == 0 {
                        self.add_cluster(vol)?;
                    } else {
                        self.cur_cluster = self.first_cluster;
                    }
                } else {
                    match vol.next_cluster(self.cur_cluster)? {
                        Some(next) => self.cur_cluster = next,
                        None => self.add_cluster(vol)?,
                    }
                }
            }

            let block = vol.cluster_start_block(self.cur_cluster) + block_of_cluster;
            let chunk = cmp::min(BLOCK_SIZE - offset, buf.len() - done);
            let src = &buf[done..done + chunk];
            if let Some(whole) = src.first_chunk::<BLOCK_SIZE>() {
                vol.cache.write_uncached(block, whole)?;
            } else {
                let data = if offset == 0 && self.cur_position >= self.file_size {
                    // block starts at or past end of file
                    vol.cache.zero_block(block)?
                } else {
                    vol.cache.stage_for_write(block)?
                };
                data[offset..offset + chunk].copy_from_slice(src);
            }
            self.cur_position += chunk as u32;
            done += chunk;
        }

        if self.cur_position > self.file_size {
            self.file_size = self.cur_position;
            self.dir_dirty = true;
        } else if !buf.is_empty() && vol.clock.has_time() {
            self.dir_dirty = true;
        }

        if self.flags.contains(OpenFlags::SYNC) {
            self.sync_inner(vol)?;
        }
        Ok(buf.len())
    }

    /// Next file or subdirectory entry, skipping deleted, dot and volume-label
    /// slots. `None` at end of directory.
    pub fn read_dir<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<Option<DirEntry>, FatError<D::Error>> {
        self.check_open()?;
        if !self.is_dir() {
            return Err(FatError::NotADirectory);
        }
        if self.cur_position as usize % DIR_ENTRY_SIZE != 0 {
            return Err(FatError::Misaligned);
        }
        let result = self.read_dir_inner(vol);
        self.track(result)
    }

    fn read_dir_inner<D: BlockDevice, T: TimeSource>(
        &mut self,
        vol: &mut Volume<D, T>,
    ) -> Result<Option<DirEntry>, FatError<D::Error>> {
        while let Some(slot) = self.next_dir_slot(vol)? {
            let block = vol.cache.stage_for_read(slot.block)?;
            let entry = dirent::read_entry(block, slot.index);
            match dirent::slot_state(entry.name.as_bytes()[0]) {
                SlotState::Free => return Ok(None),
                SlotState::Deleted => continue,
                SlotState::Used => {}
            }
            if entry.name.is_dot() || !entry.is_file_or_subdir() {
                continue;
            }
            return Ok(Some(entry));
        }
        Ok(None)
    }
}
