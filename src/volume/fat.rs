//! FAT chain walker: cluster addressing, entry access and allocation.

use log::{debug, warn};

use crate::block::BlockDevice;
use crate::config::{BLOCK_SHIFT, BLOCK_SIZE};
use crate::error::FatError;
use crate::time::TimeSource;

use super::{FatType, Volume};

impl<D: BlockDevice, T: TimeSource> Volume<D, T> {
    /// First block of `cluster`. No I/O.
    pub fn cluster_start_block(&self, cluster: u32) -> u32 {
        self.geometry.data_start_block
            + (cluster.wrapping_sub(2) << self.geometry.cluster_shift)
    }

    /// Index within its cluster of the block holding byte `position`.
    pub fn block_of_cluster(&self, position: u32) -> u32 {
        (position >> BLOCK_SHIFT) & (self.geometry.blocks_per_cluster as u32 - 1)
    }

    /// Bytes per cluster.
    pub fn cluster_bytes(&self) -> u32 {
        (BLOCK_SIZE as u32) << self.geometry.cluster_shift
    }

    pub fn is_eoc(&self, value: u32) -> bool {
        value >= self.geometry.fat_type.eoc_min()
    }

    fn check_cluster(&self, cluster: u32) -> Result<(), FatError<D::Error>> {
        if cluster < 2 || cluster > self.geometry.cluster_count + 1 {
            return Err(FatError::BadCluster(cluster));
        }
        Ok(())
    }

    /// Raw FAT entry for `cluster`.
    pub fn fat_get(&mut self, cluster: u32) -> Result<u32, FatError<D::Error>> {
        if cluster > self.geometry.cluster_count + 1 {
            return Err(FatError::BadCluster(cluster));
        }
        let fat_start = self.geometry.fat_start_block;
        match self.geometry.fat_type {
            FatType::Fat12 => {
                let index = cluster + (cluster >> 1);
                let mut block = fat_start + (index >> BLOCK_SHIFT);
                let mut offset = (index as usize) & (BLOCK_SIZE - 1);
                let low = self.cache.stage_for_read(block)?[offset] as u16;
                offset += 1;
                if offset == BLOCK_SIZE {
                    block += 1;
                    offset = 0;
                }
                let high = self.cache.stage_for_read(block)?[offset] as u16;
                let pair = low | (high << 8);
                Ok(if cluster & 1 == 1 {
                    (pair >> 4) as u32
                } else {
                    (pair & 0x0FFF) as u32
                })
            }
            FatType::Fat16 => {
                let block = fat_start + (cluster >> 8);
                let at = ((cluster & 0xFF) as usize) * 2;
                let data = self.cache.stage_for_read(block)?;
                Ok(u16::from_le_bytes([data[at], data[at + 1]]) as u32)
            }
            FatType::Fat32 => {
                let block = fat_start + (cluster >> 7);
                let at = ((cluster & 0x7F) as usize) * 4;
                let data = self.cache.stage_for_read(block)?;
                let raw = u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
                Ok(raw & 0x0FFF_FFFF)
            }
        }
    }

    /// Stores `value` in the FAT entry for `cluster`. Every FAT copy gets it on flush.
    pub fn fat_put(&mut self, cluster: u32, value: u32) -> Result<(), FatError<D::Error>> {
        self.check_cluster(cluster)?;
        let fat_start = self.geometry.fat_start_block;
        let stride = self.geometry.blocks_per_fat;
        let copies = self.geometry.fat_count;
        match self.geometry.fat_type {
            FatType::Fat12 => {
                let odd = cluster & 1 == 1;
                let index = cluster + (cluster >> 1);
                let mut block = fat_start + (index >> BLOCK_SHIFT);
                let mut offset = (index as usize) & (BLOCK_SIZE - 1);
                let mut pair = (value & 0x0FFF) as u16;

                let data = self.cache.stage_fat_for_write(block, stride, copies)?;
                if odd {
                    pair = (pair << 4) | (data[offset] & 0x0F) as u16;
                }
                data[offset] = pair as u8;
                offset += 1;
                if offset == BLOCK_SIZE {
                    block += 1;
                    offset = 0;
                }
                let high = (pair >> 8) as u8;
                let data = self.cache.stage_fat_for_write(block, stride, copies)?;
                data[offset] = if odd {
                    high
                } else {
                    (data[offset] & 0xF0) | (high & 0x0F)
                };
            }
            FatType::Fat16 => {
                let block = fat_start + (cluster >> 8);
                let at = ((cluster & 0xFF) as usize) * 2;
                let data = self.cache.stage_fat_for_write(block, stride, copies)?;
                data[at..at + 2].copy_from_slice(&(value as u16).to_le_bytes());
            }
            FatType::Fat32 => {
                let block = fat_start + (cluster >> 7);
                let at = ((cluster & 0x7F) as usize) * 4;
                let data = self.cache.stage_fat_for_write(block, stride, copies)?;
                let old = u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
                let new = (old & 0xF000_0000) | (value & 0x0FFF_FFFF);
                data[at..at + 4].copy_from_slice(&new.to_le_bytes());
            }
        }
        Ok(())
    }

    pub fn fat_put_eoc(&mut self, cluster: u32) -> Result<(), FatError<D::Error>> {
        self.fat_put(cluster, self.geometry.fat_type.eoc())
    }

    /// Follows one link. `None` at end-of-chain; a free, reserved or
    /// out-of-range link is corruption.
    pub fn next_cluster(&mut self, cluster: u32) -> Result<Option<u32>, FatError<D::Error>> {
        let value = self.fat_get(cluster)?;
        if self.is_eoc(value) {
            return Ok(None);
        }
        if value < 2 || value > self.geometry.cluster_count + 1 {
            warn!("sdfat: chain corrupt cluster={} link={:#x}", cluster, value);
            return Err(FatError::BadCluster(value));
        }
        Ok(Some(value))
    }

    /// Byte size of the chain starting at `cluster`.
    pub fn chain_size(&mut self, cluster: u32) -> Result<u32, FatError<D::Error>> {
        self.check_cluster(cluster)?;
        let mut count = 0u32;
        let mut current = cluster;
        loop {
            count += 1;
            if count > self.geometry.cluster_count {
                return Err(FatError::ClusterChainTooLong);
            }
            match self.next_cluster(current)? {
                Some(next) => current = next,
                None => break,
            }
        }
        count
            .checked_mul(self.cluster_bytes())
            .ok_or(FatError::FileTooLarge)
    }

    /// Finds `count` consecutive free clusters, links them into a chain ending
    /// in end-of-chain and returns the first one.
    ///
    /// With `link`, the search starts right after that cluster and the run is
    /// appended to it. Otherwise it starts at the allocation cursor.
    pub fn allocate_contiguous(
        &mut self,
        count: u32,
        link: Option<u32>,
    ) -> Result<u32, FatError<D::Error>> {
        if count == 0 {
            return Err(FatError::InvalidSize);
        }
        let cluster_count = self.geometry.cluster_count;
        if count > cluster_count {
            return Err(FatError::NoFreeCluster);
        }
        let last_cluster = cluster_count + 1;
        let (mut bgn, advance_cursor) = match link {
            Some(tail) => (tail + 1, false),
            None => (self.alloc_cursor, count == 1),
        };
        if bgn < 2 || bgn > last_cluster {
            bgn = 2;
        }

        // Enough steps to wrap once and still finish a run that started before `bgn`.
        let max_steps = cluster_count + count;
        let mut end = bgn;
        let mut steps = 0u32;
        loop {
            if steps >= max_steps {
                debug!("sdfat: alloc failed count={}", count);
                return Err(FatError::NoFreeCluster);
            }
            steps += 1;
            if end > last_cluster {
                bgn = 2;
                end = 2;
            }
            if self.fat_get(end)? != 0 {
                bgn = end + 1;
            } else if end - bgn + 1 == count {
                break;
            }
            end += 1;
        }

        self.fat_put_eoc(end)?;
        let mut cluster = end;
        while cluster > bgn {
            self.fat_put(cluster - 1, cluster)?;
            cluster -= 1;
        }
        if let Some(tail) = link {
            self.fat_put(tail, bgn)?;
        }
        if advance_cursor {
            self.alloc_cursor = bgn + 1;
        }
        debug!("sdfat: alloc count={} first={}", count, bgn);
        Ok(bgn)
    }

    /// Marks every cluster of the chain starting at `cluster` free.
    pub fn free_chain(&mut self, cluster: u32) -> Result<(), FatError<D::Error>> {
        self.check_cluster(cluster)?;
        if cluster < self.alloc_cursor {
            self.alloc_cursor = cluster;
        }
        let first = cluster;
        let mut current = cluster;
        let mut freed = 0u32;
        loop {
            freed += 1;
            if freed > self.geometry.cluster_count {
                return Err(FatError::ClusterChainTooLong);
            }
            let next = self.fat_get(current)?;
            self.fat_put(current, 0)?;
            if self.is_eoc(next) {
                break;
            }
            if let Err(err) = self.check_cluster(next) {
                warn!("sdfat: chain corrupt cluster={} link={:#x}", current, next);
                return Err(err);
            }
            current = next;
        }
        debug!("sdfat: free_chain first={} clusters={}", first, freed);
        Ok(())
    }

    /// Counts free clusters by scanning the whole FAT.
    pub fn free_cluster_count(&mut self) -> Result<u32, FatError<D::Error>> {
        let mut free = 0u32;
        for cluster in 2..=self.geometry.cluster_count + 1 {
            if self.fat_get(cluster)? == 0 {
                free += 1;
            }
        }
        Ok(free)
    }
}
