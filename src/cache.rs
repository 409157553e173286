//! Single-slot write-back block cache shared by every open handle on a volume.

use log::warn;

use crate::block::{Block, BlockDevice};
use crate::config::BLOCK_SIZE;
use crate::error::FatError;

/// Extra copies a resident FAT block is written to on flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Mirror {
    stride: u32,
    copies: u8,
}

pub struct BlockCache<D> {
    device: D,
    data: Block,
    resident: Option<u32>,
    dirty: bool,
    mirror: Option<Mirror>,
}

impl<D: BlockDevice> BlockCache<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            data: [0; BLOCK_SIZE],
            resident: None,
            dirty: false,
            mirror: None,
        }
    }

    pub fn resident(&self) -> Option<u32> {
        self.resident
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Writes made through this bypass the slot.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Drops the slot without writing it back.
    pub fn invalidate(&mut self) {
        self.resident = None;
        self.dirty = false;
        self.mirror = None;
    }

    /// Gives the device back. Pending changes are lost unless [`flush`](Self::flush) ran first.
    pub fn into_inner(self) -> D {
        self.device
    }

    pub fn stage_for_read(&mut self, block: u32) -> Result<&Block, FatError<D::Error>> {
        self.stage(block)?;
        Ok(&self.data)
    }

    pub fn stage_for_write(&mut self, block: u32) -> Result<&mut Block, FatError<D::Error>> {
        self.stage(block)?;
        self.dirty = true;
        Ok(&mut self.data)
    }

    /// Stages a block of the first FAT copy; on flush it is also written to
    /// `block + stride * n` for every further copy `n`.
    pub fn stage_fat_for_write(
        &mut self,
        block: u32,
        stride: u32,
        copies: u8,
    ) -> Result<&mut Block, FatError<D::Error>> {
        self.stage(block)?;
        self.dirty = true;
        if copies > 1 {
            self.mirror = Some(Mirror { stride, copies });
        }
        Ok(&mut self.data)
    }

    /// Makes `block` resident as all zeroes without reading it.
    pub fn zero_block(&mut self, block: u32) -> Result<&mut Block, FatError<D::Error>> {
        if self.resident != Some(block) {
            self.flush()?;
        }
        self.data.fill(0);
        self.resident = Some(block);
        self.dirty = true;
        self.mirror = None;
        Ok(&mut self.data)
    }

    pub fn flush(&mut self) -> Result<(), FatError<D::Error>> {
        if !self.dirty {
            return Ok(());
        }
        let Some(block) = self.resident else {
            self.dirty = false;
            return Ok(());
        };
        if let Err(err) = self.device.write_block(block, &self.data) {
            warn!("sdfat: cache write_error block={} err={:?}", block, err);
            self.invalidate();
            return Err(FatError::Device(err));
        }
        if let Some(mirror) = self.mirror {
            for copy in 1..mirror.copies as u32 {
                let target = block.saturating_add(mirror.stride.saturating_mul(copy));
                if let Err(err) = self.device.write_block(target, &self.data) {
                    warn!("sdfat: cache mirror_error block={} err={:?}", target, err);
                    self.invalidate();
                    return Err(FatError::Device(err));
                }
            }
        }
        self.dirty = false;
        Ok(())
    }

    /// Reads a block straight into `buf`, bypassing the slot.
    pub fn read_uncached(&mut self, block: u32, buf: &mut Block) -> Result<(), FatError<D::Error>> {
        self.device.read_block(block, buf).map_err(|err| {
            warn!("sdfat: cache read_error block={} err={:?}", block, err);
            FatError::Device(err)
        })
    }

    /// Writes a whole block straight to the device. A resident copy of the
    /// same block is discarded since it is now stale.
    pub fn write_uncached(&mut self, block: u32, buf: &Block) -> Result<(), FatError<D::Error>> {
        if self.resident == Some(block) {
            self.invalidate();
        }
        self.device.write_block(block, buf).map_err(|err| {
            warn!("sdfat: cache write_error block={} err={:?}", block, err);
            FatError::Device(err)
        })
    }

    fn stage(&mut self, block: u32) -> Result<(), FatError<D::Error>> {
        if self.resident == Some(block) {
            return Ok(());
        }
        self.flush()?;
        self.mirror = None;
        if let Err(err) = self.device.read_block(block, &mut self.data) {
            warn!("sdfat: cache read_error block={} err={:?}", block, err);
            self.invalidate();
            return Err(FatError::Device(err));
        }
        self.resident = Some(block);
        Ok(())
    }
}
