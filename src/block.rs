//! Raw 512-byte block access.

use core::fmt::Debug;

use embedded_storage::Storage;

use crate::config::BLOCK_SIZE;

pub type Block = [u8; BLOCK_SIZE];

/// Whole-block transfers addressed by linear block number. No partial-block transfers.
pub trait BlockDevice {
    type Error: Debug;

    fn read_block(&mut self, block: u32, buf: &mut Block) -> Result<(), Self::Error>;
    fn write_block(&mut self, block: u32, buf: &Block) -> Result<(), Self::Error>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    type Error = D::Error;

    fn read_block(&mut self, block: u32, buf: &mut Block) -> Result<(), Self::Error> {
        (**self).read_block(block, buf)
    }

    fn write_block(&mut self, block: u32, buf: &Block) -> Result<(), Self::Error> {
        (**self).write_block(block, buf)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StorageBlockError<E> {
    Storage(E),
    OutOfRange(u32),
}

/// Presents an `embedded-storage` region (flash, EEPROM) as a block device.
pub struct StorageBlockDevice<S> {
    storage: S,
    base: u32,
    blocks: u32,
}

impl<S: Storage> StorageBlockDevice<S> {
    /// Uses the whole storage capacity starting at offset 0.
    pub fn new(storage: S) -> Self {
        let blocks = (storage.capacity() / BLOCK_SIZE) as u32;
        Self {
            storage,
            base: 0,
            blocks,
        }
    }

    /// Uses `blocks` blocks starting at byte offset `base`.
    pub fn with_region(storage: S, base: u32, blocks: u32) -> Self {
        Self {
            storage,
            base,
            blocks,
        }
    }

    pub fn block_count(&self) -> u32 {
        self.blocks
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    fn offset(&self, block: u32) -> Result<u32, StorageBlockError<S::Error>> {
        if block >= self.blocks {
            return Err(StorageBlockError::OutOfRange(block));
        }
        block
            .checked_mul(BLOCK_SIZE as u32)
            .and_then(|off| off.checked_add(self.base))
            .ok_or(StorageBlockError::OutOfRange(block))
    }
}

impl<S> BlockDevice for StorageBlockDevice<S>
where
    S: Storage,
    S::Error: Debug,
{
    type Error = StorageBlockError<S::Error>;

    fn read_block(&mut self, block: u32, buf: &mut Block) -> Result<(), Self::Error> {
        let offset = self.offset(block)?;
        self.storage
            .read(offset, buf)
            .map_err(StorageBlockError::Storage)
    }

    fn write_block(&mut self, block: u32, buf: &Block) -> Result<(), Self::Error> {
        let offset = self.offset(block)?;
        self.storage
            .write(offset, buf)
            .map_err(StorageBlockError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_storage::ReadStorage;

    struct ByteStore {
        bytes: [u8; BLOCK_SIZE * 4],
    }

    impl ReadStorage for ByteStore {
        type Error = ();

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), ()> {
            let start = offset as usize;
            bytes.copy_from_slice(&self.bytes[start..start + bytes.len()]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.bytes.len()
        }
    }

    impl Storage for ByteStore {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), ()> {
            let start = offset as usize;
            self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn storage_blocks_map_to_byte_offsets() {
        let mut dev = StorageBlockDevice::new(ByteStore {
            bytes: [0; BLOCK_SIZE * 4],
        });
        assert_eq!(dev.block_count(), 4);

        let block = [0x5Au8; BLOCK_SIZE];
        dev.write_block(2, &block).unwrap();
        let store = dev.into_inner();
        assert!(store.bytes[BLOCK_SIZE * 2..BLOCK_SIZE * 3]
            .iter()
            .all(|&b| b == 0x5A));
        assert!(store.bytes[..BLOCK_SIZE * 2].iter().all(|&b| b == 0));
    }

    #[test]
    fn region_rejects_blocks_past_the_end() {
        let mut dev = StorageBlockDevice::with_region(
            ByteStore {
                bytes: [0; BLOCK_SIZE * 4],
            },
            BLOCK_SIZE as u32,
            2,
        );
        let mut buf = [0u8; BLOCK_SIZE];
        assert!(dev.read_block(1, &mut buf).is_ok());
        assert_eq!(
            dev.read_block(2, &mut buf),
            Err(StorageBlockError::OutOfRange(2))
        );
    }
}
