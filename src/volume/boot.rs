use crate::block::Block;
use crate::config::{
    BLOCK_SHIFT, BLOCK_SIZE, BOOT_SIGNATURE, DIR_ENTRY_SIZE, FAT12_MAX_CLUSTERS,
    FAT16_MAX_CLUSTERS, MAX_BLOCKS_PER_CLUSTER, MIN_PARTITION_BLOCKS,
};
use crate::error::FatError;

use super::{FatType, Geometry, RootDir};

const PARTITION_TABLE: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;

pub(super) fn has_boot_signature(block: &Block) -> bool {
    block[510..512] == BOOT_SIGNATURE
}

/// Start block of MBR primary partition `part` (1..=4).
pub(super) fn partition_start<E>(mbr: &Block, part: u8) -> Result<u32, FatError<E>> {
    if !(1..=4).contains(&part) || !has_boot_signature(mbr) {
        return Err(FatError::NoFatPartition);
    }
    let base = PARTITION_TABLE + (part as usize - 1) * PARTITION_ENTRY_SIZE;
    let status = mbr[base];
    let first_sector = read_u32(mbr, base + 8);
    let total_sectors = read_u32(mbr, base + 12);
    if (status & 0x7F) != 0 || total_sectors < MIN_PARTITION_BLOCKS || first_sector == 0 {
        return Err(FatError::NoFatPartition);
    }
    Ok(first_sector)
}

/// Validates the BIOS parameter block of the volume starting at `volume_start`.
pub(super) fn parse_boot_sector<E>(boot: &Block, volume_start: u32) -> Result<Geometry, FatError<E>> {
    if !has_boot_signature(boot) {
        return Err(FatError::InvalidBootSector);
    }

    let bytes_per_sector = read_u16(boot, 11);
    if bytes_per_sector as usize != BLOCK_SIZE {
        return Err(FatError::UnsupportedBlockSize(bytes_per_sector));
    }

    let blocks_per_cluster = boot[13];
    if blocks_per_cluster == 0
        || !blocks_per_cluster.is_power_of_two()
        || blocks_per_cluster > MAX_BLOCKS_PER_CLUSTER
    {
        return Err(FatError::UnsupportedBlocksPerCluster(blocks_per_cluster));
    }
    let cluster_shift = blocks_per_cluster.trailing_zeros() as u8;

    let reserved = read_u16(boot, 14) as u32;
    let fat_count = boot[16];
    if reserved == 0 || fat_count == 0 {
        return Err(FatError::InvalidBootSector);
    }

    let root_entries = read_u16(boot, 17);
    let fat_size_16 = read_u16(boot, 22) as u32;
    let blocks_per_fat = if fat_size_16 != 0 {
        fat_size_16
    } else {
        read_u32(boot, 36)
    };
    if blocks_per_fat == 0 {
        return Err(FatError::InvalidBootSector);
    }

    let total_16 = read_u16(boot, 19) as u32;
    let total_blocks = if total_16 != 0 {
        total_16
    } else {
        read_u32(boot, 32)
    };

    let fat_start_block = volume_start
        .checked_add(reserved)
        .ok_or(FatError::InvalidGeometry)?;
    let root_start_block = blocks_per_fat
        .checked_mul(fat_count as u32)
        .and_then(|fats| fats.checked_add(fat_start_block))
        .ok_or(FatError::InvalidGeometry)?;
    let root_blocks = (root_entries as u32 * DIR_ENTRY_SIZE as u32).div_ceil(BLOCK_SIZE as u32);
    let data_start_block = root_start_block
        .checked_add(root_blocks)
        .ok_or(FatError::InvalidGeometry)?;

    let used = data_start_block - volume_start;
    if total_blocks <= used {
        return Err(FatError::InvalidGeometry);
    }
    let cluster_count = (total_blocks - used) >> cluster_shift;
    if cluster_count == 0 {
        return Err(FatError::InvalidGeometry);
    }

    let (fat_type, root) = if cluster_count <= FAT12_MAX_CLUSTERS {
        (FatType::Fat12, fixed_root(root_start_block, root_entries)?)
    } else if cluster_count <= FAT16_MAX_CLUSTERS {
        (FatType::Fat16, fixed_root(root_start_block, root_entries)?)
    } else {
        let root_cluster = read_u32(boot, 44);
        if root_cluster < 2 || root_cluster > cluster_count + 1 {
            return Err(FatError::InvalidBootSector);
        }
        (FatType::Fat32, RootDir::Cluster(root_cluster))
    };

    let fat_bytes = fat_type.table_bytes(cluster_count + 2);
    if fat_bytes > (blocks_per_fat as u64) << BLOCK_SHIFT {
        return Err(FatError::InvalidGeometry);
    }

    Ok(Geometry {
        fat_type,
        volume_start_block: volume_start,
        blocks_per_cluster,
        cluster_shift,
        fat_start_block,
        fat_count,
        blocks_per_fat,
        root,
        data_start_block,
        cluster_count,
    })
}

fn fixed_root<E>(start_block: u32, entries: u16) -> Result<RootDir, FatError<E>> {
    if entries == 0 {
        return Err(FatError::InvalidBootSector);
    }
    Ok(RootDir::Fixed {
        start_block,
        entries,
    })
}

fn read_u16(block: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([block[at], block[at + 1]])
}

fn read_u32(block: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([block[at], block[at + 1], block[at + 2], block[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    type Error = FatError<()>;

    fn fat16_boot() -> Block {
        let mut boot = [0u8; BLOCK_SIZE];
        boot[11..13].copy_from_slice(&512u16.to_le_bytes());
        boot[13] = 4;
        boot[14..16].copy_from_slice(&1u16.to_le_bytes());
        boot[16] = 2;
        boot[17..19].copy_from_slice(&512u16.to_le_bytes());
        boot[19..21].copy_from_slice(&40_000u16.to_le_bytes());
        boot[22..24].copy_from_slice(&40u16.to_le_bytes());
        boot[510..512].copy_from_slice(&BOOT_SIGNATURE);
        boot
    }

    #[test]
    fn derives_fat16_layout() {
        let geometry = parse_boot_sector::<()>(&fat16_boot(), 0).unwrap();
        assert_eq!(geometry.fat_type, FatType::Fat16);
        assert_eq!(geometry.fat_start_block, 1);
        assert_eq!(
            geometry.root,
            RootDir::Fixed {
                start_block: 81,
                entries: 512
            }
        );
        assert_eq!(geometry.data_start_block, 113);
        assert_eq!(geometry.cluster_count, (40_000 - 113) / 4);
        assert_eq!(geometry.cluster_shift, 2);
    }

    #[test]
    fn offsets_layout_by_volume_start() {
        let geometry = parse_boot_sector::<()>(&fat16_boot(), 63).unwrap();
        assert_eq!(geometry.fat_start_block, 64);
        assert_eq!(geometry.data_start_block, 176);
    }

    #[test]
    fn rejects_broken_parameter_blocks() {
        let mut boot = fat16_boot();
        boot[511] = 0;
        assert!(matches!(parse_boot_sector::<()>(&boot, 0), Err(Error::InvalidBootSector)));

        let mut boot = fat16_boot();
        boot[11..13].copy_from_slice(&1024u16.to_le_bytes());
        assert!(matches!(
            parse_boot_sector::<()>(&boot, 0),
            Err(Error::UnsupportedBlockSize(1024))
        ));

        let mut boot = fat16_boot();
        boot[13] = 3;
        assert!(matches!(
            parse_boot_sector::<()>(&boot, 0),
            Err(Error::UnsupportedBlocksPerCluster(3))
        ));

        let mut boot = fat16_boot();
        boot[16] = 0;
        assert!(matches!(parse_boot_sector::<()>(&boot, 0), Err(Error::InvalidBootSector)));

        let mut boot = fat16_boot();
        boot[22..24].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(parse_boot_sector::<()>(&boot, 0), Err(Error::InvalidGeometry)));
    }

    #[test]
    fn reads_partition_entries() {
        let mut mbr = [0u8; BLOCK_SIZE];
        mbr[510..512].copy_from_slice(&BOOT_SIGNATURE);
        let entry = PARTITION_TABLE;
        mbr[entry] = 0x80;
        mbr[entry + 4] = 0x06;
        mbr[entry + 8..entry + 12].copy_from_slice(&2048u32.to_le_bytes());
        mbr[entry + 12..entry + 16].copy_from_slice(&50_000u32.to_le_bytes());
        assert_eq!(partition_start::<()>(&mbr, 1).unwrap(), 2048);
        assert!(partition_start::<()>(&mbr, 2).is_err());
        assert!(partition_start::<()>(&mbr, 5).is_err());

        mbr[entry] = 0x01;
        assert!(partition_start::<()>(&mbr, 1).is_err());
        mbr[entry] = 0x00;
        mbr[entry + 12..entry + 16].copy_from_slice(&99u32.to_le_bytes());
        assert!(partition_start::<()>(&mbr, 1).is_err());
    }
}
