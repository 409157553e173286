/// Card capacity from the CSD register, `None` for an unknown CSD structure.
pub(crate) fn decode_capacity_bytes(csd: &[u8; 16]) -> Option<u64> {
    match csd_get_bits(csd, 127, 126) {
        0 => {
            // CSD v1.0 (SDSC)
            let c_size = csd_get_bits(csd, 73, 62) as u64;
            let c_size_mult = csd_get_bits(csd, 49, 47);
            let read_bl_len = csd_get_bits(csd, 83, 80);

            let block_len = 1u64.checked_shl(read_bl_len)?;
            let mult = 1u64.checked_shl(c_size_mult + 2)?;
            (c_size + 1).checked_mul(mult)?.checked_mul(block_len)
        }
        1 => {
            // CSD v2.0 (SDHC/SDXC)
            let c_size = csd_get_bits(csd, 69, 48) as u64;
            (c_size + 1).checked_mul(512 * 1024)
        }
        _ => None,
    }
}

/// Bits `msb..=lsb` of the big-endian 128-bit register.
pub(crate) fn csd_get_bits(csd: &[u8; 16], msb: u8, lsb: u8) -> u32 {
    let mut value = 0u32;
    for bit in (lsb..=msb).rev() {
        let byte = csd[(127 - bit) as usize / 8];
        value = (value << 1) | ((byte >> (bit % 8)) & 1) as u32;
    }
    value
}
