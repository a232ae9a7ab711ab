//! Ogg page checksum: CRC-32, polynomial 0x04C11DB7, zero initial value,
//! unreflected, no final XOR.

const POLYNOMIAL: u32 = 0x04c1_1db7;

const CRC_TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ POLYNOMIAL
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

/// Continue a running checksum over `data`.
pub fn update(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[usize::from((crc >> 24) as u8 ^ byte)]
    })
}

pub fn checksum(data: &[u8]) -> u32 {
    update(0, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // CRC-32/CKSUM check value without its final inversion.
        assert_eq!(checksum(b"123456789"), 0x765e_7680 ^ 0xffff_ffff);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = b"OggS page split across two updates";
        let (head, tail) = data.split_at(11);
        assert_eq!(update(update(0, head), tail), checksum(data));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(checksum(&[]), 0);
    }
}
