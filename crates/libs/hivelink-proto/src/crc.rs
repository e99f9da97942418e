//! CRC-16/CCITT-FALSE.
//!
//! Polynomial 0x1021, init 0xFFFF, no reflection, no final xor.
//! `"123456789"` checksums to `0x29B1`.

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

static TABLE: [u16; 256] = build_table();

/// Remainder of `index` shifted into the top byte, eight rounds of the divisor.
const fn table_entry(index: u8) -> u16 {
    let mut remainder = (index as u16) << 8;
    let mut round = 0;
    while round < 8 {
        let carry = remainder & 0x8000 != 0;
        remainder <<= 1;
        if carry {
            remainder ^= POLY;
        }
        round += 1;
    }
    remainder
}

const fn build_table() -> [u16; 256] {
    let mut table = [0; 256];
    let mut index = 0;
    while index < table.len() {
        table[index] = table_entry(index as u8);
        index += 1;
    }
    table
}

#[must_use]
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    crc16_ccitt_update(INIT, data)
}

/// Continue a running checksum over more bytes.
#[must_use]
pub fn crc16_ccitt_update(crc: u16, data: &[u8]) -> u16 {
    data.iter().fold(crc, |crc, &byte| {
        let [high, _] = crc.to_be_bytes();
        (crc << 8) ^ TABLE[usize::from(high ^ byte)]
    })
}

/// Checksum of `parts` as if they were concatenated.
#[must_use]
pub fn crc16_ccitt_parts(parts: &[&[u8]]) -> u16 {
    parts.iter().fold(INIT, |crc, part| crc16_ccitt_update(crc, part))
}
