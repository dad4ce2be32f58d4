//! Dallas/Maxim CRC-8 used on the 1-wire bus.
//!
//! Polynomial x^8 + x^5 + x^4 + 1, processed LSB first (`0x8c` reflected),
//! seed 0.

const CRC8_POLY: u8 = 0x8c;

#[cfg(feature = "crc-table")]
static CRC8_TABLE: [u8; 256] = crc8_table();

#[cfg(feature = "crc-table")]
const fn crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = crc8_bitwise(0, i as u8);
        i += 1;
    }
    table
}

const fn crc8_bitwise(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    let mut bit = 0;
    while bit < 8 {
        if crc & 0x1 == 0x1 {
            crc = (crc >> 1) ^ CRC8_POLY;
        } else {
            crc >>= 1;
        }
        bit += 1;
    }
    crc
}

/// Incremental CRC-8 accumulator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc8(u8);

impl Crc8 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current CRC value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    pub fn update(&mut self, byte: u8) {
        #[cfg(feature = "crc-table")]
        {
            self.0 = CRC8_TABLE[(self.0 ^ byte) as usize];
        }
        #[cfg(not(feature = "crc-table"))]
        {
            self.0 = crc8_bitwise(self.0, byte);
        }
    }

    pub fn update_all(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }
}

/// CRC-8 of `data`.
pub fn calc_crc(data: &[u8]) -> u8 {
    let mut crc = Crc8::new();
    crc.update_all(data);
    crc.value()
}

/// Checks a sequence whose last byte is the CRC-8 of the bytes before it.
///
/// Empty input never checks out.
pub fn check_crc(data: &[u8]) -> bool {
    match data.split_last() {
        Some((&crc, rest)) => calc_crc(rest) == crc,
        None => false,
    }
}
