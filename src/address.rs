use std::fmt;

use crate::crc;

/// 64-bit ROM code of a 1-wire device.
///
/// | Bit | Description |
/// |-----|-------------|
/// | 0-7 | Family code (e.g., 0x28 for DS18B20) |
/// | 8-55 | Serial number |
/// | 56-63 | CRC-8 of the lower seven bytes |
///
/// Sent on the wire least significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub u64);

impl Address {
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn family(self) -> u8 {
        self.0 as u8
    }

    /// The 48-bit serial number.
    pub fn serial(self) -> u64 {
        (self.0 >> 8) & 0xffff_ffff_ffff
    }

    pub fn crc(self) -> u8 {
        (self.0 >> 56) as u8
    }

    /// True when the top byte is the CRC-8 of the lower seven.
    pub fn is_valid(self) -> bool {
        crc::check_crc(&self.to_le_bytes())
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Address> for u64 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields() {
        let addr = Address(0x740000070e41ac28);
        assert_eq!(addr.family(), 0x28);
        assert_eq!(addr.serial(), 0x0000070e41ac);
        assert_eq!(addr.crc(), 0x74);
        assert_eq!(
            addr.to_le_bytes(),
            [0x28, 0xac, 0x41, 0x0e, 0x07, 0x00, 0x00, 0x74]
        );
        assert_eq!(Address::from_le_bytes(addr.to_le_bytes()), addr);
    }

    #[test]
    fn validity() {
        let rom = [0x02, 0x1c, 0xb8, 0x01, 0x00, 0x00, 0x00, 0xa2];
        assert!(Address::from_le_bytes(rom).is_valid());
        let mut bad = rom;
        bad[7] = 0xa3;
        assert!(!Address::from_le_bytes(bad).is_valid());
        assert!(Address(0).is_valid());
    }

    #[test]
    fn display() {
        assert_eq!(Address(0x28).to_string(), "0x0000000000000028");
    }
}
