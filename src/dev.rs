use std::fmt;

use crate::{Address, Bus, Duplex, Error, Pullup, MATCH_ROM, READ_ROM, SKIP_ROM};

/// A device on a multi-drop bus, addressed through Match ROM.
#[derive(Debug)]
pub struct Dev<'a, B: ?Sized> {
    pub bus: &'a B,
    pub addr: Address,
}

impl<B: ?Sized> Clone for Dev<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ?Sized> Copy for Dev<'_, B> {}

impl<'a, B: Bus + ?Sized> Dev<'a, B> {
    pub fn new(bus: &'a B, addr: Address) -> Self {
        Self { bus, addr }
    }

    /// Selects the device, writes `w` and reads `r.len()` bytes, leaving the
    /// bus weakly pulled up.
    pub fn tx(&self, w: &[u8], r: &mut [u8]) -> Result<(), Error> {
        self.bus.tx(&self.frame(w), r, Pullup::Weak)
    }

    /// Like [`Dev::tx`] but ends with a strong pull-up, for EEPROM writes and
    /// conversions of parasitically powered devices.
    pub fn tx_power(&self, w: &[u8], r: &mut [u8]) -> Result<(), Error> {
        self.bus.tx(&self.frame(w), r, Pullup::Strong)
    }

    pub fn duplex(&self) -> Duplex {
        Duplex::Half
    }

    fn frame(&self, w: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9 + w.len());
        buf.push(MATCH_ROM);
        buf.extend_from_slice(&self.addr.to_le_bytes());
        buf.extend_from_slice(w);
        buf
    }
}

impl<B: ?Sized> fmt::Display for Dev<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "onewire({})", self.addr)
    }
}

/// Reads the address of the only device on a single-drop bus.
///
/// With more than one device the answers collide and the CRC check fails.
pub fn read_rom<B: Bus + ?Sized>(bus: &B) -> Result<Address, Error> {
    let mut rom = [0; 8];
    bus.tx(&[READ_ROM], &mut rom, Pullup::Weak)?;
    let addr = Address::from_le_bytes(rom);
    if !addr.is_valid() {
        return Err(Error::BusFault(format!("read rom returned {addr} with a bad CRC")));
    }
    Ok(addr)
}

/// Addresses every device at once through Skip ROM.
pub fn skip_rom_tx<B: Bus + ?Sized>(
    bus: &B,
    w: &[u8],
    r: &mut [u8],
    pull: Pullup,
) -> Result<(), Error> {
    let mut buf = Vec::with_capacity(1 + w.len());
    buf.push(SKIP_ROM);
    buf.extend_from_slice(w);
    bus.tx(&buf, r, pull)
}
