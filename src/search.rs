use log::{debug, warn};

use crate::{Address, BusSearcher, Error, Pullup, ALARM_SEARCH, SEARCH_ROM};

/// Discovers every device on a bus that exposes search triplets.
///
/// This implements the [1-Wire search algorithm][an187].
/// Each pass arms the devices, then walks the 64 bit positions with one
/// triplet each. Where devices disagree the pass follows the previous
/// path below the last discrepancy, takes 1 at it and 0 above it. The
/// search ends after the first pass that took no 0 branch at a
/// discrepancy, having found one device per pass.
///
/// Nothing is returned alongside an error: a failing triplet discards the
/// addresses found so far. A failing arm command yields
/// [`Error::NoDevices`].
///
/// Addresses whose CRC does not check out are returned as read from the
/// bus; callers decide whether to trust them with [`Address::is_valid`].
///
/// [an187]: https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html
pub fn search<B>(bus: &B, alarm_only: bool) -> Result<Vec<Address>, Error>
where
    B: BusSearcher + ?Sized,
{
    let cmd = if alarm_only { ALARM_SEARCH } else { SEARCH_ROM };
    let mut devices = Vec::new();
    let mut last_discrepancy: Option<u32> = None;
    let mut last_rom = 0u64;

    loop {
        if let Err(e) = bus.tx(&[cmd], &mut [], Pullup::Weak) {
            debug!("search command {cmd:#04x} failed: {e}");
            return Err(Error::NoDevices);
        }

        let mut rom = 0u64;
        let mut last_zero = None;
        for bit in 0..64u32 {
            let direction = match last_discrepancy {
                Some(d) if bit < d => (last_rom >> bit) & 1 == 1,
                Some(d) => bit == d,
                None => false,
            };
            let triplet = bus.search_triplet(direction)?;
            if !triplet.got_zero && !triplet.got_one {
                if bit == 0 && devices.is_empty() {
                    debug!("search found no devices");
                    return Ok(devices);
                }
                return Err(Error::BusFault(format!(
                    "no device answered search at bit {bit}"
                )));
            }
            if triplet.got_zero && triplet.got_one && !triplet.taken {
                last_zero = Some(bit);
            }
            if triplet.taken {
                rom |= 1 << bit;
            }
        }

        let addr = Address(rom);
        if !addr.is_valid() {
            warn!("search found {addr} with a bad CRC");
        } else {
            debug!("search found {addr}");
        }
        devices.push(addr);

        match last_zero {
            Some(bit) => {
                last_discrepancy = Some(bit);
                last_rom = rom;
            }
            None => return Ok(devices),
        }
    }
}
