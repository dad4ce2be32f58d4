use crate::{Address, Error};

/// State of the bus once a transaction is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pullup {
    /// Regular resistive pull-up.
    #[default]
    Weak,
    /// Actively sources current, to power parasitic devices through EEPROM
    /// writes or temperature conversions.
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Outcome of one search triplet: two read time slots then one write slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TripletResult {
    /// At least one active device has a 0 at this bit position.
    pub got_zero: bool,
    /// At least one active device has a 1 at this bit position.
    pub got_one: bool,
    /// Direction written by the master; devices holding the other value
    /// leave the search pass.
    pub taken: bool,
}

/// A 1-wire bus master.
///
/// Methods take `&self`: implementations serialize concurrent callers
/// internally, so a bus can be shared between device drivers.
pub trait Bus {
    /// Resets the bus, writes `w`, reads `r.len()` bytes into `r` and leaves
    /// the bus in the `pull` state. Either buffer may be empty.
    fn tx(&self, w: &[u8], r: &mut [u8], pull: Pullup) -> Result<(), Error>;

    /// Discovers the address of every device on the bus, or only of the
    /// devices in alarm state.
    fn search(&self, alarm_only: bool) -> Result<Vec<Address>, Error>;
}

/// Bus able to run single search steps, which is all
/// [`search`](crate::search::search) needs.
pub trait BusSearcher: Bus {
    /// Runs one triplet at the current bit position. `direction` is written
    /// when devices disagree; otherwise the bit they all share is written.
    fn search_triplet(&self, direction: bool) -> Result<TripletResult, Error>;
}

/// Bus owning a transport that can be released.
pub trait BusCloser: Bus + Send + Sync {
    /// Releases the transport. Further calls on the bus fail.
    fn close(&self) -> Result<(), Error>;
}

/// Bus driven through a pin it owns.
pub trait Pins {
    /// Name of the data line.
    fn q(&self) -> &str;
}

impl<B: Bus + ?Sized> Bus for &B {
    fn tx(&self, w: &[u8], r: &mut [u8], pull: Pullup) -> Result<(), Error> {
        (**self).tx(w, r, pull)
    }

    fn search(&self, alarm_only: bool) -> Result<Vec<Address>, Error> {
        (**self).search(alarm_only)
    }
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn tx(&self, w: &[u8], r: &mut [u8], pull: Pullup) -> Result<(), Error> {
        (**self).tx(w, r, pull)
    }

    fn search(&self, alarm_only: bool) -> Result<Vec<Address>, Error> {
        (**self).search(alarm_only)
    }
}
