//! 1-wire bus access.
//!
//! [`Bus`] is the contract between device drivers and whatever drives the
//! wire. [`search::search`] discovers devices on any bus able to run
//! search triplets, [`Dev`] talks to one device by its [`Address`], and
//! [`netlink`] reaches the masters of the Linux kernel w1 subsystem over
//! the netlink connector using the wire format of [`proto`].

pub mod address;
pub mod bus;
pub mod crc;
pub mod dev;
pub mod error;
pub mod netlink;
pub mod proto;
pub mod registry;
pub mod search;

pub use address::Address;
pub use bus::{Bus, BusCloser, BusSearcher, Duplex, Pins, Pullup, TripletResult};
pub use crc::{calc_crc, check_crc};
pub use dev::Dev;
pub use error::{Error, TransportError};
pub use registry::Registry;

/// Selects one device by its address.
pub const MATCH_ROM: u8 = 0x55;
/// Addresses every device at once.
pub const SKIP_ROM: u8 = 0xCC;
/// Reads the address of the only device on the bus.
pub const READ_ROM: u8 = 0x33;
pub const SEARCH_ROM: u8 = 0xF0;
/// Search among devices in alarm state.
pub const ALARM_SEARCH: u8 = 0xEC;
