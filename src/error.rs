use std::io;

use crate::proto::{connector, message};

/// A received datagram that could not be decoded.
pub type DatagramError = connector::DeserializeError<message::DeserializeError>;

/// Errors of 1-wire bus operations.
///
/// The first three variants describe the 1-wire segment itself. Faults of
/// whatever carries the bus (the netlink socket, the kernel driver) are
/// wrapped in [`Error::Transport`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No presence pulse after reset.
    #[error("no devices present on the 1-wire bus")]
    NoDevices,

    /// The data line is held low.
    #[error("1-wire bus is shorted")]
    ShortedBus,

    #[error("1-wire bus fault: {0}")]
    BusFault(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    pub fn no_devices(&self) -> bool {
        matches!(self, Self::NoDevices)
    }

    pub fn is_shorted(&self) -> bool {
        matches!(self, Self::ShortedBus)
    }

    /// True for faults on the 1-wire segment, false for faults in the
    /// layer carrying it.
    pub fn is_bus_error(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Transport(TransportError::Io(e))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("netlink socket error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed datagram: {0}")]
    Malformed(#[from] DatagramError),

    #[error("sequence mismatch, expected {expected}, got {actual}")]
    SequenceMismatch { expected: u32, actual: u32 },

    #[error("unexpected ack {actual} for sequence {seq}")]
    UnexpectedAck { seq: u32, actual: u32 },

    #[error("kernel reported status {0}")]
    KernelStatus(u8),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("message of {0} bytes exceeds the 16-bit length field")]
    MessageTooLarge(usize),

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    /// Errors after which the transport cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Closed)
    }
}
