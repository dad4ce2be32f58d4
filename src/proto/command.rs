use std::mem;

use self::raw::W1NetlinkCmd;
use super::{message::W1MessageHeader, Deserializable, InvalidValue, Serializable};

mod raw {
    //! Taken from https://www.kernel.org/doc/Documentation/w1/w1.netlink

    use safe_transmute::TriviallyTransmutable;

    pub mod constants {
        pub const W1_CMD_READ: u8 = 0;
        pub const W1_CMD_WRITE: u8 = 1;
        pub const W1_CMD_SEARCH: u8 = 2;
        pub const W1_CMD_ALARM_SEARCH: u8 = 3;
        pub const W1_CMD_RESET: u8 = 5;
    }

    /// Command for given master or slave device
    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    pub struct W1NetlinkCmd {
        /// Command opcode. See also [constants].
        pub cmd: u8,
        /// reserved
        pub _res: u8,
        /// length of data for this command
        pub len: u16,
    }

    unsafe impl TriviallyTransmutable for W1NetlinkCmd {}

    impl W1NetlinkCmd {
        /// Reads the header from the front of `b`, which must hold at least
        /// `size_of::<Self>()` bytes. `b` may sit at any alignment.
        pub fn read(b: &[u8]) -> Self {
            Self {
                cmd: b[0],
                _res: b[1],
                len: u16::from_ne_bytes([b[2], b[3]]),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum W1CommandType {
    Read,
    Write,
    Search,
    AlarmSearch,
    Reset,
}

impl W1CommandType {
    /// Whether the kernel answers this command with data replies ahead of
    /// its status reply.
    pub fn has_data_reply(self) -> bool {
        matches!(self, Self::Read | Self::Search | Self::AlarmSearch)
    }
}

impl TryFrom<u8> for W1CommandType {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use self::raw::constants::*;
        let cmd = match value {
            W1_CMD_WRITE => Self::Write,
            W1_CMD_READ => Self::Read,
            W1_CMD_SEARCH => Self::Search,
            W1_CMD_ALARM_SEARCH => Self::AlarmSearch,
            W1_CMD_RESET => Self::Reset,
            v => return Err(InvalidValue(v)),
        };
        Ok(cmd)
    }
}

impl From<W1CommandType> for u8 {
    fn from(cmd: W1CommandType) -> Self {
        use self::raw::constants::*;
        match cmd {
            W1CommandType::Write => W1_CMD_WRITE,
            W1CommandType::Read => W1_CMD_READ,
            W1CommandType::Search => W1_CMD_SEARCH,
            W1CommandType::AlarmSearch => W1_CMD_ALARM_SEARCH,
            W1CommandType::Reset => W1_CMD_RESET,
        }
    }
}

/// A single `w1_netlink_cmd` with its attached data.
///
/// The same type describes requests and replies. A read request carries a
/// zeroed buffer sized to the number of bytes wanted and the data reply
/// carries the bytes read. Search requests are empty; their data replies
/// carry concatenated 64-bit ROM ids. Status replies always come back
/// with empty data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum W1NetlinkCommand {
    Write(Vec<u8>),
    Read(Vec<u8>),
    Search(Vec<u8>),
    AlarmSearch(Vec<u8>),
    Reset,
}

impl W1NetlinkCommand {
    pub const HEADER_LEN: usize = mem::size_of::<W1NetlinkCmd>();

    /// Read request for `len` bytes.
    pub fn read(len: usize) -> Self {
        Self::Read(vec![0; len])
    }

    /// Search request, optionally restricted to devices in alarm state.
    pub fn search(alarm_only: bool) -> Self {
        if alarm_only {
            Self::AlarmSearch(Vec::new())
        } else {
            Self::Search(Vec::new())
        }
    }

    pub fn cmd_type(&self) -> W1CommandType {
        match self {
            W1NetlinkCommand::Write(_) => W1CommandType::Write,
            W1NetlinkCommand::Read(_) => W1CommandType::Read,
            W1NetlinkCommand::Search(_) => W1CommandType::Search,
            W1NetlinkCommand::AlarmSearch(_) => W1CommandType::AlarmSearch,
            W1NetlinkCommand::Reset => W1CommandType::Reset,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            W1NetlinkCommand::Write(pl)
            | W1NetlinkCommand::Read(pl)
            | W1NetlinkCommand::Search(pl)
            | W1NetlinkCommand::AlarmSearch(pl) => pl,
            W1NetlinkCommand::Reset => &[],
        }
    }

    pub fn into_data(self) -> Vec<u8> {
        match self {
            W1NetlinkCommand::Write(pl)
            | W1NetlinkCommand::Read(pl)
            | W1NetlinkCommand::Search(pl)
            | W1NetlinkCommand::AlarmSearch(pl) => pl,
            W1NetlinkCommand::Reset => Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("Invalid command type")]
    InvalidType(#[from] InvalidValue),

    #[error("Command truncated, expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

impl Deserializable for W1NetlinkCommand {
    type Header = W1MessageHeader;
    type Error = DeserializeError;

    fn deserialize(_header: &Self::Header, payload: &[u8]) -> Result<(Self, usize), Self::Error> {
        if payload.len() < Self::HEADER_LEN {
            return Err(DeserializeError::Truncated {
                expected: Self::HEADER_LEN,
                actual: payload.len(),
            });
        }
        let (header, payload) = payload.split_at(Self::HEADER_LEN);
        let W1NetlinkCmd { cmd, len, .. } = W1NetlinkCmd::read(header);

        let len = len as usize;
        if payload.len() < len {
            return Err(DeserializeError::Truncated {
                expected: Self::HEADER_LEN + len,
                actual: Self::HEADER_LEN + payload.len(),
            });
        }
        let data = payload[..len].to_vec();

        let cmd = match W1CommandType::try_from(cmd)? {
            W1CommandType::Read => Self::Read(data),
            W1CommandType::Write => Self::Write(data),
            W1CommandType::Search => Self::Search(data),
            W1CommandType::AlarmSearch => Self::AlarmSearch(data),
            W1CommandType::Reset => Self::Reset,
        };
        Ok((cmd, Self::HEADER_LEN + len))
    }
}

impl Serializable for W1NetlinkCommand {
    fn buffer_len(&self) -> usize {
        self.data().len() + Self::HEADER_LEN
    }

    fn serialize(&self, buffer: &mut [u8]) {
        let data = self.data();
        debug_assert!(data.len() <= u16::MAX as usize);
        let raw = W1NetlinkCmd {
            cmd: self.cmd_type().into(),
            _res: Default::default(),
            len: data.len() as u16,
        };

        let msg = safe_transmute::transmute_one_to_bytes(&raw);
        debug_assert_eq!(mem::size_of::<W1NetlinkCmd>(), Self::HEADER_LEN);
        buffer[0..Self::HEADER_LEN].copy_from_slice(msg);
        buffer[Self::HEADER_LEN..Self::HEADER_LEN + data.len()].copy_from_slice(data);
    }
}
