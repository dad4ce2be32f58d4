use std::mem;

use self::raw::W1NetlinkMsg;
use super::{
    command::W1NetlinkCommand,
    connector::{NlConnectorHeader, NlConnectorType},
    Deserializable, InvalidValue, Serializable,
};

mod raw {
    //! Taken from https://www.kernel.org/doc/Documentation/w1/w1.netlink

    use safe_transmute::TriviallyTransmutable;

    pub mod constants {
        pub const CONNECTOR_W1_IDX: u32 = 0x3;
        pub const CONNECTOR_W1_VAL: u32 = 0x1;

        pub const W1_MASTER_CMD: u8 = 4;
        pub const W1_LIST_MASTERS: u8 = 6;
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    pub struct W1NetlinkMsg {
        /// Message type. See also [constants].
        pub r#type: u8,
        /// Error indication from kernel
        pub status: u8,
        /// Size of data attached to this header data
        pub len: u16,
        /// Master or slave ID
        pub id: [u8; 8],
    }

    unsafe impl TriviallyTransmutable for W1NetlinkMsg {}

    impl W1NetlinkMsg {
        /// Reads the header from the front of `b`, which must hold at least
        /// `size_of::<Self>()` bytes. `b` may sit at any alignment.
        pub fn read(b: &[u8]) -> Self {
            let mut id = [0; 8];
            id.copy_from_slice(&b[4..12]);
            Self {
                r#type: b[0],
                status: b[1],
                len: u16::from_ne_bytes([b[2], b[3]]),
                id,
            }
        }
    }
}

/// See also [raw::constants].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum W1MessageType {
    MasterCmd,
    ListMasters,
}

impl TryFrom<u8> for W1MessageType {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use self::raw::constants::*;
        let t = match value {
            W1_MASTER_CMD => Self::MasterCmd,
            W1_LIST_MASTERS => Self::ListMasters,
            v => return Err(InvalidValue(v)),
        };
        Ok(t)
    }
}

impl From<W1MessageType> for u8 {
    fn from(mt: W1MessageType) -> Self {
        use self::raw::constants::*;
        match mt {
            W1MessageType::MasterCmd => W1_MASTER_CMD,
            W1MessageType::ListMasters => W1_LIST_MASTERS,
        }
    }
}

/// Decoded `w1_netlink_msg` header, handed to the embedded commands.
#[derive(Debug, Clone, Copy)]
pub struct W1MessageHeader {
    pub msg_type: W1MessageType,
    pub status: u8,
    pub id: [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum W1NetlinkMessage {
    /// Requests carry no ids; replies list the ids of every registered master.
    ListMasters { status: u8, masters: Vec<u32> },
    MasterCommand {
        target: u32,
        status: u8,
        cmds: Vec<W1NetlinkCommand>,
    },
}

impl W1NetlinkMessage {
    pub const HEADER_LEN: usize = mem::size_of::<W1NetlinkMsg>();

    pub fn list_masters() -> Self {
        Self::ListMasters {
            status: 0,
            masters: Vec::new(),
        }
    }

    pub fn master_command(target: u32, cmds: impl IntoIterator<Item = W1NetlinkCommand>) -> Self {
        Self::MasterCommand {
            target,
            status: 0,
            cmds: cmds.into_iter().collect(),
        }
    }

    /// Error indication from the kernel, an errno value or zero.
    pub fn status(&self) -> u8 {
        match self {
            Self::ListMasters { status, .. } | Self::MasterCommand { status, .. } => *status,
        }
    }
}

impl NlConnectorType for W1NetlinkMessage {
    fn idx() -> u32 {
        raw::constants::CONNECTOR_W1_IDX
    }

    fn val() -> u32 {
        raw::constants::CONNECTOR_W1_VAL
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(InvalidValue),

    #[error("Payload length does not match header")]
    InvalidPayloadLength,

    #[error(transparent)]
    Command(#[from] super::command::DeserializeError),
}

impl Deserializable for W1NetlinkMessage {
    type Header = NlConnectorHeader;
    type Error = DeserializeError;

    fn deserialize(_header: &Self::Header, payload: &[u8]) -> Result<(Self, usize), Self::Error> {
        if payload.len() < Self::HEADER_LEN {
            return Err(DeserializeError::InvalidPayloadLength);
        }
        let (header, payload) = payload.split_at(Self::HEADER_LEN);
        let W1NetlinkMsg {
            r#type,
            status,
            len,
            id,
        } = W1NetlinkMsg::read(header);

        let len = len as usize;
        if payload.len() < len {
            return Err(DeserializeError::InvalidPayloadLength);
        }
        let payload = &payload[..len];

        let msg_type = r#type.try_into().map_err(Self::Error::InvalidMessageType)?;
        let ret = match msg_type {
            W1MessageType::MasterCmd => {
                let target = u32::from_ne_bytes([id[0], id[1], id[2], id[3]]);
                let header = W1MessageHeader {
                    msg_type,
                    status,
                    id,
                };
                let mut cmds = Vec::new();
                let mut cursor = 0;
                while cursor < payload.len() {
                    let (cmd, n) = W1NetlinkCommand::deserialize(&header, &payload[cursor..])?;
                    cmds.push(cmd);
                    cursor += n;
                }
                Self::MasterCommand {
                    target,
                    status,
                    cmds,
                }
            }
            W1MessageType::ListMasters => {
                let chunks = payload.chunks_exact(4);
                if !chunks.remainder().is_empty() {
                    return Err(DeserializeError::InvalidPayloadLength);
                }
                let masters = chunks
                    .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Self::ListMasters { status, masters }
            }
        };
        Ok((ret, len + Self::HEADER_LEN))
    }
}

impl Serializable for W1NetlinkMessage {
    fn buffer_len(&self) -> usize {
        use W1NetlinkMessage::*;
        let inner = match self {
            ListMasters { masters, .. } => masters.len() * 4,
            MasterCommand { cmds, .. } => cmds.iter().map(Serializable::buffer_len).sum(),
        };
        inner + Self::HEADER_LEN
    }

    fn serialize(&self, buffer: &mut [u8]) {
        debug_assert!(self.buffer_len() - Self::HEADER_LEN <= u16::MAX as usize);
        let len = (self.buffer_len() - Self::HEADER_LEN) as u16;

        use W1NetlinkMessage::*;
        let (msg_type, id) = match self {
            ListMasters { masters, .. } => {
                let mut cursor = Self::HEADER_LEN;
                for id in masters {
                    buffer[cursor..cursor + 4].copy_from_slice(&id.to_ne_bytes());
                    cursor += 4;
                }
                (W1MessageType::ListMasters, [0; 8])
            }
            MasterCommand { target, cmds, .. } => {
                let mut id = [0; 8];
                id[..4].copy_from_slice(&target.to_ne_bytes());
                let mut cursor = Self::HEADER_LEN;
                for cmd in cmds {
                    let n = cmd.buffer_len();
                    cmd.serialize(&mut buffer[cursor..cursor + n]);
                    cursor += n;
                }
                (W1MessageType::MasterCmd, id)
            }
        };

        let raw = W1NetlinkMsg {
            r#type: msg_type.into(),
            status: self.status(),
            len,
            id,
        };
        let msg = safe_transmute::transmute_one_to_bytes(&raw);

        debug_assert_eq!(Self::HEADER_LEN, mem::size_of::<W1NetlinkMsg>());
        buffer[0..Self::HEADER_LEN].copy_from_slice(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cn_header() -> NlConnectorHeader {
        NlConnectorHeader::new(0, 0)
    }

    fn to_bytes(msg: &W1NetlinkMessage) -> Vec<u8> {
        let mut buf = vec![0; msg.buffer_len()];
        msg.serialize(&mut buf);
        buf
    }

    #[test]
    fn header_is_twelve_bytes() {
        assert_eq!(W1NetlinkMessage::HEADER_LEN, 12);
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn master_command_layout() {
        let msg = W1NetlinkMessage::master_command(
            7,
            [W1NetlinkCommand::Reset, W1NetlinkCommand::Write(vec![0xab])],
        );
        assert_eq!(
            to_bytes(&msg),
            [
                0x04, 0x00, 0x09, 0x00, // type, status, len
                0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // id
                0x05, 0x00, 0x00, 0x00, // reset
                0x01, 0x00, 0x01, 0x00, 0xab, // write
            ]
        );
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn deserialize_search_response() {
        let payload = vec![
            0x04, 0x00, 0x0c, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00,
            0x08, 0x00, 0x28, 0xac, 0x41, 0x0e, 0x07, 0x00, 0x00, 0x74,
        ];
        let (msg, n) = W1NetlinkMessage::deserialize(&cn_header(), &payload).unwrap();
        assert_eq!(n, payload.len());
        assert_eq!(
            msg,
            W1NetlinkMessage::MasterCommand {
                target: 1,
                status: 0,
                cmds: vec![W1NetlinkCommand::Search(
                    0x740000070e41ac28u64.to_le_bytes().to_vec()
                )],
            }
        );
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn deserialize_list_masters_reply() {
        let payload = vec![
            0x06, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
            0x00, 0x00, 0x02, 0x00, 0x00, 0x00,
        ];
        let (msg, _) = W1NetlinkMessage::deserialize(&cn_header(), &payload).unwrap();
        assert_eq!(
            msg,
            W1NetlinkMessage::ListMasters {
                status: 0,
                masters: vec![1, 2],
            }
        );
    }

    #[test]
    fn status_is_preserved() {
        let mut bytes = to_bytes(&W1NetlinkMessage::master_command(3, [W1NetlinkCommand::Reset]));
        bytes[1] = 19;
        let (msg, _) = W1NetlinkMessage::deserialize(&cn_header(), &bytes).unwrap();
        assert_eq!(msg.status(), 19);
    }

    #[test]
    fn ragged_master_list_is_rejected() {
        let mut bytes = to_bytes(&W1NetlinkMessage::ListMasters {
            status: 0,
            masters: vec![1],
        });
        bytes[2] = 3;
        let err = W1NetlinkMessage::deserialize(&cn_header(), &bytes).unwrap_err();
        assert!(matches!(err, DeserializeError::InvalidPayloadLength));
    }

    #[test]
    fn commands_after_odd_length_data() {
        let msg = W1NetlinkMessage::master_command(
            7,
            [
                W1NetlinkCommand::Reset,
                W1NetlinkCommand::Write(vec![0xab]),
                W1NetlinkCommand::read(1),
            ],
        );
        let (parsed, n) = W1NetlinkMessage::deserialize(&cn_header(), &to_bytes(&msg)).unwrap();
        assert_eq!(n, msg.buffer_len());
        assert_eq!(parsed, msg);

        // same bytes starting at an odd address
        let mut shifted = vec![0];
        shifted.extend(to_bytes(&msg));
        let (parsed, _) = W1NetlinkMessage::deserialize(&cn_header(), &shifted[1..]).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn short_header_is_rejected() {
        let err = W1NetlinkMessage::deserialize(&cn_header(), &[0x04, 0x00]).unwrap_err();
        assert!(matches!(err, DeserializeError::InvalidPayloadLength));
    }
}
