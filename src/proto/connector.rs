use netlink_packet_core::{
    NetlinkBuffer, NetlinkDeserializable, NetlinkHeader, NetlinkMessage, NetlinkPayload,
    NetlinkSerializable, NLMSG_DONE,
};
use std::mem;

use self::raw::CnMsg;
use super::{Deserializable, Serializable};

mod raw {
    use safe_transmute::TriviallyTransmutable;

    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    pub struct CnMsg {
        pub idx: u32,
        pub val: u32,
        pub seq: u32,
        pub ack: u32,
        /// Kernel docs:
        /// > Its length field is equal to size of the attached data
        pub len: u16,
        pub flags: u16,
    }

    /// Safety: repr(C) with no padding, every bit pattern is valid
    unsafe impl TriviallyTransmutable for CnMsg {}

    impl CnMsg {
        /// Reads the header from the front of `b`, which must hold at least
        /// `size_of::<Self>()` bytes. `b` may sit at any alignment.
        pub fn read(b: &[u8]) -> Self {
            let u32_at = |i: usize| u32::from_ne_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);
            Self {
                idx: u32_at(0),
                val: u32_at(4),
                seq: u32_at(8),
                ack: u32_at(12),
                len: u16::from_ne_bytes([b[16], b[17]]),
                flags: u16::from_ne_bytes([b[18], b[19]]),
            }
        }
    }
}

pub trait NlConnectorType {
    fn idx() -> u32;
    fn val() -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlConnectorHeader {
    seq: u32,
    ack: u32,
    flags: u16,
}

impl NlConnectorHeader {
    pub fn new(seq: u32, ack: u32) -> Self {
        Self { seq, ack, flags: 0 }
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn ack(&self) -> u32 {
        self.ack
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }
}

#[derive(Debug, Clone)]
pub struct NlConnectorMessage<T> {
    header: NlConnectorHeader,
    payload: Vec<T>,
}

impl<T> NlConnectorMessage<T> {
    pub const HEADER_LEN: usize = mem::size_of::<CnMsg>();

    pub fn new(seq: u32, payload: impl IntoIterator<Item = T>) -> Self {
        let payload = payload.into_iter().collect();
        Self {
            header: NlConnectorHeader::new(seq, 0),
            payload,
        }
    }

    /// Sets the acknowledge number, as the kernel does for its replies.
    pub fn with_ack(mut self, ack: u32) -> Self {
        self.header.ack = ack;
        self
    }

    pub fn header(&self) -> &NlConnectorHeader {
        &self.header
    }

    pub fn payload(&self) -> &[T] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<T> {
        self.payload
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError<E: std::error::Error> {
    #[error("Invalid Netlink header: {0}")]
    InvalidNetlinkHeader(String),

    #[error("Invalid Netlink message type {0}")]
    InvalidMessageType(u16),

    #[error("Payload length does not match header field")]
    InvalidPayloadLength,

    #[error("Invalid connector index, expected {0}, got {1}")]
    UnexpectedIdx(u32, u32),

    #[error("Invalid connector value, expected {0}, got {1}")]
    UnexpectedVal(u32, u32),

    #[error(transparent)]
    Inner(#[from] E),
}

impl<T> NetlinkDeserializable for NlConnectorMessage<T>
where
    T: Deserializable<Header = NlConnectorHeader> + NlConnectorType,
    T::Error: std::error::Error,
{
    type Error = DeserializeError<T::Error>;

    fn deserialize(header: &NetlinkHeader, payload: &[u8]) -> Result<Self, Self::Error> {
        // the w1 connector answers with NLMSG_DONE for every reply
        if header.message_type != NLMSG_DONE {
            return Err(Self::Error::InvalidMessageType(header.message_type));
        }
        if payload.len() < Self::HEADER_LEN {
            return Err(Self::Error::InvalidPayloadLength);
        }

        let (header, payload_bytes) = payload.split_at(Self::HEADER_LEN);
        let CnMsg {
            idx,
            val,
            seq,
            ack,
            len,
            flags,
        } = CnMsg::read(header);

        if len as usize > payload_bytes.len() {
            return Err(Self::Error::InvalidPayloadLength);
        }
        if idx != T::idx() {
            return Err(Self::Error::UnexpectedIdx(T::idx(), idx));
        }
        if val != T::val() {
            return Err(Self::Error::UnexpectedVal(T::val(), val));
        }

        let header = NlConnectorHeader { seq, ack, flags };
        let payload_bytes = &payload_bytes[..len as usize];
        let mut payload = Vec::new();
        let mut cursor = 0;
        while cursor < payload_bytes.len() {
            let (item, n) = T::deserialize(&header, &payload_bytes[cursor..])?;
            payload.push(item);
            cursor += n;
        }

        Ok(Self { header, payload })
    }
}

impl<T> NetlinkSerializable for NlConnectorMessage<T>
where
    T: Serializable + NlConnectorType,
{
    fn message_type(&self) -> u16 {
        NLMSG_DONE
    }

    fn buffer_len(&self) -> usize {
        let inner_len: usize = self.payload.iter().map(Serializable::buffer_len).sum();
        inner_len + Self::HEADER_LEN
    }

    fn serialize(&self, buffer: &mut [u8]) {
        let len = NetlinkSerializable::buffer_len(self) - Self::HEADER_LEN;
        debug_assert!(len <= u16::MAX as usize);
        let len = len as u16;
        let NlConnectorHeader { seq, ack, flags } = self.header;
        let raw = CnMsg {
            idx: T::idx(),
            val: T::val(),
            seq,
            ack,
            len,
            flags,
        };
        let msg = safe_transmute::transmute_one_to_bytes(&raw);

        debug_assert_eq!(Self::HEADER_LEN, mem::size_of::<CnMsg>());
        buffer[0..Self::HEADER_LEN].copy_from_slice(msg);

        let mut cursor = Self::HEADER_LEN;
        for item in &self.payload {
            let len = item.buffer_len();
            item.serialize(&mut buffer[cursor..cursor + len]);
            cursor += len;
        }
    }
}

impl<T> From<NlConnectorMessage<T>> for NetlinkPayload<NlConnectorMessage<T>> {
    fn from(msg: NlConnectorMessage<T>) -> Self {
        Self::InnerMessage(msg)
    }
}

impl<T> NlConnectorMessage<T>
where
    T: Serializable + NlConnectorType,
{
    /// Wraps the message in a `NLMSG_DONE` netlink header, ready to send.
    pub fn to_datagram(self) -> Vec<u8> {
        let mut nl_msg = NetlinkMessage::from(self);
        nl_msg.finalize();

        let mut buf = vec![0; nl_msg.buffer_len()];
        nl_msg.serialize(&mut buf[..]);
        buf
    }
}

impl<T> NlConnectorMessage<T>
where
    T: Deserializable<Header = NlConnectorHeader> + NlConnectorType,
    T::Error: std::error::Error,
{
    /// Parses one received datagram, netlink header included.
    pub fn from_datagram(buf: &[u8]) -> Result<Self, DeserializeError<T::Error>> {
        let packet = NetlinkBuffer::new_checked(buf)
            .map_err(|e| DeserializeError::InvalidNetlinkHeader(e.to_string()))?;

        let mut header = NetlinkHeader::default();
        header.length = packet.length();
        header.message_type = packet.message_type();
        header.flags = packet.flags();
        header.sequence_number = packet.sequence_number();
        header.port_number = packet.port_number();

        <Self as NetlinkDeserializable>::deserialize(&header, packet.payload())
    }
}
