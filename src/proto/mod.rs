//! Each connector message can include one or more w1_netlink_msg
//! with zero or more attached w1_netlink_cmd messages.
//!
//! Every w1_netlink_cmd of a master command is acknowledged by a status
//! reply whose cn_msg.ack mirrors the request (zero for us) and whose
//! w1_netlink_cmd.len is zero. Read and search commands additionally
//! produce data replies carrying cn_msg.ack = seq + 1, sent before the
//! status of the command they answer.
//!
//! All multi-byte fields are in host byte order.

pub mod command;
pub mod connector;
pub mod message;

#[derive(Debug, thiserror::Error)]
#[error("Invalid value received: {0}")]
pub struct InvalidValue(pub u8);

/// Length fields on the wire are 16 bit: callers keep `buffer_len` within
/// `u16::MAX` for anything nested in a connector message.
pub trait Serializable {
    fn buffer_len(&self) -> usize;

    fn serialize(&self, buffer: &mut [u8]);
}

pub trait Deserializable
where
    Self: Sized,
{
    type Header;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Parses one item from the front of `payload`, returning it together
    /// with the number of bytes consumed.
    fn deserialize(header: &Self::Header, payload: &[u8]) -> Result<(Self, usize), Self::Error>;
}
