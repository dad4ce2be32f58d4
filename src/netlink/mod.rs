//! 1-wire masters of the kernel w1 subsystem, driven over the netlink
//! connector.
//!
//! Each call sends one datagram holding a single `MASTER_CMD` message with
//! all of its commands, then reads replies until every command has been
//! acknowledged. Reading up to the last acknowledgement also after an
//! error keeps the socket in step for the next call.

use std::{
    collections::VecDeque,
    fmt, io,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, trace, warn};

use crate::{
    error::TransportError,
    proto::{
        command::{W1CommandType, W1NetlinkCommand},
        connector::NlConnectorMessage,
        message::W1NetlinkMessage,
        Serializable,
    },
    registry::{Registry, RegistryError},
    Address, Bus, BusCloser, Error, Pullup,
};

mod socket;

pub use socket::{is_supported, NetlinkSocket};

/// Datagram channel to the kernel.
pub trait Connector: Send {
    /// Sends one datagram.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Receives one datagram into `buf`, returning its length.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[derive(Debug, Clone, Copy)]
pub struct NetlinkConfig {
    recv_buffer_len: usize,
}

impl Default for NetlinkConfig {
    fn default() -> Self {
        Self {
            recv_buffer_len: 8192,
        }
    }
}

impl NetlinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the receive buffer. Datagrams longer than this are truncated
    /// by the socket and then rejected as malformed.
    pub fn with_recv_buffer_len(mut self, len: usize) -> Self {
        self.recv_buffer_len = len;
        self
    }

    pub fn recv_buffer_len(&self) -> usize {
        self.recv_buffer_len
    }
}

/// Socket plus the sequence counter; guarded by the bus mutex.
struct Channel<C> {
    conn: Option<C>,
    seq: u32,
    buf: Vec<u8>,
}

impl<C: Connector> Channel<C> {
    fn new(conn: C, config: &NetlinkConfig) -> Self {
        Self {
            conn: Some(conn),
            seq: 0,
            buf: vec![0; config.recv_buffer_len],
        }
    }

    /// Sequence number for the next request. `u32::MAX` is never used, its
    /// data replies would carry an ack of zero.
    fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = if seq >= u32::MAX - 1 { 0 } else { seq + 1 };
        seq
    }

    fn poison(&mut self, e: io::Error) -> TransportError {
        warn!("netlink socket failed, closing transport: {e}");
        self.conn = None;
        TransportError::Io(e)
    }

    fn send(&mut self, seq: u32, msg: W1NetlinkMessage) -> Result<(), TransportError> {
        // cn_msg.len bounds every length field nested inside it
        let len = msg.buffer_len();
        if u16::try_from(len).is_err() {
            return Err(TransportError::MessageTooLarge(len));
        }
        let buf = NlConnectorMessage::new(seq, [msg]).to_datagram();
        trace!("send {:#04X?}", buf);
        let sent = match self.conn.as_mut() {
            Some(conn) => conn.send(&buf),
            None => return Err(TransportError::Closed),
        };
        match sent {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(n) => Err(self.poison(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {n} of {} bytes", buf.len()),
            ))),
            Err(e) => Err(self.poison(e)),
        }
    }

    fn recv(&mut self) -> Result<NlConnectorMessage<W1NetlinkMessage>, TransportError> {
        let received = match self.conn.as_mut() {
            Some(conn) => conn.recv(&mut self.buf),
            None => return Err(TransportError::Closed),
        };
        let n = received.map_err(|e| self.poison(e))?;
        trace!("received {:#04X?}", &self.buf[..n]);
        Ok(NlConnectorMessage::from_datagram(&self.buf[..n])?)
    }

    /// Next w1 message answering request `seq`, with the ack it came with.
    fn next_reply(
        &mut self,
        seq: u32,
        pending: &mut VecDeque<(u32, W1NetlinkMessage)>,
    ) -> Result<(u32, W1NetlinkMessage), TransportError> {
        if let Some(reply) = pending.pop_front() {
            return Ok(reply);
        }
        let cn = self.recv()?;
        let header = *cn.header();
        if header.seq() != seq {
            return Err(TransportError::SequenceMismatch {
                expected: seq,
                actual: header.seq(),
            });
        }
        pending.extend(cn.into_payload().into_iter().map(|m| (header.ack(), m)));
        pending
            .pop_front()
            .ok_or_else(|| TransportError::UnexpectedReply("empty connector message".into()))
    }

    /// Reads a single reply, enough for the kernel to list about a thousand
    /// masters; longer lists arrive split over several datagrams.
    fn list_masters(&mut self) -> Result<Vec<u32>, TransportError> {
        let seq = self.next_seq();
        debug!("listing w1 masters, seq {seq}");
        self.send(seq, W1NetlinkMessage::list_masters())?;

        let mut pending = VecDeque::new();
        let (ack, msg) = self.next_reply(seq, &mut pending)?;
        match msg {
            W1NetlinkMessage::ListMasters { status, .. } if status != 0 => {
                Err(TransportError::KernelStatus(status))
            }
            W1NetlinkMessage::ListMasters { masters, .. } if ack == seq.wrapping_add(1) => {
                debug!("w1 masters: {masters:?}");
                Ok(masters)
            }
            W1NetlinkMessage::ListMasters { .. } => {
                Err(TransportError::UnexpectedAck { seq, actual: ack })
            }
            other => Err(TransportError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Runs `cmds` on master `target` and returns the data replied to each
    /// command, empty for commands without data replies.
    ///
    /// The first error is returned only once every command has received
    /// its status reply, or once the kernel has rejected the message as a
    /// whole. Every reply that cannot be matched counts as one status.
    fn master_command(
        &mut self,
        target: u32,
        cmds: Vec<W1NetlinkCommand>,
    ) -> Result<Vec<Vec<u8>>, TransportError> {
        let expected: Vec<W1CommandType> = cmds.iter().map(W1NetlinkCommand::cmd_type).collect();
        let seq = self.next_seq();
        debug!("master {target}: sending {expected:?}, seq {seq}");
        self.send(seq, W1NetlinkMessage::master_command(target, cmds))?;

        let mut data = vec![Vec::new(); expected.len()];
        let mut pending = VecDeque::new();
        let mut first_err: Option<TransportError> = None;
        let mut record = |e: TransportError| {
            warn!("master {target}: seq {seq}: {e}");
            first_err.get_or_insert(e);
        };

        let mut idx = 0;
        while idx < expected.len() {
            let kind = expected[idx];
            let (ack, msg) = match self.next_reply(seq, &mut pending) {
                Ok(reply) => reply,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    record(e);
                    idx += 1;
                    continue;
                }
            };

            let (status, cmd) = match msg {
                // the kernel rejected the whole message, nothing else follows
                W1NetlinkMessage::MasterCommand {
                    target: t,
                    status,
                    ref cmds,
                } if t == target && status != 0 && cmds.is_empty() => {
                    record(TransportError::KernelStatus(status));
                    break;
                }
                W1NetlinkMessage::MasterCommand {
                    target: t,
                    status,
                    mut cmds,
                } if t == target && cmds.len() == 1 => (status, cmds.remove(0)),
                other => {
                    record(TransportError::UnexpectedReply(format!("{other:?}")));
                    idx += 1;
                    continue;
                }
            };
            if cmd.cmd_type() != kind {
                record(TransportError::UnexpectedReply(format!(
                    "expected {kind:?} reply, got {:?}",
                    cmd.cmd_type()
                )));
                idx += 1;
                continue;
            }
            if status != 0 {
                record(TransportError::KernelStatus(status));
            }

            if ack == seq.wrapping_add(1) {
                // data reply, the status for this command is still to come
                if kind.has_data_reply() {
                    data[idx].extend(cmd.into_data());
                } else {
                    record(TransportError::UnexpectedReply(format!(
                        "data reply to {kind:?}"
                    )));
                }
                continue;
            }
            if ack != 0 {
                record(TransportError::UnexpectedAck { seq, actual: ack });
            }
            idx += 1;
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(data),
        }
    }
}

/// A w1 master of the kernel, reached through a netlink connector socket.
pub struct NetlinkBus<C> {
    master_id: u32,
    channel: Mutex<Channel<C>>,
}

impl<C: Connector> NetlinkBus<C> {
    pub fn new(conn: C, master_id: u32, config: NetlinkConfig) -> Self {
        Self {
            master_id,
            channel: Mutex::new(Channel::new(conn, &config)),
        }
    }

    pub fn master_id(&self) -> u32 {
        self.master_id
    }

    fn channel(&self) -> MutexGuard<'_, Channel<C>> {
        // a poisoned channel is still usable, a desync shows up as a framing error
        self.channel.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<C: Connector> Bus for NetlinkBus<C> {
    /// Strong pull-up cannot be requested through the w1 netlink interface
    /// and fails with [`TransportError::Unsupported`] without touching the
    /// bus.
    fn tx(&self, w: &[u8], r: &mut [u8], pull: Pullup) -> Result<(), Error> {
        if pull == Pullup::Strong {
            return Err(TransportError::Unsupported("strong pull-up over w1 netlink").into());
        }

        let mut cmds = vec![W1NetlinkCommand::Reset];
        if !w.is_empty() {
            cmds.push(W1NetlinkCommand::Write(w.to_vec()));
        }
        if !r.is_empty() {
            cmds.push(W1NetlinkCommand::read(r.len()));
        }

        let mut replies = self.channel().master_command(self.master_id, cmds)?;
        if !r.is_empty() {
            let data = replies.pop().unwrap_or_default();
            if data.len() != r.len() {
                return Err(TransportError::UnexpectedReply(format!(
                    "read returned {} of {} bytes",
                    data.len(),
                    r.len()
                ))
                .into());
            }
            r.copy_from_slice(&data);
        }
        Ok(())
    }

    fn search(&self, alarm_only: bool) -> Result<Vec<Address>, Error> {
        let cmds = vec![W1NetlinkCommand::search(alarm_only)];
        let ids = self
            .channel()
            .master_command(self.master_id, cmds)?
            .pop()
            .unwrap_or_default();

        let chunks = ids.chunks_exact(8);
        if !chunks.remainder().is_empty() {
            return Err(TransportError::UnexpectedReply(format!(
                "search returned {} bytes",
                ids.len()
            ))
            .into());
        }
        let devices: Vec<Address> = chunks
            .map(|c| Address(u64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])))
            .collect();
        for addr in devices.iter().filter(|a| !a.is_valid()) {
            warn!("master {}: search found {addr} with a bad CRC", self.master_id);
        }
        debug!("master {}: found {} device(s)", self.master_id, devices.len());
        Ok(devices)
    }
}

impl<C: Connector> BusCloser for NetlinkBus<C> {
    fn close(&self) -> Result<(), Error> {
        debug!("master {}: closing", self.master_id);
        self.channel().conn = None;
        Ok(())
    }
}

impl<C> fmt::Display for NetlinkBus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bus_name(self.master_id))
    }
}

/// Registry name of master `id`.
pub fn bus_name(id: u32) -> String {
    format!("w1-netlink-{id}")
}

/// Asks the kernel for the ids of all w1 masters.
pub fn list_masters<C: Connector>(conn: C, config: NetlinkConfig) -> Result<Vec<u32>, Error> {
    Ok(Channel::new(conn, &config).list_masters()?)
}

/// Lists the kernel's w1 masters through one connection from `connect` and
/// registers each one as [`bus_name`]`(id)`, numbered by its id. Opening a
/// registered bus calls `connect` again for a connection of its own.
pub fn register_masters<C, F>(
    registry: &Registry,
    config: NetlinkConfig,
    connect: F,
) -> Result<Vec<u32>, RegistryError>
where
    C: Connector + 'static,
    F: Fn() -> Result<C, TransportError> + Send + Sync + 'static,
{
    let conn = connect().map_err(Error::from)?;
    let masters = list_masters(conn, config)?;

    let connect = Arc::new(connect);
    for &id in &masters {
        let connect = Arc::clone(&connect);
        registry.register(&bus_name(id), &[], Some(id), move || {
            let bus = NetlinkBus::new((*connect)()?, id, config);
            Ok(Box::new(bus) as Box<dyn BusCloser>)
        })?;
    }
    Ok(masters)
}

/// Opens master `master_id` over a fresh netlink socket, or fails with
/// [`TransportError::Unsupported`] where netlink is unavailable.
pub fn open_netlink_bus(
    master_id: u32,
    config: NetlinkConfig,
) -> Result<NetlinkBus<NetlinkSocket>, Error> {
    if !is_supported() {
        return Err(TransportError::Unsupported("w1 netlink").into());
    }
    Ok(NetlinkBus::new(NetlinkSocket::open()?, master_id, config))
}

/// [`register_masters`] over netlink sockets.
pub fn register_netlink_masters(
    registry: &Registry,
    config: NetlinkConfig,
) -> Result<Vec<u32>, RegistryError> {
    if !is_supported() {
        return Err(Error::from(TransportError::Unsupported("w1 netlink")).into());
    }
    register_masters(registry, config, NetlinkSocket::open)
}
