use std::io;

#[cfg(target_os = "linux")]
use netlink_sys::{protocols::NETLINK_CONNECTOR, Socket, SocketAddr};

use super::Connector;
use crate::error::TransportError;

/// Whether this build can reach the kernel w1 subsystem.
pub fn is_supported() -> bool {
    cfg!(target_os = "linux")
}

/// `AF_NETLINK` / `NETLINK_CONNECTOR` datagram socket talking to the kernel.
pub struct NetlinkSocket {
    #[cfg(target_os = "linux")]
    socket: Socket,
    #[cfg(not(target_os = "linux"))]
    _unsupported: std::convert::Infallible,
}

impl NetlinkSocket {
    /// Opens a socket bound to an all-zero address, letting the kernel pick
    /// the port, and connected to the kernel.
    #[cfg(target_os = "linux")]
    pub fn open() -> Result<Self, TransportError> {
        let mut socket = Socket::new(NETLINK_CONNECTOR)?;
        socket.bind(&SocketAddr::new(0, 0))?;

        let kernel_addr = SocketAddr::new(0, 0);
        socket.connect(&kernel_addr)?;
        log::debug!("netlink connector socket open");
        Ok(Self { socket })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open() -> Result<Self, TransportError> {
        Err(TransportError::Unsupported("netlink connector socket"))
    }
}

#[cfg(target_os = "linux")]
impl Connector for NetlinkSocket {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf, 0)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(&mut &mut buf[..], 0)
    }
}

#[cfg(not(target_os = "linux"))]
impl Connector for NetlinkSocket {
    fn send(&mut self, _buf: &[u8]) -> io::Result<usize> {
        match self._unsupported {}
    }

    fn recv(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        match self._unsupported {}
    }
}
