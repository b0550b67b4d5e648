use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use thiserror::Error;
use tracing::debug;

/// Fire-and-forget delivery of one payload.
///
/// Implementations must not block for long: a failed or timed out send is returned as an error and the
/// caller moves on.
pub trait Sender {
    fn send(&mut self, payload: &[u8]) -> io::Result<usize>;
}

impl<S: Sender + ?Sized> Sender for Box<S> {
    fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        (**self).send(payload)
    }
}

/// Possible errors while setting up the UDP socket
#[derive(Error, Debug)]
pub enum SenderError {
    #[error("while binding local UDP socket")]
    Bind(#[source] io::Error),
    #[error("while configuring send timeout")]
    Timeout(#[source] io::Error),
}

/// Sends every payload as one datagram to a fixed destination.
pub struct UdpSender {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpSender {
    /// Bind an ephemeral local port of the destination's address family. `send_timeout` must be non-zero.
    pub fn new(destination: SocketAddr, send_timeout: Duration) -> Result<Self, SenderError> {
        let local: SocketAddr = match destination {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).map_err(SenderError::Bind)?;
        socket
            .set_write_timeout(Some(send_timeout))
            .map_err(SenderError::Timeout)?;
        debug!(%destination, timeout_ms = send_timeout.as_millis() as u64, "UDP socket ready");
        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Sender for UdpSender {
    fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, self.destination)
    }
}
