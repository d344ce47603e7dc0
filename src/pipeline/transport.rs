use std::{
    io::ErrorKind,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use crate::{error::TransmissionError, pipeline::encoder::Packet};

/// Largest payload a single IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

pub trait PacketSink {
    fn send(&mut self, packet: &Packet) -> Result<(), TransmissionError>;
}

/// Best-effort datagram sender bound to one destination.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpTransport {
    pub fn open(destination: SocketAddr) -> std::io::Result<Self> {
        let local: SocketAddr = if destination.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;

        log::info!(
            "sending landmarks from {} to {destination}",
            socket.local_addr()?
        );
        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn send_bytes(&self, payload: &[u8]) -> Result<(), TransmissionError> {
        if payload.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(TransmissionError::Oversize {
                len: payload.len(),
                max: MAX_DATAGRAM_PAYLOAD,
            });
        }
        self.socket.send_to(payload, self.destination)?;
        Ok(())
    }
}

impl PacketSink for UdpTransport {
    fn send(&mut self, packet: &Packet) -> Result<(), TransmissionError> {
        let payload = packet.to_bytes()?;
        self.send_bytes(&payload)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        log::debug!("closing socket for {}", self.destination);
    }
}

/// Summary of one received datagram.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedPacket {
    pub source: SocketAddr,
    pub bytes: usize,
    pub packet: Packet,
}

/// Receiving end used to inspect what a consumer would see.
#[derive(Debug)]
pub struct PacketMonitor {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl PacketMonitor {
    pub fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(Duration::from_millis(250)))?;
        Ok(Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM_PAYLOAD],
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits briefly for one datagram. `Ok(None)` means nothing arrived
    /// before the read timeout.
    pub fn recv(&mut self) -> anyhow::Result<Option<ReceivedPacket>> {
        let (bytes, source) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let packet = Packet::from_bytes(&self.buf[..bytes])?;
        Ok(Some(ReceivedPacket {
            source,
            bytes,
            packet,
        }))
    }
}
