//! Client-side connection: handshake, input sends, snapshot polling.

use super::{NetError, PacketKind, PeerId, HEADER_LEN, MAGIC, MAX_DATAGRAM};
use crate::codec::{self, ClientInput, Snapshot};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};
use tracing::warn;

/// How long to wait for an accept before resending the connect frame.
const HANDSHAKE_RETRY: Duration = Duration::from_millis(250);

/// Read timeout while draining snapshots between sends.
const POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// A connected client endpoint. Single-threaded by design; the send
/// cadence and the receive drain interleave on one loop.
#[derive(Debug)]
pub struct ClientConnection {
    socket: UdpSocket,
    server_addr: SocketAddr,
    peer_id: PeerId,
}

impl ClientConnection {
    /// Resolve `host:port`, perform the connect handshake, and return the
    /// connected endpoint. Retries the connect frame until `timeout`
    /// elapses.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, NetError> {
        let server_addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to nothing"))?;
        let bind_addr: SocketAddr = if server_addr.is_ipv6() {
            "[::]:0".parse().expect("valid any-address")
        } else {
            "0.0.0.0:0".parse().expect("valid any-address")
        };
        let socket = UdpSocket::bind(bind_addr).map_err(|source| NetError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;
        socket.connect(server_addr)?;
        socket.set_read_timeout(Some(HANDSHAKE_RETRY))?;

        let peer_id = Self::handshake(&socket, timeout)?;
        socket.set_read_timeout(Some(POLL_TIMEOUT))?;
        Ok(ClientConnection {
            socket,
            server_addr,
            peer_id,
        })
    }

    fn handshake(socket: &UdpSocket, timeout: Duration) -> Result<PeerId, NetError> {
        let deadline = Instant::now() + timeout;
        let mut frame = [0u8; MAX_DATAGRAM];
        let mut reply = [0u8; MAX_DATAGRAM];
        loop {
            let len = super::write_frame(&mut frame, PacketKind::Connect, 0, &[]);
            socket.send(&frame[..len])?;

            match socket.recv(&mut reply) {
                Ok(n) if n >= HEADER_LEN && reply[0] == MAGIC => {
                    match PacketKind::from_u8(reply[1]) {
                        Some(PacketKind::Accept) if n >= HEADER_LEN + 4 => {
                            let id_bytes = reply[HEADER_LEN..HEADER_LEN + 4]
                                .try_into()
                                .expect("sliced exactly four bytes");
                            return Ok(PeerId::from_le_bytes(id_bytes));
                        }
                        Some(PacketKind::Refuse) => return Err(NetError::Refused),
                        _ => {}
                    }
                }
                Ok(_) => {}
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(NetError::HandshakeTimeout(timeout));
            }
        }
    }

    /// The id the server assigned this connection; it is the index the
    /// server acks this client under.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Send an unsequenced payload on `channel`.
    pub fn send_unsequenced(&self, channel: u8, payload: &[u8]) -> Result<(), NetError> {
        if payload.len() + HEADER_LEN > MAX_DATAGRAM {
            return Err(NetError::PayloadTooLarge(payload.len()));
        }
        let mut frame = [0u8; MAX_DATAGRAM];
        let len = super::write_frame(&mut frame, PacketKind::Data, channel, payload);
        self.socket.send(&frame[..len])?;
        Ok(())
    }

    pub fn send_input(&self, input: &ClientInput) -> Result<(), NetError> {
        self.send_unsequenced(super::INPUT_CHANNEL, &codec::encode_input(input))
    }

    /// Keepalive for idle periods so the server's idle timeout stays quiet.
    pub fn send_ping(&self) -> Result<(), NetError> {
        let mut frame = [0u8; MAX_DATAGRAM];
        let len = super::write_frame(&mut frame, PacketKind::Ping, 0, &[]);
        self.socket.send(&frame[..len])?;
        Ok(())
    }

    /// Poll for one snapshot. Returns `Ok(None)` when nothing (or nothing
    /// usable) is waiting within the poll timeout; the caller loops until
    /// then to drain the socket between sends.
    pub fn poll_snapshot(&self) -> Result<Option<Snapshot>, NetError> {
        let mut reply = [0u8; MAX_DATAGRAM];
        let n = match self.socket.recv(&mut reply) {
            Ok(n) => n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };

        if n < HEADER_LEN || reply[0] != MAGIC {
            return Ok(None);
        }
        if PacketKind::from_u8(reply[1]) != Some(PacketKind::Data)
            || reply[2] != super::INPUT_CHANNEL
        {
            return Ok(None);
        }
        match codec::parse_snapshot(&reply[HEADER_LEN..n]) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!("dropping malformed snapshot: {e}");
                Ok(None)
            }
        }
    }

    /// Graceful teardown: announce the disconnect, then keep draining the
    /// socket for `drain` so in-flight snapshots are consumed before the
    /// port closes.
    pub fn disconnect(self, drain: Duration) {
        let mut frame = [0u8; MAX_DATAGRAM];
        let len = super::write_frame(&mut frame, PacketKind::Disconnect, 0, &[]);
        let _ = self.socket.send(&frame[..len]);

        let deadline = Instant::now() + drain;
        let mut sink = [0u8; MAX_DATAGRAM];
        while Instant::now() < deadline {
            match self.socket.recv(&mut sink) {
                Ok(_) => {}
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(_) => break,
            }
        }
    }
}
