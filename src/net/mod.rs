//! Minimal unreliable-datagram transport adapter.
//!
//! Stands in for a reliable-UDP library behind a small surface: a server
//! [`host::UdpHost`] that is serviced by the receiver worker and sent to by
//! the engine, and a [`client::ClientConnection`] mirror. Only the
//! unsequenced delivery class is implemented; the control plane is a
//! connect/accept/refuse/disconnect/ping handshake with idle timeouts.
//!
//! Thread model: `service` runs exclusively on the receiver thread, sends
//! run on the engine (or client) thread. `send_to`/`recv_from` are
//! independently thread-safe syscalls; the shared peer table is behind a
//! `RwLock`, which is the adapter-level serialization the two-thread
//! split requires.

pub mod client;
pub mod host;
pub mod receiver;

pub use client::ClientConnection;
pub use host::UdpHost;
pub use receiver::ReceiverWorker;

use bytes::Bytes;
use std::io;
use thiserror::Error;

/// Transport-assigned peer index; doubles as the ack-table index.
pub type PeerId = u32;

/// Number of logical channels carried in the frame header.
pub const CHANNEL_COUNT: u8 = 2;
/// Channel inputs and snapshots travel on.
pub const INPUT_CHANNEL: u8 = 0;
/// Largest datagram the adapter will send or accept, header included.
pub const MAX_DATAGRAM: usize = 1200;

pub(crate) const MAGIC: u8 = 0xC7;
pub(crate) const HEADER_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum PacketKind {
    Connect = 1,
    Accept = 2,
    Refuse = 3,
    Data = 4,
    Disconnect = 5,
    Ping = 6,
}

impl PacketKind {
    pub(crate) fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(PacketKind::Connect),
            2 => Some(PacketKind::Accept),
            3 => Some(PacketKind::Refuse),
            4 => Some(PacketKind::Data),
            5 => Some(PacketKind::Disconnect),
            6 => Some(PacketKind::Ping),
            _ => None,
        }
    }
}

/// Write a `[magic, kind, channel] payload` frame into `buf`; returns the
/// frame length. Callers bound `payload` by [`MAX_DATAGRAM`] beforehand.
pub(crate) fn write_frame(
    buf: &mut [u8; MAX_DATAGRAM],
    kind: PacketKind,
    channel: u8,
    payload: &[u8],
) -> usize {
    debug_assert!(payload.len() + HEADER_LEN <= MAX_DATAGRAM);
    buf[0] = MAGIC;
    buf[1] = kind as u8;
    buf[2] = channel;
    buf[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    HEADER_LEN + payload.len()
}

/// One transport event, as surfaced to the receiver worker.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A new peer completed the handshake.
    Connected { peer: PeerId },
    /// A data payload arrived from a connected peer.
    Packet {
        peer: PeerId,
        channel: u8,
        payload: Bytes,
    },
    /// A peer requested disconnection.
    Disconnected { peer: PeerId },
    /// A peer went silent past the idle limit and was dropped.
    TimedOut { peer: PeerId },
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("server refused the connection (peer table full)")]
    Refused,
    #[error("no handshake response within {0:?}")]
    HandshakeTimeout(std::time::Duration),
    #[error("peer {0} is not connected")]
    UnknownPeer(PeerId),
    #[error("payload of {0} bytes exceeds the datagram limit")]
    PayloadTooLarge(usize),
}
