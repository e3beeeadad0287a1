//! Server-side UDP host: peer table, event pump, unsequenced sends.

use super::{
    HostEvent, NetError, PacketKind, PeerId, HEADER_LEN, MAGIC, MAX_DATAGRAM,
};
use ahash::AHashMap;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use tracing::info;

/// Poll timeout for a single `service` call.
pub const SERVICE_TIMEOUT: Duration = Duration::from_millis(1);

/// A peer that has not been heard from for this long is dropped.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
    last_heard: Instant,
}

#[derive(Debug)]
struct PeerTable {
    /// Slot index is the peer id.
    slots: Vec<Option<Peer>>,
    by_addr: AHashMap<SocketAddr, PeerId>,
}

impl PeerTable {
    fn new(max_peers: usize) -> Self {
        PeerTable {
            slots: (0..max_peers).map(|_| None).collect(),
            by_addr: AHashMap::with_capacity(max_peers),
        }
    }

    fn insert(&mut self, addr: SocketAddr) -> Option<PeerId> {
        let free = self.slots.iter().position(Option::is_none)?;
        self.slots[free] = Some(Peer {
            addr,
            last_heard: Instant::now(),
        });
        let id = free as PeerId;
        self.by_addr.insert(addr, id);
        Some(id)
    }

    fn remove(&mut self, id: PeerId) -> Option<SocketAddr> {
        let peer = self.slots.get_mut(id as usize)?.take()?;
        self.by_addr.remove(&peer.addr);
        Some(peer.addr)
    }

    fn touch(&mut self, id: PeerId) {
        if let Some(Some(peer)) = self.slots.get_mut(id as usize) {
            peer.last_heard = Instant::now();
        }
    }

    fn addr_of(&self, id: PeerId) -> Option<SocketAddr> {
        self.slots.get(id as usize)?.as_ref().map(|p| p.addr)
    }

    fn expired(&self, now: Instant) -> Option<PeerId> {
        self.slots.iter().enumerate().find_map(|(id, slot)| {
            slot.as_ref()
                .filter(|peer| now.duration_since(peer.last_heard) > PEER_TIMEOUT)
                .map(|_| id as PeerId)
        })
    }
}

/// The server transport endpoint.
///
/// `service` must only ever be called from one thread (the receiver
/// worker); `send_unsequenced` and the peer queries are safe from any
/// thread concurrently with it.
#[derive(Debug)]
pub struct UdpHost {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peers: RwLock<PeerTable>,
}

impl UdpHost {
    /// Bind the host socket. `bind_addr` of `"::"` gives kernel dual-stack
    /// where the OS enables it; port 0 asks for an ephemeral port.
    pub fn bind(bind_addr: &str, port: u16, max_peers: usize) -> Result<Self, NetError> {
        let socket = UdpSocket::bind((bind_addr, port)).map_err(|source| NetError::Bind {
            addr: format!("{bind_addr}:{port}"),
            source,
        })?;
        socket.set_read_timeout(Some(SERVICE_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        Ok(UdpHost {
            socket,
            local_addr,
            peers: RwLock::new(PeerTable::new(max_peers)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().by_addr.len()
    }

    /// Fill `out` with the `(id, addr)` pairs of live peers. The caller
    /// reuses `out` across network ticks.
    pub fn connected_peers(&self, out: &mut Vec<(PeerId, SocketAddr)>) {
        out.clear();
        let table = self.peers.read();
        for (id, slot) in table.slots.iter().enumerate() {
            if let Some(peer) = slot {
                out.push((id as PeerId, peer.addr));
            }
        }
    }

    /// Pump one transport event. Blocks for at most [`SERVICE_TIMEOUT`];
    /// on an idle poll it checks for peer idle timeouts instead.
    pub fn service(&self, buf: &mut BytesMut) -> io::Result<Option<HostEvent>> {
        if buf.len() != MAX_DATAGRAM {
            buf.resize(MAX_DATAGRAM, 0);
        }
        match self.socket.recv_from(buf) {
            Ok((len, addr)) => Ok(self.handle_datagram(&buf[..len], addr)),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(self.sweep_timeouts())
            }
            Err(e) => Err(e),
        }
    }

    fn handle_datagram(&self, datagram: &[u8], addr: SocketAddr) -> Option<HostEvent> {
        if datagram.len() < HEADER_LEN || datagram[0] != MAGIC {
            return None;
        }
        let kind = PacketKind::from_u8(datagram[1])?;
        let channel = datagram[2];
        let payload = &datagram[HEADER_LEN..];

        match kind {
            PacketKind::Connect => self.handle_connect(addr),
            PacketKind::Data => {
                let mut table = self.peers.write();
                let id = *table.by_addr.get(&addr)?;
                table.touch(id);
                Some(HostEvent::Packet {
                    peer: id,
                    channel,
                    payload: Bytes::copy_from_slice(payload),
                })
            }
            PacketKind::Ping => {
                let mut table = self.peers.write();
                let id = *table.by_addr.get(&addr)?;
                table.touch(id);
                None
            }
            PacketKind::Disconnect => {
                let mut table = self.peers.write();
                let id = *table.by_addr.get(&addr)?;
                table.remove(id);
                Some(HostEvent::Disconnected { peer: id })
            }
            // Server-only frames arriving at the server are noise.
            PacketKind::Accept | PacketKind::Refuse => None,
        }
    }

    fn handle_connect(&self, addr: SocketAddr) -> Option<HostEvent> {
        let mut table = self.peers.write();
        if let Some(&id) = table.by_addr.get(&addr) {
            // Duplicate handshake; the first accept was likely lost.
            table.touch(id);
            drop(table);
            self.send_control(addr, PacketKind::Accept, Some(id));
            return None;
        }
        match table.insert(addr) {
            Some(id) => {
                drop(table);
                self.send_control(addr, PacketKind::Accept, Some(id));
                Some(HostEvent::Connected { peer: id })
            }
            None => {
                drop(table);
                info!(%addr, "refusing connection, peer table is full");
                self.send_control(addr, PacketKind::Refuse, None);
                None
            }
        }
    }

    fn sweep_timeouts(&self) -> Option<HostEvent> {
        let mut table = self.peers.write();
        let id = table.expired(Instant::now())?;
        table.remove(id);
        Some(HostEvent::TimedOut { peer: id })
    }

    fn send_control(&self, addr: SocketAddr, kind: PacketKind, peer_id: Option<PeerId>) {
        let mut buf = [0u8; MAX_DATAGRAM];
        let payload = peer_id.map(PeerId::to_le_bytes);
        let len = super::write_frame(
            &mut buf,
            kind,
            0,
            payload.as_ref().map_or(&[][..], |bytes| &bytes[..]),
        );
        // Control sends are best-effort; a lost accept is retried by the
        // client's handshake loop.
        let _ = self.socket.send_to(&buf[..len], addr);
    }

    /// Send an unsequenced payload to a connected peer. Engine-thread safe.
    pub fn send_unsequenced(
        &self,
        peer: PeerId,
        channel: u8,
        payload: &[u8],
    ) -> Result<(), NetError> {
        if payload.len() + HEADER_LEN > MAX_DATAGRAM {
            return Err(NetError::PayloadTooLarge(payload.len()));
        }
        let addr = self
            .peers
            .read()
            .addr_of(peer)
            .ok_or(NetError::UnknownPeer(peer))?;
        let mut buf = [0u8; MAX_DATAGRAM];
        let len = super::write_frame(&mut buf, PacketKind::Data, channel, payload);
        self.socket.send_to(&buf[..len], addr)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_host(max_peers: usize) -> UdpHost {
        UdpHost::bind("127.0.0.1", 0, max_peers).unwrap()
    }

    fn raw_client(host: &UdpHost) -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.connect(host.local_addr()).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    fn send_kind(socket: &UdpSocket, kind: PacketKind, payload: &[u8]) {
        let mut buf = [0u8; MAX_DATAGRAM];
        let len = super::super::write_frame(&mut buf, kind, 0, payload);
        socket.send(&buf[..len]).unwrap();
    }

    fn service_until_event(host: &UdpHost) -> HostEvent {
        let mut buf = BytesMut::new();
        for _ in 0..1000 {
            if let Some(event) = host.service(&mut buf).unwrap() {
                return event;
            }
        }
        panic!("no event within service budget");
    }

    #[test]
    fn test_connect_assigns_slot_ids_in_order() {
        let host = local_host(4);
        let a = raw_client(&host);
        let b = raw_client(&host);

        send_kind(&a, PacketKind::Connect, &[]);
        assert!(matches!(
            service_until_event(&host),
            HostEvent::Connected { peer: 0 }
        ));
        send_kind(&b, PacketKind::Connect, &[]);
        assert!(matches!(
            service_until_event(&host),
            HostEvent::Connected { peer: 1 }
        ));
        assert_eq!(host.peer_count(), 2);
    }

    #[test]
    fn test_connect_replies_with_accept_and_id() {
        let host = local_host(4);
        let client = raw_client(&host);
        send_kind(&client, PacketKind::Connect, &[]);
        service_until_event(&host);

        let mut reply = [0u8; MAX_DATAGRAM];
        let n = client.recv(&mut reply).unwrap();
        assert_eq!(reply[0], MAGIC);
        assert_eq!(reply[1], PacketKind::Accept as u8);
        assert_eq!(n, HEADER_LEN + 4);
        assert_eq!(u32::from_le_bytes(reply[3..7].try_into().unwrap()), 0);
    }

    #[test]
    fn test_full_table_refuses() {
        let host = local_host(1);
        let a = raw_client(&host);
        let b = raw_client(&host);

        send_kind(&a, PacketKind::Connect, &[]);
        service_until_event(&host);

        send_kind(&b, PacketKind::Connect, &[]);
        let mut buf = BytesMut::new();
        for _ in 0..50 {
            assert!(host.service(&mut buf).unwrap().is_none());
        }
        assert_eq!(host.peer_count(), 1);

        let mut reply = [0u8; MAX_DATAGRAM];
        let n = b.recv(&mut reply).unwrap();
        assert_eq!(reply[1], PacketKind::Refuse as u8);
        assert_eq!(n, HEADER_LEN);
    }

    #[test]
    fn test_data_from_connected_peer() {
        let host = local_host(4);
        let client = raw_client(&host);
        send_kind(&client, PacketKind::Connect, &[]);
        service_until_event(&host);

        send_kind(&client, PacketKind::Data, b"hello");
        match service_until_event(&host) {
            HostEvent::Packet {
                peer,
                channel,
                payload,
            } => {
                assert_eq!(peer, 0);
                assert_eq!(channel, 0);
                assert_eq!(&payload[..], b"hello");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_ping_refreshes_peer_without_data_event() {
        let host = local_host(4);
        let client = raw_client(&host);
        send_kind(&client, PacketKind::Connect, &[]);
        service_until_event(&host);

        let heard_at_connect = host.peers.read().slots[0].as_ref().unwrap().last_heard;
        std::thread::sleep(Duration::from_millis(10));
        send_kind(&client, PacketKind::Ping, &[]);

        // The ping must surface no event (it is not DATA), must not evict
        // the peer, and must move its last-seen time forward.
        let mut buf = BytesMut::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            assert!(host.service(&mut buf).unwrap().is_none());
            assert_eq!(host.peer_count(), 1);
            let heard = host.peers.read().slots[0].as_ref().unwrap().last_heard;
            if heard > heard_at_connect {
                break;
            }
            assert!(Instant::now() < deadline, "ping never refreshed the peer");
        }
    }

    #[test]
    fn test_data_from_stranger_ignored() {
        let host = local_host(4);
        let stranger = raw_client(&host);
        send_kind(&stranger, PacketKind::Data, b"hello");

        let mut buf = BytesMut::new();
        for _ in 0..50 {
            assert!(host.service(&mut buf).unwrap().is_none());
        }
    }

    #[test]
    fn test_garbage_datagrams_ignored() {
        let host = local_host(4);
        let socket = raw_client(&host);
        socket.send(&[0xFF, 0x01, 0x00, 0x42]).unwrap();
        socket.send(&[MAGIC]).unwrap();
        socket.send(&[MAGIC, 42, 0]).unwrap();

        let mut buf = BytesMut::new();
        for _ in 0..50 {
            assert!(host.service(&mut buf).unwrap().is_none());
        }
    }

    #[test]
    fn test_disconnect_frees_slot() {
        let host = local_host(4);
        let client = raw_client(&host);
        send_kind(&client, PacketKind::Connect, &[]);
        service_until_event(&host);

        send_kind(&client, PacketKind::Disconnect, &[]);
        assert!(matches!(
            service_until_event(&host),
            HostEvent::Disconnected { peer: 0 }
        ));
        assert_eq!(host.peer_count(), 0);

        // The freed slot is handed to the next connector.
        let next = raw_client(&host);
        send_kind(&next, PacketKind::Connect, &[]);
        assert!(matches!(
            service_until_event(&host),
            HostEvent::Connected { peer: 0 }
        ));
    }

    #[test]
    fn test_send_unsequenced_reaches_peer() {
        let host = local_host(4);
        let client = raw_client(&host);
        send_kind(&client, PacketKind::Connect, &[]);
        service_until_event(&host);
        let mut accept = [0u8; MAX_DATAGRAM];
        client.recv(&mut accept).unwrap();

        host.send_unsequenced(0, 0, b"snap").unwrap();
        let mut reply = [0u8; MAX_DATAGRAM];
        let n = client.recv(&mut reply).unwrap();
        assert_eq!(reply[1], PacketKind::Data as u8);
        assert_eq!(&reply[HEADER_LEN..n], b"snap");
    }

    #[test]
    fn test_send_to_unknown_peer_errors() {
        let host = local_host(4);
        assert!(matches!(
            host.send_unsequenced(3, 0, b"x"),
            Err(NetError::UnknownPeer(3))
        ));
    }
}
