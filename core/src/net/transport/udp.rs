//! UDP transport
//!
//! A non-blocking [`UdpSocket`] with a small connection layer on top:
//! connect/accept handshake, per-peer reliable-ordered channel, heartbeats
//! and peer timeouts. Every datagram is one framed [`Packet`].

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Instant;

use hashbrown::HashMap;

use super::packet::Packet;
use super::reliable::{ReliableReceiver, ReliableSender};
use super::{
    Channel, ConnectionResult, DisconnectReason, Transport, TransportError, TransportEvent,
};
use crate::config::TransportConfig;

/// Buffer size for incoming datagrams
const RECV_BUFFER_SIZE: usize = 2048;

enum PeerState {
    /// We sent `ConnectRequest` and are waiting for `ConnectAccept`
    Connecting {
        started: Instant,
        last_request: Option<Instant>,
    },
    Connected,
}

struct Peer {
    state: PeerState,
    sender: ReliableSender,
    receiver: ReliableReceiver,
    /// Unreliable sends and control packets waiting for `process_send`
    outbox: Vec<Packet>,
    unreliable_sequence: u32,
    last_heard: Instant,
    last_sent: Instant,
}

impl Peer {
    fn connecting(now: Instant) -> Self {
        Self::new(
            PeerState::Connecting {
                started: now,
                last_request: None,
            },
            now,
        )
    }

    fn connected(now: Instant) -> Self {
        Self::new(PeerState::Connected, now)
    }

    fn new(state: PeerState, now: Instant) -> Self {
        Self {
            state,
            sender: ReliableSender::default(),
            receiver: ReliableReceiver::default(),
            outbox: Vec::new(),
            unreliable_sequence: 0,
            last_heard: now,
            last_sent: now,
        }
    }

    fn is_connected(&self) -> bool {
        matches!(self.state, PeerState::Connected)
    }
}

/// UDP implementation of [`Transport`]
///
/// # Example
///
/// ```rust,ignore
/// use tictac_core::config::TransportConfig;
/// use tictac_core::net::transport::{Transport, UdpTransport};
///
/// let mut host = UdpTransport::new(TransportConfig::default());
/// host.open(8888)?;
///
/// let mut client = UdpTransport::new(TransportConfig::default());
/// client.open(0)?;
/// client.connect("127.0.0.1:8888".parse()?);
///
/// loop {
///     host.receive();
///     for event in host.poll() { /* accept, read data */ }
///     host.process_send();
/// }
/// ```
pub struct UdpTransport {
    config: TransportConfig,
    socket: Option<UdpSocket>,
    recv_buf: Vec<u8>,
    /// Decoded packets waiting for `poll`
    inbound: VecDeque<(SocketAddr, Packet)>,
    peers: HashMap<SocketAddr, Peer>,
    /// Remotes that asked to connect and have not been accepted yet
    pending: HashMap<SocketAddr, Instant>,
    /// Events produced outside `poll` (accepting a pending connection)
    events: Vec<TransportEvent>,
}

impl UdpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            socket: None,
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
            inbound: VecDeque::new(),
            peers: HashMap::new(),
            pending: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Address the socket is bound to, if open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Number of peers with a completed handshake
    pub fn connected_peers(&self) -> usize {
        self.peers.values().filter(|p| p.is_connected()).count()
    }

    fn handle_packet(&mut self, from: SocketAddr, packet: Packet, now: Instant) {
        match packet {
            Packet::ConnectRequest => self.handle_connect_request(from, now),
            Packet::ConnectAccept => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.last_heard = now;
                    if !peer.is_connected() {
                        peer.state = PeerState::Connected;
                        tracing::debug!(%from, "Connection accepted");
                        self.events.push(TransportEvent::Connection {
                            from,
                            result: ConnectionResult::Success,
                        });
                    }
                }
            }
            Packet::Disconnect => {
                self.pending.remove(&from);
                if let Some(peer) = self.peers.remove(&from) {
                    tracing::debug!(%from, "Peer disconnected");
                    self.events.push(if peer.is_connected() {
                        TransportEvent::Disconnection {
                            from,
                            reason: DisconnectReason::Remote,
                        }
                    } else {
                        TransportEvent::Connection {
                            from,
                            result: ConnectionResult::Failure,
                        }
                    });
                }
            }
            Packet::Heartbeat => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.last_heard = now;
                }
            }
            Packet::Ack { sequence } => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.last_heard = now;
                    peer.sender.ack(sequence);
                }
            }
            Packet::Data {
                channel,
                sequence,
                payload,
            } => self.handle_data(from, channel, sequence, payload, now),
        }
    }

    fn handle_connect_request(&mut self, from: SocketAddr, now: Instant) {
        match self.peers.get_mut(&from) {
            Some(peer) if peer.is_connected() => {
                // Our accept was lost
                peer.last_heard = now;
                peer.outbox.push(Packet::ConnectAccept);
            }
            Some(_) => {
                tracing::trace!(%from, "Ignoring ConnectRequest from a peer we are connecting to");
            }
            None => {
                if self.pending.contains_key(&from) {
                    return;
                }
                tracing::debug!(%from, "Incoming connection");
                self.pending.insert(from, now);
                self.events.push(TransportEvent::IncomingConnection { from });
            }
        }
    }

    fn handle_data(
        &mut self,
        from: SocketAddr,
        channel: Channel,
        sequence: u32,
        payload: Vec<u8>,
        now: Instant,
    ) {
        let Some(peer) = self.peers.get_mut(&from) else {
            tracing::trace!(%from, "Dropping data from unknown peer");
            return;
        };
        peer.last_heard = now;

        if !peer.is_connected() {
            // The accept was lost or overtaken; data proves the host accepted us
            peer.state = PeerState::Connected;
            tracing::debug!(%from, "Connection implicitly accepted");
            self.events.push(TransportEvent::Connection {
                from,
                result: ConnectionResult::Success,
            });
        }

        match channel {
            Channel::ReliableOrdered => {
                peer.outbox.push(Packet::Ack { sequence });
                for data in peer.receiver.accept(sequence, payload) {
                    self.events.push(TransportEvent::UserData { from, data });
                }
            }
            Channel::Unreliable => {
                self.events.push(TransportEvent::UserData {
                    from,
                    data: payload,
                });
            }
        }
    }

    fn check_timers(&mut self, now: Instant) {
        let connect_timeout = self.config.connect_timeout();
        let peer_timeout = self.config.peer_timeout();

        let mut expired = Vec::new();
        for (&addr, peer) in &self.peers {
            match peer.state {
                PeerState::Connecting { started, .. }
                    if now.duration_since(started) >= connect_timeout =>
                {
                    expired.push((
                        addr,
                        TransportEvent::Connection {
                            from: addr,
                            result: ConnectionResult::Failure,
                        },
                    ));
                }
                PeerState::Connected if now.duration_since(peer.last_heard) >= peer_timeout => {
                    expired.push((
                        addr,
                        TransportEvent::Disconnection {
                            from: addr,
                            reason: DisconnectReason::Timeout,
                        },
                    ));
                }
                _ => {}
            }
        }
        for (addr, event) in expired {
            tracing::debug!(%addr, ?event, "Peer timed out");
            self.peers.remove(&addr);
            self.events.push(event);
        }

        self.pending
            .retain(|_, asked| now.duration_since(*asked) < connect_timeout);
    }

    /// Receive all available datagrams from the socket
    fn recv_all(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        loop {
            match socket.recv_from(&mut self.recv_buf) {
                Ok((len, from)) => match Packet::from_bytes(&self.recv_buf[..len]) {
                    Ok(packet) => {
                        tracing::trace!(%from, ?packet, "Received packet");
                        self.inbound.push_back((from, packet));
                    }
                    Err(e) => {
                        tracing::warn!(%from, error = %e, "Dropping malformed datagram");
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // No more data available
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    // ICMP port unreachable surfaced on some platforms; the peer timeout handles it
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Receive error");
                    break;
                }
            }
        }
    }
}

fn send_packet(socket: &UdpSocket, to: SocketAddr, packet: &Packet) {
    match socket.send_to(&packet.to_bytes(), to) {
        Ok(_) => tracing::trace!(%to, ?packet, "Sent packet"),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            tracing::trace!(%to, "Send buffer full, packet dropped");
        }
        Err(e) => tracing::warn!(%to, error = %e, "Send error"),
    }
}

impl Transport for UdpTransport {
    fn open(&mut self, local_port: u16) -> Result<SocketAddr, TransportError> {
        if self.socket.is_some() {
            return Err(TransportError::AlreadyOpen);
        }

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port));
        let socket = UdpSocket::bind(bind_addr).map_err(|source| TransportError::Bind {
            port: local_port,
            source,
        })?;
        socket
            .set_nonblocking(true)
            .map_err(TransportError::SocketOption)?;
        let local_addr = socket
            .local_addr()
            .map_err(TransportError::SocketOption)?;

        tracing::debug!(port = local_addr.port(), "UdpTransport bound");
        self.socket = Some(socket);
        Ok(local_addr)
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            for addr in self.peers.keys() {
                send_packet(&socket, *addr, &Packet::Disconnect);
            }
            tracing::debug!(peers = self.peers.len(), "UdpTransport closed");
        }
        self.peers.clear();
        self.pending.clear();
        self.inbound.clear();
        self.events.clear();
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn connect(&mut self, addr: SocketAddr) {
        let now = Instant::now();
        if self.pending.remove(&addr).is_some() {
            let mut peer = Peer::connected(now);
            peer.outbox.push(Packet::ConnectAccept);
            self.peers.insert(addr, peer);
            tracing::debug!(%addr, "Accepted incoming connection");
            self.events.push(TransportEvent::Connection {
                from: addr,
                result: ConnectionResult::Success,
            });
            return;
        }
        if self.peers.contains_key(&addr) {
            return;
        }
        // The socket is bound to an IPv4 address
        if !addr.is_ipv4() {
            tracing::warn!(%addr, "Cannot reach a non-IPv4 address");
            self.events.push(TransportEvent::Connection {
                from: addr,
                result: ConnectionResult::Failure,
            });
            return;
        }
        tracing::debug!(%addr, "Connecting");
        self.peers.insert(addr, Peer::connecting(now));
    }

    fn send_to(&mut self, addr: SocketAddr, data: &[u8], channel: Channel) -> bool {
        if self.socket.is_none() {
            return false;
        }
        let Some(peer) = self.peers.get_mut(&addr) else {
            return false;
        };
        match channel {
            // Queued reliably even while connecting; sent once connected
            Channel::ReliableOrdered => {
                peer.sender.push(data.to_vec());
            }
            Channel::Unreliable => {
                if !peer.is_connected() {
                    return false;
                }
                let sequence = peer.unreliable_sequence;
                peer.unreliable_sequence = peer.unreliable_sequence.wrapping_add(1);
                peer.outbox.push(Packet::Data {
                    channel,
                    sequence,
                    payload: data.to_vec(),
                });
            }
        }
        true
    }

    fn receive(&mut self) {
        self.recv_all();
    }

    fn process_send(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let now = Instant::now();
        let resend = self.config.resend_interval();
        let heartbeat = self.config.heartbeat_interval();

        for (&addr, peer) in self.peers.iter_mut() {
            match &mut peer.state {
                PeerState::Connecting { last_request, .. } => {
                    if last_request.is_none_or(|at| now.duration_since(at) >= resend) {
                        *last_request = Some(now);
                        send_packet(socket, addr, &Packet::ConnectRequest);
                        peer.last_sent = now;
                    }
                }
                PeerState::Connected => {
                    let mut sent = false;
                    for packet in peer.outbox.drain(..) {
                        send_packet(socket, addr, &packet);
                        sent = true;
                    }
                    for (sequence, payload) in peer.sender.due(now, resend) {
                        let packet = Packet::Data {
                            channel: Channel::ReliableOrdered,
                            sequence,
                            payload,
                        };
                        send_packet(socket, addr, &packet);
                        sent = true;
                    }
                    if sent {
                        peer.last_sent = now;
                    } else if now.duration_since(peer.last_sent) >= heartbeat {
                        send_packet(socket, addr, &Packet::Heartbeat);
                        peer.last_sent = now;
                    }
                }
            }
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let now = Instant::now();
        while let Some((from, packet)) = self.inbound.pop_front() {
            self.handle_packet(from, packet, now);
        }
        self.check_timers(now);
        std::mem::take(&mut self.events)
    }

    fn has_unacked(&self) -> bool {
        self.peers
            .values()
            .any(|peer| {
                peer.is_connected() && (peer.sender.in_flight() > 0 || !peer.outbox.is_empty())
            })
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
