//! In-process transport
//!
//! [`MemoryNetwork`] is a shared hub of mailboxes keyed by loopback address.
//! Each [`MemoryTransport`] bound on it behaves like a [`super::UdpTransport`]
//! with a perfect link: same handshake, same events, no loss, no timers.
//! Datagrams only move on `process_send`, so several participants can be
//! stepped deterministically from one thread.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};

use super::{
    Channel, ConnectionResult, DisconnectReason, Transport, TransportError, TransportEvent,
};

/// First port handed out for `open(0)`
const FIRST_EPHEMERAL_PORT: u16 = 49152;

#[derive(Debug, Clone)]
enum Envelope {
    ConnectRequest,
    ConnectAccept,
    Disconnect,
    Data(Vec<u8>),
}

#[derive(Default)]
struct Hub {
    mailboxes: HashMap<SocketAddr, VecDeque<(SocketAddr, Envelope)>>,
    next_ephemeral: u16,
}

impl Hub {
    fn deliver(&mut self, from: SocketAddr, to: SocketAddr, envelope: Envelope) -> bool {
        match self.mailboxes.get_mut(&to) {
            Some(mailbox) => {
                mailbox.push_back((from, envelope));
                true
            }
            None => false,
        }
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

/// Shared in-process network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unbound endpoint on this network
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            addr: None,
            connecting: HashSet::new(),
            connected: HashSet::new(),
            pending: HashSet::new(),
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Simulate a dropped link between two bound endpoints
    ///
    /// Each side receives a disconnect from the other on its next poll.
    pub fn sever(&self, a: SocketAddr, b: SocketAddr) {
        let mut hub = self.hub.borrow_mut();
        hub.deliver(b, a, Envelope::Disconnect);
        hub.deliver(a, b, Envelope::Disconnect);
    }

    /// Whether some endpoint is bound at `addr`
    pub fn is_bound(&self, addr: SocketAddr) -> bool {
        self.hub.borrow().mailboxes.contains_key(&addr)
    }
}

/// Endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    network: MemoryNetwork,
    addr: Option<SocketAddr>,
    connecting: HashSet<SocketAddr>,
    connected: HashSet<SocketAddr>,
    pending: HashSet<SocketAddr>,
    outbox: Vec<(SocketAddr, Envelope)>,
    events: Vec<TransportEvent>,
}

impl MemoryTransport {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    fn handle(&mut self, from: SocketAddr, envelope: Envelope) {
        match envelope {
            Envelope::ConnectRequest => {
                if self.connected.contains(&from) {
                    self.outbox.push((from, Envelope::ConnectAccept));
                } else if self.pending.insert(from) {
                    self.events.push(TransportEvent::IncomingConnection { from });
                }
            }
            Envelope::ConnectAccept => {
                if self.connecting.remove(&from) {
                    self.connected.insert(from);
                    self.events.push(TransportEvent::Connection {
                        from,
                        result: ConnectionResult::Success,
                    });
                }
            }
            Envelope::Disconnect => {
                self.pending.remove(&from);
                if self.connected.remove(&from) {
                    self.events.push(TransportEvent::Disconnection {
                        from,
                        reason: DisconnectReason::Remote,
                    });
                } else if self.connecting.remove(&from) {
                    self.events.push(TransportEvent::Connection {
                        from,
                        result: ConnectionResult::Failure,
                    });
                }
            }
            Envelope::Data(data) => {
                if self.connecting.remove(&from) {
                    self.connected.insert(from);
                    self.events.push(TransportEvent::Connection {
                        from,
                        result: ConnectionResult::Success,
                    });
                }
                if self.connected.contains(&from) {
                    self.events.push(TransportEvent::UserData { from, data });
                } else {
                    tracing::trace!(%from, "Dropping data from unknown peer");
                }
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, local_port: u16) -> Result<SocketAddr, TransportError> {
        if self.addr.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        let mut hub = self.network.hub.borrow_mut();

        let port = if local_port == 0 {
            let mut port = FIRST_EPHEMERAL_PORT.max(hub.next_ephemeral);
            while hub.mailboxes.contains_key(&loopback(port)) {
                port = port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
            }
            hub.next_ephemeral = port.wrapping_add(1);
            port
        } else {
            local_port
        };

        let addr = loopback(port);
        if hub.mailboxes.contains_key(&addr) {
            return Err(TransportError::Bind {
                port,
                source: io::Error::new(io::ErrorKind::AddrInUse, "address already bound"),
            });
        }
        hub.mailboxes.insert(addr, VecDeque::new());
        drop(hub);

        tracing::debug!(%addr, "MemoryTransport bound");
        self.addr = Some(addr);
        Ok(addr)
    }

    fn close(&mut self) {
        let Some(addr) = self.addr.take() else {
            return;
        };
        let mut hub = self.network.hub.borrow_mut();
        for peer in self.connected.iter().chain(&self.connecting) {
            hub.deliver(addr, *peer, Envelope::Disconnect);
        }
        hub.mailboxes.remove(&addr);
        drop(hub);

        self.connecting.clear();
        self.connected.clear();
        self.pending.clear();
        self.outbox.clear();
        self.events.clear();
    }

    fn is_open(&self) -> bool {
        self.addr.is_some()
    }

    fn connect(&mut self, addr: SocketAddr) {
        if self.pending.remove(&addr) {
            self.connected.insert(addr);
            self.outbox.push((addr, Envelope::ConnectAccept));
            self.events.push(TransportEvent::Connection {
                from: addr,
                result: ConnectionResult::Success,
            });
        } else if !self.connected.contains(&addr) && self.connecting.insert(addr) {
            self.outbox.push((addr, Envelope::ConnectRequest));
        }
    }

    fn send_to(&mut self, addr: SocketAddr, data: &[u8], _channel: Channel) -> bool {
        if self.addr.is_none() || !(self.connected.contains(&addr) || self.connecting.contains(&addr)) {
            return false;
        }
        self.outbox.push((addr, Envelope::Data(data.to_vec())));
        true
    }

    fn receive(&mut self) {
        // Mail is read straight from the hub in `poll`
    }

    fn process_send(&mut self) {
        let Some(from) = self.addr else {
            return;
        };
        let mut hub = self.network.hub.borrow_mut();
        for (to, envelope) in self.outbox.drain(..) {
            let is_request = matches!(envelope, Envelope::ConnectRequest);
            if hub.deliver(from, to, envelope) {
                continue;
            }
            if is_request {
                tracing::debug!(%to, "Nobody bound at address");
                self.connecting.remove(&to);
                self.events.push(TransportEvent::Connection {
                    from: to,
                    result: ConnectionResult::Failure,
                });
            } else {
                tracing::trace!(%to, "Dropping envelope for unbound address");
            }
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let Some(addr) = self.addr else {
            return Vec::new();
        };
        let mail: Vec<_> = self
            .network
            .hub
            .borrow_mut()
            .mailboxes
            .get_mut(&addr)
            .map(|mailbox| mailbox.drain(..).collect())
            .unwrap_or_default();

        for (from, envelope) in mail {
            self.handle(from, envelope);
        }
        std::mem::take(&mut self.events)
    }

    /// Delivery is immediate, so only the unsent outbox counts
    fn has_unacked(&self) -> bool {
        !self.outbox.is_empty()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(network: &MemoryNetwork, port: u16) -> (MemoryTransport, SocketAddr) {
        let mut transport = network.transport();
        let addr = transport.open(port).unwrap();
        (transport, addr)
    }

    /// Step both ends until neither produces events
    fn handshake(host: &mut MemoryTransport, client: &mut MemoryTransport, host_addr: SocketAddr) {
        client.connect(host_addr);
        client.process_send();
        let events = host.poll();
        let client_addr = client.local_addr().unwrap();
        assert_eq!(
            events,
            vec![TransportEvent::IncomingConnection { from: client_addr }]
        );
        host.connect(client_addr);
        host.process_send();
        assert_eq!(
            client.poll(),
            vec![TransportEvent::Connection {
                from: host_addr,
                result: ConnectionResult::Success
            }]
        );
        assert_eq!(
            host.poll(),
            vec![TransportEvent::Connection {
                from: client_addr,
                result: ConnectionResult::Success
            }]
        );
    }

    #[test]
    fn test_ephemeral_ports_are_distinct() {
        let network = MemoryNetwork::new();
        let (_a, a) = bound(&network, 0);
        let (_b, b) = bound(&network, 0);
        assert_ne!(a, b);
        assert_eq!(a.ip(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_port_in_use() {
        let network = MemoryNetwork::new();
        let (_a, _) = bound(&network, 8888);
        let mut b = network.transport();
        assert!(matches!(b.open(8888), Err(TransportError::Bind { port: 8888, .. })));
    }

    #[test]
    fn test_handshake_and_data() {
        let network = MemoryNetwork::new();
        let (mut host, host_addr) = bound(&network, 8888);
        let (mut client, client_addr) = bound(&network, 0);
        handshake(&mut host, &mut client, host_addr);

        assert!(client.send_to(host_addr, &[1, 2], Channel::ReliableOrdered));
        assert!(client.send_to(host_addr, &[3], Channel::ReliableOrdered));
        client.process_send();
        assert_eq!(
            host.poll(),
            vec![
                TransportEvent::UserData {
                    from: client_addr,
                    data: vec![1, 2]
                },
                TransportEvent::UserData {
                    from: client_addr,
                    data: vec![3]
                },
            ]
        );
    }

    #[test]
    fn test_connect_to_unbound_address_fails() {
        let network = MemoryNetwork::new();
        let (mut client, _) = bound(&network, 0);
        let nowhere = loopback(9999);
        client.connect(nowhere);
        client.process_send();
        assert_eq!(
            client.poll(),
            vec![TransportEvent::Connection {
                from: nowhere,
                result: ConnectionResult::Failure
            }]
        );
        assert!(!client.send_to(nowhere, &[0], Channel::ReliableOrdered));
    }

    #[test]
    fn test_sever_disconnects_both_sides() {
        let network = MemoryNetwork::new();
        let (mut host, host_addr) = bound(&network, 8888);
        let (mut client, client_addr) = bound(&network, 0);
        handshake(&mut host, &mut client, host_addr);

        network.sever(host_addr, client_addr);
        assert_eq!(
            host.poll(),
            vec![TransportEvent::Disconnection {
                from: client_addr,
                reason: DisconnectReason::Remote
            }]
        );
        assert_eq!(
            client.poll(),
            vec![TransportEvent::Disconnection {
                from: host_addr,
                reason: DisconnectReason::Remote
            }]
        );
    }

    #[test]
    fn test_close_notifies_peers_and_unbinds() {
        let network = MemoryNetwork::new();
        let (mut host, host_addr) = bound(&network, 8888);
        let (mut client, client_addr) = bound(&network, 0);
        handshake(&mut host, &mut client, host_addr);

        client.close();
        assert!(!network.is_bound(client_addr));
        assert_eq!(
            host.poll(),
            vec![TransportEvent::Disconnection {
                from: client_addr,
                reason: DisconnectReason::Remote
            }]
        );
    }
}
