//! Session transport service
//!
//! [`NetService`] owns a [`Transport`] and gives the game layer a small set of
//! send primitives that work the same whether the session is networked or
//! not. Anything addressed to the local participant never touches the
//! network: it goes into a loopback queue and comes back through
//! [`NetService::process`] like any other received message.
//!
//! # Lifecycle
//!
//! ```text
//!        init(Parameters)
//!   Idle ─────────────────> Initialized ──┐ receive() / process() / flush()
//!    ^                          │  ^      │ send_to*() / send_all()
//!    └──────── release() ───────┘  └──────┘
//! ```
//!
//! Listeners ([`NetListener`]) are called synchronously from `init`,
//! `release` and `process`, with the service itself as an argument so they
//! can send while events are being dispatched.


use std::cell::RefCell;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::rc::Rc;

use super::transport::{
    Channel, ConnectionResult, DisconnectReason, Transport, TransportError, TransportEvent,
    UdpTransport,
};
use crate::config::{NetworkConfig, TransportConfig};

/// Role of this participant in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkType {
    /// Solo: no transport, everything loops back
    #[default]
    None,
    /// Connects to a host
    Client,
    /// Plays and hosts
    Host,
    /// Hosts without playing
    DedicatedServer,
}

impl NetworkType {
    pub fn is_networked(self) -> bool {
        self != Self::None
    }

    /// Host or dedicated server
    pub fn is_host(self) -> bool {
        matches!(self, Self::Host | Self::DedicatedServer)
    }

    pub fn is_dedicated_server(self) -> bool {
        self == Self::DedicatedServer
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "solo",
            Self::Client => "client",
            Self::Host => "host",
            Self::DedicatedServer => "dedicated server",
        };
        f.write_str(name)
    }
}

/// Initialization parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    /// Where the host listens (used by clients)
    pub host_address: SocketAddr,
    /// Port to bind locally; 0 for an ephemeral port
    pub local_port: u16,
    pub network_type: NetworkType,
}

impl Parameters {
    pub fn solo(local_port: u16) -> Self {
        Self {
            host_address: loopback(local_port),
            local_port,
            network_type: NetworkType::None,
        }
    }

    pub fn client(host_address: SocketAddr) -> Self {
        Self {
            host_address,
            local_port: 0,
            network_type: NetworkType::Client,
        }
    }

    pub fn host(local_port: u16) -> Self {
        Self {
            host_address: loopback(local_port),
            local_port,
            network_type: NetworkType::Host,
        }
    }

    pub fn dedicated_server(local_port: u16) -> Self {
        Self {
            network_type: NetworkType::DedicatedServer,
            ..Self::host(local_port)
        }
    }

    /// Parameters for `network_type` using the configured addresses
    pub fn from_config(config: &NetworkConfig, network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::None => Self::solo(config.port),
            NetworkType::Client => Self::client(config.host_address),
            NetworkType::Host => Self::host(config.port),
            NetworkType::DedicatedServer => Self::dedicated_server(config.port),
        }
    }
}

/// Service lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Initialized,
}

/// Service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service is not initialized")]
    NotInitialized,
    #[error("service is already initialized")]
    AlreadyInitialized,
    #[error("only the host may send to remotes")]
    NotAuthority,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Observer of service events
///
/// Every method has a no-op default, so a listener only implements what it
/// cares about.
pub trait NetListener {
    fn on_service_initialized(&mut self, _service: &mut NetService) {}

    fn on_service_released(&mut self, _service: &mut NetService) {}

    /// Vote on an incoming connection; it is accepted only if every listener agrees
    fn accept_incoming_connection(&mut self, _service: &NetService, _from: SocketAddr) -> bool {
        true
    }

    fn on_connection(
        &mut self,
        _service: &mut NetService,
        _from: SocketAddr,
        _result: ConnectionResult,
    ) {
    }

    fn on_data_received(&mut self, _service: &mut NetService, _from: SocketAddr, _data: &[u8]) {}

    fn on_disconnection(
        &mut self,
        _service: &mut NetService,
        _from: SocketAddr,
        _reason: DisconnectReason,
    ) {
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

/// Session transport service
pub struct NetService {
    transport: Box<dyn Transport>,
    state: ServiceState,
    parameters: Parameters,
    local_address: SocketAddr,
    /// Remote peers with a completed handshake, in connection order
    peers: Vec<SocketAddr>,
    /// Payloads addressed to ourselves, delivered on the next `process`
    loopback: Vec<Vec<u8>>,
    listeners: Vec<Rc<RefCell<dyn NetListener>>>,
}

impl NetService {
    pub fn new(transport: impl Transport + 'static) -> Self {
        let parameters = Parameters::solo(0);
        Self {
            transport: Box::new(transport),
            state: ServiceState::Idle,
            parameters,
            local_address: parameters.host_address,
            peers: Vec::new(),
            loopback: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Service over a UDP transport
    pub fn udp(config: TransportConfig) -> Self {
        Self::new(UdpTransport::new(config))
    }

    /// Register a listener; registering the same one twice has no effect
    pub fn add_listener<L: NetListener + 'static>(&mut self, listener: Rc<RefCell<L>>) {
        if self.position_of(&listener).is_some() {
            return;
        }
        self.listeners.push(listener);
    }

    pub fn remove_listener<L: NetListener + 'static>(&mut self, listener: &Rc<RefCell<L>>) {
        if let Some(index) = self.position_of(listener) {
            self.listeners.remove(index);
        }
    }

    fn position_of<L: NetListener + 'static>(&self, listener: &Rc<RefCell<L>>) -> Option<usize> {
        self.listeners
            .iter()
            .position(|l| std::ptr::addr_eq(Rc::as_ptr(l), Rc::as_ptr(listener)))
    }

    /// Bring the service up
    ///
    /// Networked roles open the transport on `local_port`; clients then
    /// start connecting to `host_address` right away.
    pub fn init(&mut self, parameters: Parameters) -> Result<(), ServiceError> {
        if self.state == ServiceState::Initialized {
            return Err(ServiceError::AlreadyInitialized);
        }

        let network_type = parameters.network_type;
        let local_port = if network_type.is_networked() {
            let bound = self.transport.open(parameters.local_port)?;
            if !network_type.is_host() {
                self.transport.connect(parameters.host_address);
            }
            bound.port()
        } else {
            parameters.local_port
        };

        self.parameters = parameters;
        self.local_address = loopback(local_port);
        self.state = ServiceState::Initialized;

        tracing::info!(
            role = %network_type,
            local = %self.local_address,
            "Net service initialized"
        );
        self.for_each_listener(|listener, service| listener.on_service_initialized(service));
        Ok(())
    }

    /// Tear the service down; listeners are notified even when already idle
    pub fn release(&mut self) {
        if self.state == ServiceState::Initialized {
            if self.is_networked() {
                self.transport.close();
            }
            self.loopback.clear();
            self.peers.clear();
            self.state = ServiceState::Idle;
            tracing::info!("Net service released");
        }
        self.for_each_listener(|listener, service| listener.on_service_released(service));
    }

    /// Pull inbound datagrams into the transport
    pub fn receive(&mut self) -> Result<(), ServiceError> {
        self.ensure_initialized()?;
        if self.is_networked() {
            self.transport.receive();
        }
        Ok(())
    }

    /// Deliver loopback payloads, then transport events, to the listeners
    ///
    /// Payloads queued while this runs are delivered on the next call.
    pub fn process(&mut self) -> Result<(), ServiceError> {
        self.ensure_initialized()?;

        let local = self.local_address;
        for data in std::mem::take(&mut self.loopback) {
            self.for_each_listener(|listener, service| {
                listener.on_data_received(service, local, &data)
            });
        }

        if self.is_networked() {
            for event in self.transport.poll() {
                self.handle_transport_event(event);
            }
        }
        Ok(())
    }

    /// Push pending outbound data to the network
    pub fn flush(&mut self) -> Result<(), ServiceError> {
        self.ensure_initialized()?;
        if self.is_networked() {
            self.transport.process_send();
        }
        Ok(())
    }

    /// Send to one participant; our own address loops back
    pub fn send_to(&mut self, addr: SocketAddr, data: &[u8]) -> Result<(), ServiceError> {
        self.ensure_initialized()?;
        if addr == self.local_address {
            self.loopback.push(data.to_vec());
        } else if self.is_networked() {
            self.transport_send(addr, data);
        } else {
            tracing::trace!(%addr, "Not networked, dropping message for remote");
        }
        Ok(())
    }

    /// Send to the host; hosts and solo sessions loop back
    pub fn send_to_host(&mut self, data: &[u8]) -> Result<(), ServiceError> {
        self.ensure_initialized()?;
        if self.is_networked() && !self.is_host() {
            self.transport_send(self.parameters.host_address, data);
        } else {
            self.loopback.push(data.to_vec());
        }
        Ok(())
    }

    /// Send to every connected remote peer (host or solo only)
    pub fn send_to_remotes(&mut self, data: &[u8]) -> Result<(), ServiceError> {
        self.ensure_initialized()?;
        self.ensure_authority()?;
        for peer in self.peers.clone() {
            self.transport_send(peer, data);
        }
        Ok(())
    }

    /// Send to every remote peer and to ourselves (host or solo only)
    pub fn send_all(&mut self, data: &[u8]) -> Result<(), ServiceError> {
        self.send_to_remotes(data)?;
        self.loopback.push(data.to_vec());
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ServiceState::Initialized
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn network_type(&self) -> NetworkType {
        self.parameters.network_type
    }

    pub fn is_networked(&self) -> bool {
        self.parameters.network_type.is_networked()
    }

    pub fn is_host(&self) -> bool {
        self.parameters.network_type.is_host()
    }

    pub fn is_dedicated_server(&self) -> bool {
        self.parameters.network_type.is_dedicated_server()
    }

    /// Loopback address with the bound port
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Connected remote peers, in connection order
    pub fn remote_peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Payloads waiting in the loopback queue
    pub fn pending_loopback(&self) -> usize {
        self.loopback.len()
    }

    /// Whether sent messages may still need retransmitting to a remote
    pub fn has_unacked(&self) -> bool {
        self.transport.is_open() && self.transport.has_unacked()
    }

    fn ensure_initialized(&self) -> Result<(), ServiceError> {
        match self.state {
            ServiceState::Initialized => Ok(()),
            ServiceState::Idle => Err(ServiceError::NotInitialized),
        }
    }

    fn ensure_authority(&self) -> Result<(), ServiceError> {
        if self.is_networked() && !self.is_host() {
            return Err(ServiceError::NotAuthority);
        }
        Ok(())
    }

    fn transport_send(&mut self, addr: SocketAddr, data: &[u8]) {
        if self.transport.send_to(addr, data, Channel::ReliableOrdered) {
            tracing::trace!(%addr, len = data.len(), "Queued message");
        } else {
            tracing::warn!(%addr, "Transport refused message, dropped");
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IncomingConnection { from } => {
                if !self.is_host() {
                    tracing::trace!(%from, "Ignoring incoming connection, not hosting");
                    return;
                }
                let listeners = self.listeners.clone();
                let accepted = listeners
                    .iter()
                    .all(|listener| listener.borrow_mut().accept_incoming_connection(self, from));
                if accepted {
                    tracing::debug!(%from, "Accepting incoming connection");
                    self.transport.connect(from);
                } else {
                    tracing::debug!(%from, "Incoming connection refused");
                }
            }
            TransportEvent::Connection { from, result } => {
                if result == ConnectionResult::Success && !self.peers.contains(&from) {
                    self.peers.push(from);
                }
                tracing::info!(%from, ?result, "Connection");
                self.for_each_listener(|listener, service| {
                    listener.on_connection(service, from, result)
                });
            }
            TransportEvent::UserData { from, data } => {
                self.for_each_listener(|listener, service| {
                    listener.on_data_received(service, from, &data)
                });
            }
            TransportEvent::Disconnection { from, reason } => {
                self.peers.retain(|peer| *peer != from);
                tracing::info!(%from, ?reason, "Peer disconnected");
                self.for_each_listener(|listener, service| {
                    listener.on_disconnection(service, from, reason)
                });
            }
        }
    }

    /// Call `f` on every listener registered when the call starts
    fn for_each_listener(&mut self, mut f: impl FnMut(&mut dyn NetListener, &mut NetService)) {
        let listeners = self.listeners.clone();
        for listener in listeners {
            f(&mut *listener.borrow_mut(), self);
        }
    }
}
