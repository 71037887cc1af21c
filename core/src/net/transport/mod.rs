//! Message transport
//!
//! The session service ([`crate::net::service`]) talks to the network through
//! the [`Transport`] trait: a non-blocking, message-oriented endpoint with a
//! connect/accept handshake and an optional reliable-ordered channel.
//!
//! Two implementations are provided:
//!
//! - [`UdpTransport`] - UDP socket with handshake, acks and retransmission
//! - [`MemoryTransport`] - in-process network for tests and local play
//!
//! # Event Flow
//!
//! ```text
//! Client                          Host
//!   |                              |
//!   |--- ConnectRequest ---------->|  IncomingConnection { from }
//!   |                              |  (service accepts: connect(from))
//!   |<-- ConnectAccept ------------|  Connection { from, Success }
//!   |  Connection { host, Success }|
//!   |                              |
//!   |<== Data / Ack ==============>|  UserData { from, data }
//!   |                              |
//!   |--- Disconnect -------------->|  Disconnection { from, Remote }
//! ```
//!
//! Every call is non-blocking: "no data" is an empty poll, not an error.

mod memory;
mod packet;
mod reliable;
mod udp;


use std::net::SocketAddr;

use bitcode::{Decode, Encode};

pub use memory::{MemoryNetwork, MemoryTransport};
pub use packet::{PACKET_HEADER_SIZE, PACKET_MAGIC, PACKET_VERSION, Packet, PacketError};
pub use udp::UdpTransport;

/// Delivery guarantee for outgoing data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum Channel {
    /// Sent once, may be lost or reordered
    Unreliable,
    /// Delivered complete and in send order, or not at all on disconnection
    ReliableOrdered,
}

/// Outcome of a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionResult {
    Success,
    Failure,
}

/// Why a connected peer went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer said goodbye
    Remote,
    /// Nothing heard from the peer for too long
    Timeout,
}

/// Events surfaced by [`Transport::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote asked to connect; accept it with [`Transport::connect`]
    IncomingConnection { from: SocketAddr },
    /// Result of an outgoing connection, or of accepting an incoming one
    Connection {
        from: SocketAddr,
        result: ConnectionResult,
    },
    /// One complete message from a connected peer
    UserData { from: SocketAddr, data: Vec<u8> },
    /// A connected peer is gone
    Disconnection {
        from: SocketAddr,
        reason: DisconnectReason,
    },
}

impl TransportEvent {
    /// Address of the remote the event is about
    pub fn emitter(&self) -> SocketAddr {
        match self {
            Self::IncomingConnection { from }
            | Self::Connection { from, .. }
            | Self::UserData { from, .. }
            | Self::Disconnection { from, .. } => *from,
        }
    }
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is already open")]
    AlreadyOpen,
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("socket option error: {0}")]
    SocketOption(#[source] std::io::Error),
}

/// Non-blocking, message-oriented network endpoint
///
/// A transport owns its own lifecycle: [`Transport::open`] binds it and
/// [`Transport::close`] releases everything. The owner drives it once per
/// cycle with `receive`, `poll` and `process_send`.
pub trait Transport {
    /// Bind to `local_port` (0 for an ephemeral port); returns the bound address
    fn open(&mut self, local_port: u16) -> Result<SocketAddr, TransportError>;

    /// Say goodbye to connected peers and release the endpoint
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Start a connection to `addr`, or accept it if `addr` is a pending
    /// incoming connection
    fn connect(&mut self, addr: SocketAddr);

    /// Queue `data` for `addr`; returns false if it could not be queued
    fn send_to(&mut self, addr: SocketAddr, data: &[u8], channel: Channel) -> bool;

    /// Pull every datagram waiting on the endpoint into the inbound queue
    fn receive(&mut self);

    /// Push queued outbound data (including retransmissions) to the network
    fn process_send(&mut self);

    /// Turn everything received so far into events
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Whether data for a connected peer is still queued or waiting for an ack
    fn has_unacked(&self) -> bool;
}
