//! Networking for tic-tac-toe sessions
//!
//! - [`protocol`] - the four game messages and their wire format
//! - [`transport`] - message transport trait with UDP and in-memory backends
//! - [`service`] - session service: loopback, peer set, listener fan-out
//!
//! # Architecture
//!
//! ```text
//!            ┌─────────────────────┐
//!            │  TurnSync (sync)    │
//!            └──────────┬──────────┘
//!                       │ NetListener / send_*
//!            ┌──────────▼──────────┐
//!            │  NetService         │──── loopback queue
//!            └──────────┬──────────┘
//!                       │ Transport
//!            ┌──────────▼──────────┐
//!            │ UdpTransport /      │
//!            │ MemoryTransport     │
//!            └─────────────────────┘
//! ```

pub mod protocol;
pub mod service;
pub mod transport;

pub use protocol::{Coord, DecodeError, Message, MessageType};
pub use service::{NetListener, NetService, NetworkType, Parameters, ServiceError, ServiceState};
pub use transport::{
    Channel, ConnectionResult, DisconnectReason, MemoryNetwork, MemoryTransport, Transport,
    TransportError, TransportEvent, UdpTransport,
};
