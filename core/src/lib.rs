//! TicTac Core - peer-synchronized tic-tac-toe sessions
//!
//! Two players (optionally behind a dedicated server) share one game of
//! tic-tac-toe. One participant is the authority: it validates every move and
//! broadcasts the result, and every grid changes only on those results.
//!
//! # Architecture
//!
//! - [`game`] - grid and turn model
//! - [`net`] - message protocol, transports and the session service
//! - [`sync`] - turn-synchronization state machine ([`TurnSync`])
//! - [`config`] - `config.toml` loading

pub mod config;
pub mod game;
pub mod net;
pub mod sync;
#[cfg(test)]
pub mod test_utils;

pub use config::{Config, ConfigError};
pub use game::{Cell, Game, GameError, Grid, MoveError};
pub use net::{Message, NetListener, NetService, NetworkType, Parameters, ServiceError};
pub use sync::{PlayError, SyncEvent, SyncState, TurnSync};
