//! Turn synchronization
//!
//! [`TurnSync`] listens on a [`NetService`] and keeps every participant's
//! [`Game`] identical. Only the authority (the host, a dedicated server, or
//! the solo player) decides which moves happen; everyone, the authority
//! included, mutates its grid only when a `PlayResult{valid: true}` arrives.
//!
//! # Flow
//!
//! ```text
//! Client                        Authority
//!   |                              |  WaitingOpponent
//!   |-- connect ------------------>|  WaitingConnection
//!   |<-- Setup{symbol} ------------|  (roster full: symbols shuffled)
//!   |<-- Start{first} -------------|  WaitingGameStart -> Playing
//!   |                              |
//!   |-- PlayRequest{x, y} -------->|  validate
//!   |<-- PlayResult{true, x, y} ---|  (to everyone, itself included)
//!   |<-- PlayResult{false, x, y} --|  (to the requester only)
//! ```


use std::mem;
use std::net::SocketAddr;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_pcg::Pcg64;

use crate::game::{Cell, Game, GameError, MoveError};
use crate::net::protocol::{Coord, DecodeError, Message, MessageType};
use crate::net::service::{NetListener, NetService, NetworkType, ServiceError};
use crate::net::transport::{ConnectionResult, DisconnectReason};

/// Players needed to start a game
const PLAYERS: usize = 2;

/// Synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncState {
    /// Authority waiting for players to connect
    WaitingOpponent,
    /// A connection is being set up (client, or authority accepting)
    #[default]
    WaitingConnection,
    /// Connected, waiting for `Start`
    WaitingGameStart,
    Playing,
    /// Sent a `PlayRequest`, waiting for the verdict
    PlayRequested,
    Finished,
}

/// Which address holds which symbol (authority only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub symbol: Cell,
    pub address: SocketAddr,
}

/// Why an incoming event was discarded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("undecodable message: {0}")]
    Decode(#[from] DecodeError),
    #[error("{message:?} not expected in state {state:?}")]
    UnexpectedMessage {
        message: MessageType,
        state: SyncState,
    },
    #[error("{message:?} from a participant that is not the authority")]
    UnexpectedSender { message: MessageType },
    #[error("PlayRequest received by a non-authority")]
    NotAuthority,
    #[error("connection event not expected in state {state:?}")]
    UnexpectedConnection { state: SyncState },
    #[error("connection event after the session disconnected")]
    AfterDisconnection,
    #[error("game could not start: {0}")]
    Game(#[from] GameError),
    #[error("authoritative move could not be applied: {0}")]
    Desync(#[from] MoveError),
}

/// Notifications for the application, drained with [`TurnSync::drain_events`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    StateChanged { from: SyncState, to: SyncState },
    /// The authority told us which symbol we hold
    SymbolAssigned(Cell),
    GameStarted { first: Cell },
    MovePlayed { player: Cell, x: Coord, y: Coord },
    /// Our play request was refused; we stay where we were
    MoveRejected { x: Coord, y: Coord },
    /// `winner` is `Cell::Empty` for a draw
    GameFinished { winner: Cell },
    PeerDisconnected(SocketAddr),
    ConnectionFailed(SocketAddr),
    ProtocolViolation {
        from: SocketAddr,
        violation: Violation,
    },
}

/// Local play request errors
#[derive(Debug, thiserror::Error)]
pub enum PlayError {
    #[error("a dedicated server does not play")]
    DedicatedServer,
    #[error("session is disconnected")]
    Disconnected,
    #[error("cannot play in state {0:?}")]
    InvalidState(SyncState),
    #[error("not the local player's turn")]
    NotYourTurn,
    #[error("coordinates out of range: ({x}, {y})")]
    OutOfRange { x: u8, y: u8 },
    #[error("failed to send play request: {0}")]
    Service(#[from] ServiceError),
}

/// Turn-synchronization state machine
pub struct TurnSync {
    state: SyncState,
    game: Game,
    role: NetworkType,
    local_symbol: Cell,
    roster: Vec<RosterEntry>,
    /// Accepted connections that have not completed yet
    pending: Vec<SocketAddr>,
    /// Authority broadcast a valid result it has not applied itself yet
    result_in_flight: bool,
    disconnected: bool,
    rng: Pcg64,
    events: Vec<SyncEvent>,
}

impl Default for TurnSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnSync {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// State machine with a fixed symbol-shuffle seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: SyncState::default(),
            game: Game::new(),
            role: NetworkType::None,
            local_symbol: Cell::Empty,
            roster: Vec::new(),
            pending: Vec::new(),
            result_in_flight: false,
            disconnected: false,
            rng: Pcg64::seed_from_u64(seed),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Symbol assigned by the authority; `Cell::Empty` in solo and before `Setup`
    pub fn local_symbol(&self) -> Cell {
        self.local_symbol
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    pub fn role(&self) -> NetworkType {
        self.role
    }

    /// Host, dedicated server, or solo
    pub fn is_authority(&self) -> bool {
        !self.role.is_networked() || self.role.is_host()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Whether `request_play` would be allowed right now
    pub fn is_local_turn(&self) -> bool {
        self.state == SyncState::Playing
            && !self.disconnected
            && !self.role.is_dedicated_server()
            && (!self.role.is_networked() || self.game.current_player() == self.local_symbol)
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        mem::take(&mut self.events)
    }

    /// Ask the authority to play at `(x, y)` for the local player
    pub fn request_play(&mut self, service: &mut NetService, x: u8, y: u8) -> Result<(), PlayError> {
        if self.role.is_dedicated_server() {
            return Err(PlayError::DedicatedServer);
        }
        if self.disconnected {
            return Err(PlayError::Disconnected);
        }
        if self.state != SyncState::Playing {
            return Err(PlayError::InvalidState(self.state));
        }
        if self.role.is_networked() && self.game.current_player() != self.local_symbol {
            return Err(PlayError::NotYourTurn);
        }
        let (Some(cx), Some(cy)) = (Coord::new(x), Coord::new(y)) else {
            return Err(PlayError::OutOfRange { x, y });
        };

        service.send_to_host(&Message::PlayRequest { x: cx, y: cy }.encode())?;
        tracing::debug!(x, y, "Play requested");
        if !self.is_authority() {
            self.set_state(SyncState::PlayRequested);
        }
        Ok(())
    }

    fn set_state(&mut self, to: SyncState) {
        if self.state == to {
            return;
        }
        let from = mem::replace(&mut self.state, to);
        tracing::debug!(?from, ?to, "Sync state changed");
        self.events.push(SyncEvent::StateChanged { from, to });
    }

    fn violation(&mut self, from: SocketAddr, violation: Violation) {
        tracing::error!(%from, error = %violation, "Protocol violation, event discarded");
        self.events
            .push(SyncEvent::ProtocolViolation { from, violation });
    }

    fn send(&self, result: Result<(), ServiceError>, what: MessageType) {
        if let Err(e) = result {
            tracing::error!(error = %e, message = ?what, "Failed to send");
        }
    }

    /// Authority messages come from the host, or loop back on the authority itself
    fn is_from_authority(&self, service: &NetService, from: SocketAddr) -> bool {
        if self.is_authority() {
            from == service.local_address()
        } else {
            from == service.parameters().host_address
        }
    }

    /// Shuffle `[X, O]` over the roster, send each player its `Setup`, then start
    fn assign_symbols(&mut self, service: &mut NetService) {
        let mut symbols = [Cell::X, Cell::O];
        symbols.shuffle(&mut self.rng);
        for (entry, symbol) in self.roster.iter_mut().zip(symbols) {
            entry.symbol = symbol;
        }
        tracing::info!(roster = ?self.roster, "Symbols assigned");
        self.set_state(SyncState::WaitingGameStart);

        for entry in self.roster.clone() {
            let setup = Message::Setup {
                symbol: entry.symbol,
            };
            self.send(service.send_to(entry.address, &setup.encode()), MessageType::Setup);
        }
        let start = Message::Start {
            symbol: self.roster[0].symbol,
        };
        self.send(service.send_all(&start.encode()), MessageType::Start);
    }

    fn handle_message(&mut self, service: &mut NetService, from: SocketAddr, message: Message) {
        let message_type = message.message_type();
        if message_type != MessageType::PlayRequest && !self.is_from_authority(service, from) {
            self.violation(
                from,
                Violation::UnexpectedSender {
                    message: message_type,
                },
            );
            return;
        }

        match message {
            Message::Setup { symbol } => {
                if self.state != SyncState::WaitingGameStart {
                    return self.unexpected(from, message_type);
                }
                tracing::info!(?symbol, "Playing as");
                self.local_symbol = symbol;
                self.events.push(SyncEvent::SymbolAssigned(symbol));
            }
            Message::Start { symbol } => {
                if self.state != SyncState::WaitingGameStart {
                    return self.unexpected(from, message_type);
                }
                if let Err(e) = self.game.start(symbol) {
                    return self.violation(from, e.into());
                }
                tracing::info!(first = ?symbol, "Game started");
                self.set_state(SyncState::Playing);
                self.events.push(SyncEvent::GameStarted { first: symbol });
            }
            Message::PlayRequest { x, y } => {
                if !self.is_authority() {
                    return self.violation(from, Violation::NotAuthority);
                }
                self.handle_play_request(service, from, x, y);
            }
            Message::PlayResult { valid: true, x, y } => {
                if !matches!(self.state, SyncState::Playing | SyncState::PlayRequested) {
                    return self.unexpected(from, message_type);
                }
                self.apply_move(from, x, y);
            }
            Message::PlayResult { valid: false, x, y } => {
                // The authority playing for itself never leaves `Playing`
                let waiting = self.state == SyncState::PlayRequested
                    || (self.is_authority() && self.state == SyncState::Playing);
                if !waiting {
                    return self.unexpected(from, message_type);
                }
                tracing::info!(x = x.get(), y = y.get(), "Move rejected");
                self.events.push(SyncEvent::MoveRejected { x, y });
            }
        }
    }

    fn unexpected(&mut self, from: SocketAddr, message: MessageType) {
        let state = self.state;
        self.violation(from, Violation::UnexpectedMessage { message, state });
    }

    fn handle_play_request(&mut self, service: &mut NetService, from: SocketAddr, x: Coord, y: Coord) {
        let current = self.game.current_player();
        let holds_turn = !self.role.is_networked()
            || self
                .roster
                .iter()
                .any(|entry| entry.address == from && entry.symbol == current);
        let valid = self.state == SyncState::Playing
            && !self.result_in_flight
            && holds_turn
            && self.game.grid().can_play(x.index(), y.index(), current);

        if valid {
            tracing::debug!(%from, x = x.get(), y = y.get(), "Play request accepted");
            self.result_in_flight = true;
            let result = Message::PlayResult { valid, x, y };
            self.send(service.send_all(&result.encode()), MessageType::PlayResult);
        } else {
            tracing::debug!(%from, x = x.get(), y = y.get(), "Play request refused");
            let result = Message::PlayResult { valid, x, y };
            self.send(service.send_to(from, &result.encode()), MessageType::PlayResult);
        }
    }

    fn apply_move(&mut self, from: SocketAddr, x: Coord, y: Coord) {
        let player = self.game.current_player();
        if let Err(e) = self.game.play(x.index(), y.index()) {
            return self.violation(from, e.into());
        }
        self.result_in_flight = false;
        tracing::debug!(?player, x = x.get(), y = y.get(), "Move played");
        self.events.push(SyncEvent::MovePlayed { player, x, y });

        let grid = self.game.grid();
        if grid.is_finished() {
            let winner = grid.winner();
            tracing::info!(?winner, "Game finished");
            self.set_state(SyncState::Finished);
            self.events.push(SyncEvent::GameFinished { winner });
        } else {
            self.set_state(SyncState::Playing);
        }
    }
}

impl NetListener for TurnSync {
    fn on_service_initialized(&mut self, service: &mut NetService) {
        self.game.reset();
        self.local_symbol = Cell::Empty;
        self.roster.clear();
        self.pending.clear();
        self.result_in_flight = false;
        self.disconnected = false;
        self.role = service.network_type();

        if self.role == NetworkType::Host {
            self.roster.push(RosterEntry {
                symbol: Cell::Empty,
                address: service.local_address(),
            });
        }

        match self.role {
            NetworkType::Host | NetworkType::DedicatedServer => {
                self.set_state(SyncState::WaitingOpponent)
            }
            NetworkType::Client => self.set_state(SyncState::WaitingConnection),
            NetworkType::None => {
                self.set_state(SyncState::WaitingGameStart);
                let start = Message::Start { symbol: Cell::X };
                self.send(service.send_all(&start.encode()), MessageType::Start);
            }
        }
    }

    fn on_service_released(&mut self, _service: &mut NetService) {
        self.game.reset();
        self.local_symbol = Cell::Empty;
        self.roster.clear();
        self.pending.clear();
        self.result_in_flight = false;
        self.set_state(SyncState::default());
    }

    fn accept_incoming_connection(&mut self, _service: &NetService, from: SocketAddr) -> bool {
        let open = matches!(
            self.state,
            SyncState::WaitingOpponent | SyncState::WaitingConnection
        );
        let full = self.roster.len() + self.pending.len() >= PLAYERS;
        if !self.is_authority() || self.disconnected || !open || full {
            tracing::debug!(
                %from,
                state = ?self.state,
                disconnected = self.disconnected,
                "Refusing connection"
            );
            return false;
        }
        self.pending.push(from);
        self.set_state(SyncState::WaitingConnection);
        true
    }

    fn on_connection(&mut self, service: &mut NetService, from: SocketAddr, result: ConnectionResult) {
        // A dead roster entry cannot be replaced until the next init
        if self.disconnected {
            return self.violation(from, Violation::AfterDisconnection);
        }
        if self.state != SyncState::WaitingConnection {
            let state = self.state;
            return self.violation(from, Violation::UnexpectedConnection { state });
        }

        if !self.is_authority() {
            match result {
                ConnectionResult::Success => self.set_state(SyncState::WaitingGameStart),
                ConnectionResult::Failure => {
                    tracing::warn!(%from, "Could not connect to host");
                    self.events.push(SyncEvent::ConnectionFailed(from));
                }
            }
            return;
        }

        self.pending.retain(|addr| *addr != from);
        if result == ConnectionResult::Success {
            self.roster.push(RosterEntry {
                symbol: Cell::Empty,
                address: from,
            });
            tracing::info!(%from, players = self.roster.len(), "Player joined");
        }

        if self.roster.len() == PLAYERS {
            self.assign_symbols(service);
        } else if self.pending.is_empty() {
            self.set_state(SyncState::WaitingOpponent);
        }
    }

    fn on_data_received(&mut self, service: &mut NetService, from: SocketAddr, data: &[u8]) {
        match Message::decode(data) {
            Ok(message) => {
                tracing::trace!(%from, ?message, "Message received");
                self.handle_message(service, from, message);
            }
            Err(e) => self.violation(from, e.into()),
        }
    }

    fn on_disconnection(&mut self, _service: &mut NetService, from: SocketAddr, reason: DisconnectReason) {
        if self.state == SyncState::Finished {
            tracing::debug!(%from, ?reason, "Peer left after the game ended");
            return;
        }
        tracing::warn!(%from, ?reason, "Session disconnected");
        self.disconnected = true;
        self.events.push(SyncEvent::PeerDisconnected(from));
    }
}
