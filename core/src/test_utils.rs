//! Shared test utilities: recording listeners and multi-participant driving
//! over a [`MemoryNetwork`]

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::game::Cell;
use crate::net::service::{NetListener, NetService, Parameters};
use crate::net::transport::{ConnectionResult, DisconnectReason, MemoryNetwork};
use crate::sync::{SyncEvent, SyncState, TurnSync};

// ============================================================================
// Recording listener
// ============================================================================

/// What a [`Recorder`] saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Initialized,
    Released,
    Incoming(SocketAddr),
    Connection(SocketAddr, ConnectionResult),
    Data(SocketAddr, Vec<u8>),
    Disconnection(SocketAddr, DisconnectReason),
}

/// Listener that records every callback and votes `accept` on connections
pub struct Recorder {
    pub events: Vec<Recorded>,
    pub accept: bool,
}

impl Recorder {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            events: Vec::new(),
            accept: true,
        }))
    }

    pub fn data(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Recorded::Data(from, data) => Some((*from, data.clone())),
                _ => None,
            })
            .collect()
    }
}

impl NetListener for Recorder {
    fn on_service_initialized(&mut self, _service: &mut NetService) {
        self.events.push(Recorded::Initialized);
    }

    fn on_service_released(&mut self, _service: &mut NetService) {
        self.events.push(Recorded::Released);
    }

    fn accept_incoming_connection(&mut self, _service: &NetService, from: SocketAddr) -> bool {
        self.events.push(Recorded::Incoming(from));
        self.accept
    }

    fn on_connection(&mut self, _service: &mut NetService, from: SocketAddr, result: ConnectionResult) {
        self.events.push(Recorded::Connection(from, result));
    }

    fn on_data_received(&mut self, _service: &mut NetService, from: SocketAddr, data: &[u8]) {
        self.events.push(Recorded::Data(from, data.to_vec()));
    }

    fn on_disconnection(
        &mut self,
        _service: &mut NetService,
        from: SocketAddr,
        reason: DisconnectReason,
    ) {
        self.events.push(Recorded::Disconnection(from, reason));
    }
}

// ============================================================================
// Service driving
// ============================================================================

/// One receive/process/flush cycle
pub fn step(service: &mut NetService) {
    service.receive().unwrap();
    service.process().unwrap();
    service.flush().unwrap();
}

/// Run `rounds` cycles over every service, in order
pub fn pump(services: &mut [&mut NetService], rounds: usize) {
    for _ in 0..rounds {
        for service in services.iter_mut() {
            step(service);
        }
    }
}

// ============================================================================
// Game participants
// ============================================================================

/// A service with a [`TurnSync`] listening on it
pub struct Participant {
    pub service: NetService,
    pub sync: Rc<RefCell<TurnSync>>,
}

impl Participant {
    pub fn new(network: &MemoryNetwork, seed: u64) -> Self {
        let mut service = NetService::new(network.transport());
        let sync = Rc::new(RefCell::new(TurnSync::with_seed(seed)));
        service.add_listener(sync.clone());
        Self { service, sync }
    }

    pub fn init(&mut self, parameters: Parameters) {
        self.service.init(parameters).unwrap();
    }

    pub fn step(&mut self) {
        step(&mut self.service);
    }

    pub fn state(&self) -> SyncState {
        self.sync.borrow().state()
    }

    pub fn symbol(&self) -> Cell {
        self.sync.borrow().local_symbol()
    }

    pub fn request_play(&mut self, x: u8, y: u8) -> Result<(), crate::sync::PlayError> {
        self.sync.borrow_mut().request_play(&mut self.service, x, y)
    }

    pub fn drain_events(&self) -> Vec<SyncEvent> {
        self.sync.borrow_mut().drain_events()
    }

    pub fn grid_snapshot(&self) -> crate::game::Grid {
        self.sync.borrow().game().grid().clone()
    }
}

/// Step every participant `rounds` times, in order
pub fn settle(participants: &mut [&mut Participant], rounds: usize) {
    for _ in 0..rounds {
        for participant in participants.iter_mut() {
            participant.step();
        }
    }
}
