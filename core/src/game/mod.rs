//! Tic-tac-toe game model
//!
//! Pure state with no I/O:
//!
//! - [`Grid`] - the 3x3 board, win and draw detection
//! - [`Game`] - a grid plus the player whose turn it is
//!
//! The turn-synchronization state machine ([`crate::sync`]) is the only code
//! that mutates a [`Game`]; every move it applies has been validated by the
//! session authority first.

mod grid;


pub use grid::{Cell, GRID_SIZE, Grid, MoveError};

/// Errors from the game lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// `start` called on a game that is already running
    #[error("game already started, {0:?} to move")]
    AlreadyStarted(Cell),
    /// `start` called with `Cell::Empty`
    #[error("first player must be X or O")]
    NoFirstPlayer,
}

/// A game of tic-tac-toe
///
/// `current_player` is `Cell::Empty` until [`Game::start`] is called.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Game {
    grid: Grid,
    current_player: Cell,
}

impl Game {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the game with `first_player` to move
    pub fn start(&mut self, first_player: Cell) -> Result<(), GameError> {
        if self.is_started() {
            return Err(GameError::AlreadyStarted(self.current_player));
        }
        if !first_player.is_player() {
            return Err(GameError::NoFirstPlayer);
        }
        self.current_player = first_player;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.current_player.is_player()
    }

    /// Play the current player's move at `(x, y)` and pass the turn
    pub fn play(&mut self, x: usize, y: usize) -> Result<(), MoveError> {
        self.grid.play(x, y, self.current_player)?;
        self.current_player = self.current_player.opponent();
        Ok(())
    }

    /// Back to an empty, not-started game
    pub fn reset(&mut self) {
        self.grid.reset();
        self.current_player = Cell::Empty;
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn current_player(&self) -> Cell {
        self.current_player
    }
}
