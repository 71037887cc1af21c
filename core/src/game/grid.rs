//! 3x3 board with win/draw detection

/// Board side length
pub const GRID_SIZE: usize = 3;

/// Content of a single board cell (also used as a player symbol)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cell {
    #[default]
    Empty,
    X,
    O,
}

impl Cell {
    /// The other player's symbol. `Empty` has no opponent.
    pub fn opponent(self) -> Cell {
        match self {
            Cell::X => Cell::O,
            Cell::O => Cell::X,
            Cell::Empty => Cell::Empty,
        }
    }

    /// True for `X` and `O`
    pub fn is_player(self) -> bool {
        self != Cell::Empty
    }

    /// Single-character representation used by the terminal front end
    pub fn as_char(self) -> char {
        match self {
            Cell::Empty => '.',
            Cell::X => 'X',
            Cell::O => 'O',
        }
    }
}

impl From<Cell> for u8 {
    fn from(cell: Cell) -> u8 {
        match cell {
            Cell::Empty => 0,
            Cell::X => 1,
            Cell::O => 2,
        }
    }
}

impl TryFrom<u8> for Cell {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Cell::Empty),
            1 => Ok(Cell::X),
            2 => Ok(Cell::O),
            other => Err(other),
        }
    }
}

/// Reasons a move is refused by the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    #[error("no player to move")]
    NoPlayer,
    #[error("cell ({x}, {y}) is outside the grid")]
    OutOfBounds { x: usize, y: usize },
    #[error("cell ({x}, {y}) is already taken")]
    Occupied { x: usize, y: usize },
    #[error("the game is over")]
    GameOver,
}

/// Tic-tac-toe board
///
/// Cells are append-only: once a cell holds a symbol it keeps it until
/// [`Grid::reset`]. `finished` never goes back to `false` during a game, and
/// a winner always implies `finished`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Grid {
    cells: [[Cell; GRID_SIZE]; GRID_SIZE],
    winner: Cell,
    finished: bool,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the board back to its initial state
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Check whether `player` may play at `(x, y)`
    pub fn check(&self, x: usize, y: usize, player: Cell) -> Result<(), MoveError> {
        if !player.is_player() {
            return Err(MoveError::NoPlayer);
        }
        if x >= GRID_SIZE || y >= GRID_SIZE {
            return Err(MoveError::OutOfBounds { x, y });
        }
        if self.finished {
            return Err(MoveError::GameOver);
        }
        if self.cells[x][y] != Cell::Empty {
            return Err(MoveError::Occupied { x, y });
        }
        Ok(())
    }

    /// Returns true if the move would be accepted
    pub fn can_play(&self, x: usize, y: usize, player: Cell) -> bool {
        self.check(x, y, player).is_ok()
    }

    /// Place `player` at `(x, y)` and update the winner/finished state
    pub fn play(&mut self, x: usize, y: usize, player: Cell) -> Result<(), MoveError> {
        self.check(x, y, player)?;

        self.cells[x][y] = player;

        let c = &self.cells;
        let mut won = c[x][0] == c[x][1] && c[x][1] == c[x][2];
        won |= c[0][y] == c[1][y] && c[1][y] == c[2][y];
        if x == y {
            won |= c[0][0] == c[1][1] && c[1][1] == c[2][2];
        }
        if x + y == GRID_SIZE - 1 {
            won |= c[2][0] == c[1][1] && c[1][1] == c[0][2];
        }

        if won {
            self.winner = player;
            self.finished = true;
        } else if self.is_full() {
            self.finished = true;
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Winning symbol, or `Cell::Empty` for a draw or an unfinished game
    pub fn winner(&self) -> Cell {
        self.winner
    }

    /// Cell content, `None` when out of bounds
    pub fn cell(&self, x: usize, y: usize) -> Option<Cell> {
        self.cells.get(x).and_then(|column| column.get(y)).copied()
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().flatten().all(|cell| cell.is_player())
    }

    /// Number of symbols on the board
    pub fn occupied(&self) -> usize {
        self.cells.iter().flatten().filter(|cell| cell.is_player()).count()
    }
}

impl std::fmt::Display for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for y in 0..GRID_SIZE {
            for x in 0..GRID_SIZE {
                write!(f, "{}", self.cells[x][y].as_char())?;
                if x + 1 < GRID_SIZE {
                    write!(f, " ")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
