// The 10x10 grid each participant defends, and the pure operations on it.
//
// A `Board` is a plain value: `place_ship` and `process_attack` return a new
// board and never touch the receiver. The room keeps one authoritative board
// for the local participant and one replica per opponent, updated only through
// `mark_result` as `attack_result` messages arrive.
//
// Cell lifecycle: `Empty -> Miss` and `Ship -> Hit` are the only transitions
// an attack can cause. `Hit` and `Miss` are terminal, so a second attack on
// the same cell reports `already_attacked` and changes nothing.
//
// Placement rule: a ship must fit inside the grid, overlap no other ship, and
// not touch any other ship, diagonals included (8-neighborhood).

use crate::ship::{Ship, ShipId};

/// Side length of the square grid.
pub const BOARD_SIZE: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CellState {
    #[default]
    Empty,
    Ship,
    Hit,
    Miss,
}

impl CellState {
    /// `Hit` or `Miss`: the cell has been attacked.
    pub fn is_resolved(self) -> bool {
        matches!(self, CellState::Hit | CellState::Miss)
    }
}

/// One grid square. `ship_id` is set for `Ship` cells and for `Hit` cells
/// whose ship is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Cell {
    pub state: CellState,
    pub ship_id: Option<ShipId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Coordinates outside the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("cell ({row}, {col}) is outside the board")]
    OutOfBounds { row: usize, col: usize },
}

/// What `process_attack` produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttackOutcome {
    pub board: Board,
    pub hit: bool,
    pub ship_id: Option<ShipId>,
    /// The cell was already resolved; `board` is unchanged.
    pub already_attacked: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// An all-`Empty` board.
    pub fn new() -> Self {
        Self {
            cells: [[Cell::default(); BOARD_SIZE]; BOARD_SIZE],
        }
    }

    pub fn in_bounds(row: usize, col: usize) -> bool {
        row < BOARD_SIZE && col < BOARD_SIZE
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.cells.get(row).and_then(|r| r.get(col))
    }

    /// Row-major iterator over `(row, col, cell)`.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, &Cell)> {
        self.cells
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().enumerate().map(move |(c, cell)| (r, c, cell)))
    }

    /// Cells `ship` would cover, or `None` if any of them falls off the grid.
    fn footprint(
        ship: &Ship,
        row: usize,
        col: usize,
        orientation: Orientation,
    ) -> Option<Vec<(usize, usize)>> {
        (0..ship.size)
            .map(|i| {
                let (r, c) = match orientation {
                    Orientation::Horizontal => (row, col.checked_add(i)?),
                    Orientation::Vertical => (row.checked_add(i)?, col),
                };
                Self::in_bounds(r, c).then_some((r, c))
            })
            .collect()
    }

    /// True iff `ship` fits at `(row, col)` without overlapping or touching
    /// (including diagonally) any ship already on the board.
    pub fn is_valid_placement(
        &self,
        ship: &Ship,
        row: usize,
        col: usize,
        orientation: Orientation,
    ) -> bool {
        let Some(footprint) = Self::footprint(ship, row, col, orientation) else {
            return false;
        };
        footprint.iter().all(|&(r, c)| {
            let rows = r.saturating_sub(1)..=(r + 1).min(BOARD_SIZE - 1);
            rows.into_iter().all(|nr| {
                let cols = c.saturating_sub(1)..=(c + 1).min(BOARD_SIZE - 1);
                cols.into_iter()
                    .all(|nc| self.cells[nr][nc].state != CellState::Ship)
            })
        })
    }

    /// A new board with `ship` marked at `(row, col)`. The caller checks
    /// `is_valid_placement` first; a ship that does not fit on the grid
    /// leaves the board unchanged.
    pub fn place_ship(
        &self,
        ship: &Ship,
        row: usize,
        col: usize,
        orientation: Orientation,
    ) -> Board {
        let mut next = self.clone();
        let Some(footprint) = Self::footprint(ship, row, col, orientation) else {
            return next;
        };
        for (r, c) in footprint {
            next.cells[r][c] = Cell {
                state: CellState::Ship,
                ship_id: Some(ship.id),
            };
        }
        next
    }

    /// Resolve a shot at `(row, col)`. Out-of-range coordinates are an error;
    /// a shot at a resolved cell is a no-op with `already_attacked` set.
    pub fn process_attack(&self, row: usize, col: usize) -> Result<AttackOutcome, BoardError> {
        let Some(cell) = self.cell(row, col) else {
            return Err(BoardError::OutOfBounds { row, col });
        };
        let mut next = self.clone();
        let outcome = match cell.state {
            CellState::Hit | CellState::Miss => {
                return Ok(AttackOutcome {
                    board: next,
                    hit: cell.state == CellState::Hit,
                    ship_id: cell.ship_id,
                    already_attacked: true,
                });
            }
            CellState::Ship => {
                next.cells[row][col].state = CellState::Hit;
                (true, cell.ship_id)
            }
            CellState::Empty => {
                next.cells[row][col].state = CellState::Miss;
                (false, None)
            }
        };
        Ok(AttackOutcome {
            board: next,
            hit: outcome.0,
            ship_id: outcome.1,
            already_attacked: false,
        })
    }

    /// True iff no `Ship` cell carries `ship_id`. A ship that was never
    /// placed counts as sunk.
    pub fn is_ship_sunk(&self, ship_id: ShipId) -> bool {
        !self
            .cells()
            .any(|(_, _, cell)| cell.state == CellState::Ship && cell.ship_id == Some(ship_id))
    }

    /// True iff no `Ship` cell remains anywhere.
    pub fn are_all_ships_sunk(&self) -> bool {
        !self.cells().any(|(_, _, cell)| cell.state == CellState::Ship)
    }

    /// Record a remote verdict on an opponent replica. Returns false if the
    /// coordinates are off the grid or the cell was already resolved.
    pub fn mark_result(&mut self, row: usize, col: usize, hit: bool, ship_id: Option<ShipId>) -> bool {
        if !Self::in_bounds(row, col) || self.cells[row][col].state.is_resolved() {
            return false;
        }
        self.cells[row][col] = if hit {
            Cell {
                state: CellState::Hit,
                ship_id,
            }
        } else {
            Cell {
                state: CellState::Miss,
                ship_id: None,
            }
        };
        true
    }

    /// Number of cells in `state`.
    pub fn count(&self, state: CellState) -> usize {
        self.cells().filter(|(_, _, cell)| cell.state == state).count()
    }
}
