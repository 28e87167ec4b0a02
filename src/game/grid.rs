//! Grid Cells and Coordinates
//!
//! The authoritative cell map for one match. Positions used by rules are
//! always discrete [`Cell`]s; continuous positions only exist for rendering.

use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};

// =============================================================================
// CELL TYPES
// =============================================================================

/// Contents of one grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[derive(Default)]
pub enum GridCell {
    /// Walkable floor
    #[default]
    Empty = 0,
    /// Indestructible wall (border or pillar)
    Wall = 1,
    /// Crate that explosions can destroy
    Destructible = 2,
    /// Floor with a live bomb on it
    BombOccupied = 3,
    /// Floor with an uncollected power-up on it
    PowerUp = 4,
}

impl GridCell {
    /// Wire code for this cell.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(GridCell::Empty),
            1 => Some(GridCell::Wall),
            2 => Some(GridCell::Destructible),
            3 => Some(GridCell::BombOccupied),
            4 => Some(GridCell::PowerUp),
            _ => None,
        }
    }

    /// Walls and crates block movement and explosions.
    #[inline]
    pub fn is_solid(self) -> bool {
        matches!(self, GridCell::Wall | GridCell::Destructible)
    }
}

/// Cardinal direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// y - 1
    Up,
    /// y + 1
    Down,
    /// x - 1
    Left,
    /// x + 1
    Right,
}

impl Direction {
    /// All directions in propagation order.
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Down, Direction::Left, Direction::Right];

    /// Unit offset for this direction.
    #[inline]
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

/// Discrete grid coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    /// Column
    pub x: i32,
    /// Row
    pub y: i32,
}

impl Cell {
    /// Create a cell.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Neighbor `distance` steps away in `dir`.
    #[inline]
    pub fn step(self, dir: Direction, distance: i32) -> Cell {
        let (dx, dy) = dir.delta();
        Cell::new(self.x + dx * distance, self.y + dy * distance)
    }

    /// Chebyshev distance (8-neighbourhood rings).
    #[inline]
    pub fn chebyshev(self, other: Cell) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }
}

// =============================================================================
// GRID
// =============================================================================

/// Rectangular cell map, row-major.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    width: i32,
    height: i32,
    cells: Vec<GridCell>,
}

impl Grid {
    /// Create a grid filled with [`GridCell::Empty`].
    pub fn new(width: i32, height: i32) -> Self {
        let width = width.max(0);
        let height = height.max(0);
        Self {
            width,
            height,
            cells: vec![GridCell::Empty; (width * height) as usize],
        }
    }

    /// Build from rows of cell codes. Returns `None` if the rows are ragged,
    /// empty, or contain an unknown code.
    pub fn from_code_rows(rows: &[Vec<u8>]) -> Option<Self> {
        let height = rows.len();
        let width = rows.first()?.len();
        if width == 0 {
            return None;
        }

        let mut cells = Vec::with_capacity(width * height);
        for row in rows {
            if row.len() != width {
                return None;
            }
            for code in row {
                cells.push(GridCell::from_code(*code)?);
            }
        }

        Some(Self {
            width: width as i32,
            height: height as i32,
            cells,
        })
    }

    /// Rows of cell codes (wire form).
    pub fn to_code_rows(&self) -> Vec<Vec<u8>> {
        self.cells
            .chunks(self.width.max(1) as usize)
            .map(|row| row.iter().map(|c| c.code()).collect())
            .collect()
    }

    /// Grid width in cells.
    #[inline]
    pub fn width(&self) -> i32 {
        self.width
    }

    /// Grid height in cells.
    #[inline]
    pub fn height(&self) -> i32 {
        self.height
    }

    /// Is the cell inside the grid?
    #[inline]
    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.width && cell.y < self.height
    }

    #[inline]
    fn index(&self, cell: Cell) -> Option<usize> {
        if self.in_bounds(cell) {
            Some((cell.y * self.width + cell.x) as usize)
        } else {
            None
        }
    }

    /// Cell contents, `None` when out of bounds.
    #[inline]
    pub fn get(&self, cell: Cell) -> Option<GridCell> {
        self.index(cell).map(|i| self.cells[i])
    }

    /// Overwrite a cell. Out-of-bounds writes are ignored and return false.
    #[inline]
    pub fn set(&mut self, cell: Cell, value: GridCell) -> bool {
        match self.index(cell) {
            Some(i) => {
                self.cells[i] = value;
                true
            }
            None => false,
        }
    }

    /// Is the cell in bounds and [`GridCell::Empty`]?
    #[inline]
    pub fn is_empty(&self, cell: Cell) -> bool {
        self.get(cell) == Some(GridCell::Empty)
    }

    /// Count cells of a given kind.
    pub fn count(&self, kind: GridCell) -> usize {
        self.cells.iter().filter(|c| **c == kind).count()
    }

    /// Iterate `(cell, contents)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (Cell, GridCell)> + '_ {
        let width = self.width.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, c)| (Cell::new(i as i32 % width, i as i32 / width), *c))
    }

    /// SHA-256 over dimensions and codes.
    pub fn fingerprint(&self) -> StateHash {
        let mut hasher = StateHasher::for_grid();
        hasher.update_i32(self.width);
        hasher.update_i32(self.height);
        for cell in &self.cells {
            hasher.update_u8(cell.code());
        }
        hasher.finalize()
    }
}
