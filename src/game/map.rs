//! Map Generation and Spawn Allocation
//!
//! Builds the arena grid from a room code. The host runs this exactly once per
//! match and publishes the result; every other participant adopts the
//! published grid instead of regenerating it.

use serde::{Serialize, Deserialize};

use crate::core::rng::SineRandom;
use crate::game::grid::{Cell, Grid, GridCell};

/// Default probability that an eligible cell gets a crate.
pub const DEFAULT_CRATE_DENSITY: f64 = 0.7;

/// Maximum number of spawn candidates on any grid.
pub const MAX_SPAWN_CANDIDATES: usize = 10;

/// Map size setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum MapSize {
    /// 13 x 11
    Small,
    /// 15 x 13
    #[default]
    Medium,
    /// 19 x 17
    Large,
}

impl MapSize {
    /// `(width, height)` in cells.
    pub fn dimensions(self) -> (i32, i32) {
        match self {
            MapSize::Small => (13, 11),
            MapSize::Medium => (15, 13),
            MapSize::Large => (19, 17),
        }
    }
}

// =============================================================================
// MAP GENERATOR
// =============================================================================

/// Deterministic grid builder.
#[derive(Clone, Debug)]
pub struct MapGenerator {
    room_code: String,
    size: MapSize,
    crate_density: f64,
}

impl MapGenerator {
    /// Generator with the default crate density.
    pub fn new(room_code: impl Into<String>, size: MapSize) -> Self {
        Self {
            room_code: room_code.into(),
            size,
            crate_density: DEFAULT_CRATE_DENSITY,
        }
    }

    /// Override the crate density (clamped to `[0, 1]`).
    pub fn with_crate_density(mut self, density: f64) -> Self {
        self.crate_density = density.clamp(0.0, 1.0);
        self
    }

    /// Build the grid.
    ///
    /// Border walls, pillars at every interior (even, even) cell, then crates on
    /// remaining empty cells outside the 8-neighbourhood of every spawn
    /// candidate. The sine seed advances once per evaluated cell, row-major.
    pub fn generate(&self) -> Grid {
        let (width, height) = self.size.dimensions();
        let mut grid = Grid::new(width, height);

        for y in 0..height {
            for x in 0..width {
                let border = x == 0 || y == 0 || x == width - 1 || y == height - 1;
                let pillar = x % 2 == 0 && y % 2 == 0;
                if border || pillar {
                    grid.set(Cell::new(x, y), GridCell::Wall);
                }
            }
        }

        let spawns = spawn_candidates(width, height);
        let mut rng = SineRandom::from_room_code(&self.room_code);

        for y in 0..height {
            for x in 0..width {
                let cell = Cell::new(x, y);
                if !grid.is_empty(cell) {
                    continue;
                }
                if spawns.iter().any(|s| s.chebyshev(cell) <= 1) {
                    continue;
                }
                if rng.next_f64() < self.crate_density {
                    grid.set(cell, GridCell::Destructible);
                }
            }
        }

        grid
    }
}

/// Generate the grid for a room with default density.
pub fn generate_map(room_code: &str, size: MapSize) -> Grid {
    MapGenerator::new(room_code, size).generate()
}

// =============================================================================
// SPAWN ALLOCATOR
// =============================================================================

/// Snap an even coordinate down to the nearest odd one (pillars sit on evens).
#[inline]
fn odd(v: i32) -> i32 {
    if v % 2 == 0 { (v - 1).max(1) } else { v }
}

/// Ordered spawn candidates: 4 corners, 4 edge midpoints, 2 diagonal quarter points.
pub fn spawn_candidates(width: i32, height: i32) -> Vec<Cell> {
    let (w, h) = (width, height);
    let raw = [
        Cell::new(1, 1),
        Cell::new(w - 2, h - 2),
        Cell::new(w - 2, 1),
        Cell::new(1, h - 2),
        Cell::new(w / 2, 1),
        Cell::new(w / 2, h - 2),
        Cell::new(1, h / 2),
        Cell::new(w - 2, h / 2),
        Cell::new(w / 4, h / 4),
        Cell::new(3 * w / 4, 3 * h / 4),
    ];

    let mut out: Vec<Cell> = Vec::with_capacity(MAX_SPAWN_CANDIDATES);
    for cell in raw {
        let snapped = Cell::new(odd(cell.x), odd(cell.y));
        if !out.contains(&snapped) {
            out.push(snapped);
        }
    }
    out
}

/// Spawn cell for the player at join-order index `index`.
pub fn spawn_for_index(width: i32, height: i32, index: usize) -> Cell {
    let candidates = spawn_candidates(width, height);
    candidates[index % candidates.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_size_table() {
        assert_eq!(MapSize::Small.dimensions(), (13, 11));
        assert_eq!(MapSize::Medium.dimensions(), (15, 13));
        assert_eq!(MapSize::Large.dimensions(), (19, 17));
    }

    #[test]
    fn test_generate_is_deterministic() {
        let a = generate_map("ABCDEF", MapSize::Medium);
        let b = generate_map("ABCDEF", MapSize::Medium);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_medium_map_layout() {
        let grid = generate_map("ABCDEF", MapSize::Medium);
        assert_eq!(grid.width(), 15);
        assert_eq!(grid.height(), 13);

        for x in 0..15 {
            assert_eq!(grid.get(Cell::new(x, 0)), Some(GridCell::Wall));
            assert_eq!(grid.get(Cell::new(x, 12)), Some(GridCell::Wall));
        }
        for y in 0..13 {
            assert_eq!(grid.get(Cell::new(0, y)), Some(GridCell::Wall));
            assert_eq!(grid.get(Cell::new(14, y)), Some(GridCell::Wall));
        }
        for y in (2..12).step_by(2) {
            for x in (2..14).step_by(2) {
                assert_eq!(grid.get(Cell::new(x, y)), Some(GridCell::Wall));
            }
        }

        let corners = [Cell::new(1, 1), Cell::new(13, 1), Cell::new(1, 11), Cell::new(13, 11)];
        for (cell, kind) in grid.iter() {
            if kind == GridCell::Destructible {
                assert!(corners.iter().all(|c| c.chebyshev(cell) > 1), "crate next to spawn at {:?}", cell);
            }
        }
        assert!(grid.count(GridCell::Destructible) > 0);
    }

    #[test]
    fn test_different_rooms_differ() {
        let a = generate_map("ABCDEF", MapSize::Medium);
        let b = generate_map("QWERTY", MapSize::Medium);
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_density_has_no_crates() {
        let grid = MapGenerator::new("ABCDEF", MapSize::Large)
            .with_crate_density(0.0)
            .generate();
        assert_eq!(grid.count(GridCell::Destructible), 0);
    }

    #[test]
    fn test_spawn_candidates_medium() {
        let spawns = spawn_candidates(15, 13);
        assert_eq!(spawns.len(), 10);
        assert_eq!(&spawns[..4], &[
            Cell::new(1, 1),
            Cell::new(13, 11),
            Cell::new(13, 1),
            Cell::new(1, 11),
        ]);
        let grid = generate_map("ABCDEF", MapSize::Medium);
        for spawn in spawns {
            assert_eq!(grid.get(spawn), Some(GridCell::Empty), "spawn {:?} blocked", spawn);
        }
    }

    #[test]
    fn test_spawn_for_index_wraps() {
        let n = spawn_candidates(15, 13).len();
        assert_eq!(spawn_for_index(15, 13, 0), spawn_for_index(15, 13, n));
        assert_eq!(spawn_for_index(15, 13, 1), Cell::new(13, 11));
    }

    proptest! {
        #[test]
        fn prop_generate_deterministic(code in "[A-Z0-9]{1,8}") {
            for size in [MapSize::Small, MapSize::Medium, MapSize::Large] {
                let a = generate_map(&code, size);
                let b = generate_map(&code, size);
                prop_assert_eq!(a.fingerprint(), b.fingerprint());
                for spawn in spawn_candidates(a.width(), a.height()) {
                    prop_assert_eq!(a.get(spawn), Some(GridCell::Empty));
                }
            }
        }
    }
}
