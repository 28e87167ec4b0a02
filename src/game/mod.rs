//! Game Logic Module
//!
//! All match simulation code. Map generation and rule outcomes are
//! deterministic; rendered positions are not.
//!
//! ## Module Structure
//!
//! - `grid`: Cell codes, coordinates, the grid itself
//! - `map`: Seeded map generation and spawn allocation
//! - `input`: Per-frame local input
//! - `state`: Match state, player state, entities
//! - `schedule`: Cancellable deferred tasks
//! - `movement`: Cell moves, kicks, rolling bombs, interpolation
//! - `bomb`: Placement and blast propagation
//! - `explosion`: Explosion effects and kill accounting
//! - `powerup`: Power-up drops and collection
//! - `events`: Game events
//! - `tick`: Simulation engine

pub mod grid;
pub mod map;
pub mod input;
pub mod state;
pub mod schedule;
pub mod movement;
pub mod bomb;
pub mod explosion;
pub mod powerup;
pub mod events;
pub mod tick;

// Re-export key types
pub use grid::{Cell, Direction, Grid, GridCell};
pub use map::{MapGenerator, MapSize};
pub use input::InputFrame;
pub use state::{MatchState, PlayerState, PlayerId, BombId, ExplosionId, PowerUpId, PowerUpType};
pub use tick::{ActionError, MatchConfig, SimulationEngine, TickResult};
pub use events::GameEvent;
