//! # Bomb Arena Engine
//!
//! Simulation and state reconciliation for a real-time grid bomb arena.
//! Every participant runs the full simulation locally and converges with the
//! others through a shared real-time store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BOMB ARENA ENGINE                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Seeded generators (map, power-up drops)   │
//! │  └── hash.rs     - State hashing and grid fingerprints       │
//! │                                                              │
//! │  game/           - Match rules                               │
//! │  ├── grid.rs     - Cell codes and the grid                   │
//! │  ├── map.rs      - Seeded map generation, spawns             │
//! │  ├── state.rs    - Match, player and entity state            │
//! │  ├── movement.rs - Moves, kicks, rolling bombs               │
//! │  ├── bomb.rs     - Placement and blast propagation           │
//! │  ├── explosion.rs- Explosion effects, kill credit            │
//! │  ├── powerup.rs  - Drops and collection                      │
//! │  └── tick.rs     - Simulation engine                         │
//! │                                                              │
//! │  network/        - Synchronisation (non-deterministic)       │
//! │  ├── gateway.rs  - Store contract and path layout            │
//! │  ├── protocol.rs - Wire records, snapshot normalisation      │
//! │  ├── reconcile.rs- Snapshot merge and dedup                  │
//! │  ├── session.rs  - Room lifecycle                            │
//! │  └── participant.rs - Engine bound to the store              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! Map layout and spawn allocation are pure functions of the room code, so
//! every participant derives the same map. Rule state (cells, bombs,
//! power-ups, alive flags) is hashed in a canonical order; rendered player
//! positions are eased floats and excluded from the hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{ArenaConfig, ConfigError, RoomDefaults};
pub use core::rng::DeterministicRng;
pub use game::input::InputFrame;
pub use game::state::{MatchState, PlayerState, PlayerId};
pub use game::tick::{MatchConfig, SimulationEngine};
pub use network::{MatchParticipant, NetworkGateway, RoomDirectory};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
