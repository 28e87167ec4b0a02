//! Core deterministic primitives.
//!
//! Seeded generators and state hashing shared by map generation and the
//! simulation. Nothing here touches the clock or the network.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::{DeterministicRng, SineRandom, room_code_seed, derive_room_seed};
pub use hash::{StateHash, StateHasher};
