//! Network Layer
//!
//! Everything between the local engine and the shared real-time store.
//! This layer is **non-deterministic**: delivery order, timing and duplicate
//! delivery vary, and reconciliation absorbs it. All rule logic runs through
//! `game/`.
//!
//! - `gateway`: Store contract and room path layout
//! - `memory`: In-process store for the demo and tests
//! - `protocol`: Wire records and snapshot normalisation
//! - `reconcile`: Snapshot merge, explosion dedup, publish throttle
//! - `session`: Room lifecycle and room directory
//! - `participant`: One player's engine bound to the store

pub mod gateway;
pub mod memory;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod participant;

pub use gateway::{GatewayError, NetworkGateway, Subscription};
pub use memory::{InMemoryGateway, InMemoryStore};
pub use protocol::{GameSnapshot, SnapshotError};
pub use reconcile::{Reconciler, ReconcileReport, SyncConfig};
pub use session::{Room, RoomDirectory, RoomError, RoomSettings, RoomStatus, PlayerSlot, LeaveOutcome, MatchResults};
pub use participant::{MatchParticipant, ParticipantError, FrameReport};
