//! Network Gateway Contract
//!
//! The shared real-time store every participant reads and writes. The core
//! consumes this trait; production backends and the in-memory test store
//! implement it.
//!
//! Writes are fire-and-forget from the caller's point of view: a failure is
//! returned so it can be logged, and the next heartbeat or state push
//! naturally repairs it.

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Store unreachable (connection dropped, offline)
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// Path is empty or contains an empty segment
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// Value could not be (de)serialized
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A standing subscription. Dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    /// Path the subscription watches
    pub path: String,
    /// Full value at the path after every change (`Null` when absent)
    pub updates: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    /// Latest value delivered since the last drain, skipping stale ones.
    pub fn latest(&mut self) -> Option<Value> {
        let mut latest = None;
        while let Ok(value) = self.updates.try_recv() {
            latest = Some(value);
        }
        latest
    }
}

/// Abstract real-time store.
pub trait NetworkGateway: Send + Sync {
    /// Watch a path. The current value is delivered immediately.
    fn subscribe(&self, path: &str) -> Result<Subscription, GatewayError>;

    /// Replace the value at a path.
    fn write(&self, path: &str, value: Value) -> Result<(), GatewayError>;

    /// Merge fields into the object at a path without touching siblings.
    fn patch(&self, path: &str, fields: Map<String, Value>) -> Result<(), GatewayError>;

    /// Delete the value at a path.
    fn remove(&self, path: &str) -> Result<(), GatewayError>;

    /// Add a child under a server-ordered unique key. Returns the key.
    fn append(&self, path: &str, value: Value) -> Result<String, GatewayError>;

    /// Remove `path` when this client's connection drops.
    fn on_disconnect_remove(&self, path: &str) -> Result<(), GatewayError>;

    /// Read the value at a path once.
    fn read_once(&self, path: &str) -> Result<Option<Value>, GatewayError>;
}

/// Split a slash-separated path into segments.
pub fn split_path(path: &str) -> Result<Vec<&str>, GatewayError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(GatewayError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(GatewayError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

// =============================================================================
// ROOM PATH LAYOUT
// =============================================================================

/// Paths under `rooms/{code}`.
pub mod paths {
    /// Room root.
    pub fn room(code: &str) -> String {
        format!("rooms/{}", code)
    }

    /// Room metadata (code, host, status, timestamps).
    pub fn metadata(code: &str) -> String {
        format!("rooms/{}/metadata", code)
    }

    /// Room settings.
    pub fn settings(code: &str) -> String {
        format!("rooms/{}/settings", code)
    }

    /// One lobby slot.
    pub fn slot(code: &str, player_id: &str) -> String {
        format!("rooms/{}/players/{}", code, player_id)
    }

    /// Whole synchronized game state.
    pub fn game_state(code: &str) -> String {
        format!("rooms/{}/gameState", code)
    }

    /// One in-game player.
    pub fn game_player(code: &str, player_id: &str) -> String {
        format!("rooms/{}/gameState/players/{}", code, player_id)
    }

    /// One bomb.
    pub fn bomb(code: &str, bomb_id: &str) -> String {
        format!("rooms/{}/gameState/bombs/{}", code, bomb_id)
    }

    /// Explosion event log.
    pub fn explosions(code: &str) -> String {
        format!("rooms/{}/gameState/explosions", code)
    }

    /// One power-up.
    pub fn powerup(code: &str, powerup_id: &str) -> String {
        format!("rooms/{}/gameState/powerups/{}", code, powerup_id)
    }

    /// Published grid.
    pub fn grid(code: &str) -> String {
        format!("rooms/{}/gameState/grid", code)
    }
}
