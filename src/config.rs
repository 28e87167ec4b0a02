//! Arena Configuration
//!
//! One JSON document with three sections. Every field is optional and falls
//! back to its default.
//!
//! ```json
//! {
//!   "room": { "maxPlayers": 6, "mapSize": "large" },
//!   "sim": { "fuse_ms": 2500 },
//!   "sync": { "publish_interval_ms": 50 }
//! }
//! ```

use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::map::{MapSize, DEFAULT_CRATE_DENSITY};
use crate::game::powerup::PowerUpDensity;
use crate::game::tick::MatchConfig;
use crate::network::reconcile::SyncConfig;
use crate::network::session::RoomSettings;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Document is not valid config JSON
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Defaults for new rooms and room housekeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomDefaults {
    /// Capacity of a new room
    pub max_players: u8,
    /// Match length (seconds)
    pub match_duration_secs: u32,
    /// Map size
    pub map_size: MapSize,
    /// Power-up drop rate
    pub powerup_density: PowerUpDensity,
    /// Power-ups on or off
    pub powerups_enabled: bool,
    /// Crate density
    pub crate_density: f64,
    /// How long an end condition must hold before the match ends (ms)
    pub end_dwell_ms: u64,
    /// Ready toggles closer together than this are ignored (ms)
    pub ready_debounce_ms: u64,
    /// Silence after which a disconnected player is eliminated (ms)
    pub disconnect_timeout_ms: u64,
    /// How long a finished room is kept (ms)
    pub finished_ttl_ms: u64,
}

impl Default for RoomDefaults {
    fn default() -> Self {
        Self {
            max_players: 4,
            match_duration_secs: 180,
            map_size: MapSize::Medium,
            powerup_density: PowerUpDensity::Medium,
            powerups_enabled: true,
            crate_density: DEFAULT_CRATE_DENSITY,
            end_dwell_ms: 1500,
            ready_debounce_ms: 300,
            disconnect_timeout_ms: 30_000,
            finished_ttl_ms: 600_000,
        }
    }
}

impl RoomDefaults {
    /// Settings for a freshly created room.
    pub fn settings(&self) -> RoomSettings {
        RoomSettings {
            map_size: self.map_size,
            match_duration_secs: self.match_duration_secs,
            powerup_density: self.powerup_density,
            powerups_enabled: self.powerups_enabled,
            max_players: self.max_players,
            crate_density: self.crate_density,
        }
        .clamped()
    }
}

/// Full arena configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Room defaults
    pub room: RoomDefaults,
    /// Simulation tuning
    pub sim: MatchConfig,
    /// Synchronisation tuning
    pub sync: SyncConfig,
}

impl ArenaConfig {
    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Simulation config for a room, with its power-up settings applied.
    pub fn match_config(&self, settings: &RoomSettings) -> MatchConfig {
        self.sim
            .clone()
            .with_powerups(settings.powerups_enabled, settings.powerup_density)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = ArenaConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ArenaConfig::default());
        assert_eq!(config.room.end_dwell_ms, 1500);
        assert_eq!(config.room.ready_debounce_ms, 300);
    }

    #[test]
    fn test_partial_sections() {
        let config = ArenaConfig::from_json_str(
            r#"{"room": {"maxPlayers": 6, "mapSize": "large"}, "sim": {"fuse_ms": 2500}}"#,
        )
        .unwrap();
        assert_eq!(config.room.max_players, 6);
        assert_eq!(config.room.map_size, MapSize::Large);
        assert_eq!(config.room.match_duration_secs, 180);
        assert_eq!(config.sim.fuse_ms, 2500);
        assert_eq!(config.sim.chain_delay_ms, MatchConfig::default().chain_delay_ms);
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn test_settings_are_clamped() {
        let defaults = RoomDefaults { max_players: 40, ..RoomDefaults::default() };
        assert_eq!(defaults.settings().max_players, 10);
    }

    #[test]
    fn test_match_config_follows_room() {
        let config = ArenaConfig::default();
        let settings = RoomSettings { powerups_enabled: false, ..RoomSettings::default() };
        assert!(!config.match_config(&settings).powerups_enabled);

        let settings = RoomSettings { powerup_density: PowerUpDensity::High, ..RoomSettings::default() };
        assert_eq!(config.match_config(&settings).powerup_spawn_chance, 0.5);
    }

    #[test]
    fn test_bad_json_and_missing_file() {
        assert!(matches!(ArenaConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            ArenaConfig::from_json_file("/nonexistent/arena.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
