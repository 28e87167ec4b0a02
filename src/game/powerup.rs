//! Power-up Spawning and Collection
//!
//! Destroyed crates roll a density-weighted chance to drop a power-up.
//! Collection is one-shot: the first claim removes the power-up from the store.

use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use crate::game::events::GameEvent;
use crate::game::grid::Cell;
use crate::game::state::{
    MatchState, PlayerId, PlayerState, PowerUpId, PowerUpState, PowerUpType,
    MAX_BOMBS_CAP, MAX_RANGE_CAP, MAX_SPEED,
};
use crate::game::tick::MatchConfig;

/// Power-up density setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum PowerUpDensity {
    /// 20% per crate
    Low,
    /// 35% per crate
    #[default]
    Medium,
    /// 50% per crate
    High,
}

impl PowerUpDensity {
    /// Chance that a destroyed crate drops a power-up.
    pub fn spawn_chance(self) -> f64 {
        match self {
            PowerUpDensity::Low => 0.2,
            PowerUpDensity::Medium => 0.35,
            PowerUpDensity::High => 0.5,
        }
    }
}

/// Roll for a drop. `None` means no power-up.
pub fn roll_powerup(rng: &mut DeterministicRng, chance: f64) -> Option<PowerUpType> {
    if chance <= 0.0 || !rng.next_bool(chance) {
        return None;
    }
    let idx = rng.pick_weighted(&PowerUpType::WEIGHTS);
    PowerUpType::ALL.get(idx).copied()
}

/// Place a power-up on a cell and mark the grid.
pub fn spawn_powerup(state: &mut MatchState, cell: Cell, kind: PowerUpType, now_ms: u64) -> PowerUpId {
    let id = PowerUpId::generate();
    state.powerups.insert(id.clone(), PowerUpState::new(id.clone(), cell, kind, now_ms));
    state.refresh_cell(cell);
    state.push_event(GameEvent::powerup_spawned(now_ms, id.clone(), kind, cell));
    id
}

/// Apply a power-up's effect to a player's stats.
pub fn apply_effect(player: &mut PlayerState, kind: PowerUpType, now_ms: u64, config: &MatchConfig) {
    match kind {
        PowerUpType::Speed => player.speed = player.speed.saturating_add(1).min(MAX_SPEED),
        PowerUpType::ExtraBomb => player.max_bombs = player.max_bombs.saturating_add(1).min(MAX_BOMBS_CAP),
        PowerUpType::Range => player.bomb_range = player.bomb_range.saturating_add(1).min(MAX_RANGE_CAP),
        PowerUpType::Kick => player.can_kick = true,
        PowerUpType::Invincible => {
            player.invincible_until = now_ms.saturating_add(config.invincibility_ms);
        }
    }
}

/// Claim a power-up for a player. Returns `None` if it is already gone or
/// the player is dead.
pub fn collect_powerup(
    state: &mut MatchState,
    player_id: &PlayerId,
    powerup_id: &PowerUpId,
    now_ms: u64,
    config: &MatchConfig,
) -> Option<GameEvent> {
    if !state.get_player(player_id)?.alive {
        return None;
    }

    let powerup = state.powerups.get(powerup_id)?;
    if powerup.collected {
        return None;
    }
    let (cell, kind) = (powerup.cell, powerup.kind);

    state.powerups.remove(powerup_id);
    state.refresh_cell(cell);

    let player = state.get_player_mut(player_id)?;
    apply_effect(player, kind, now_ms, config);

    Some(GameEvent::powerup_collected(now_ms, powerup_id.clone(), player_id.clone(), kind))
}

/// Collect power-ups under the given players. Returns `(powerup, player)` claims.
pub fn collect_powerups<'a>(
    state: &mut MatchState,
    players: impl IntoIterator<Item = &'a PlayerId>,
    now_ms: u64,
    config: &MatchConfig,
) -> Vec<(PowerUpId, PlayerId)> {
    let mut claims = Vec::new();

    for player_id in players {
        let Some(player) = state.get_player(player_id) else { continue };
        if !player.alive {
            continue;
        }
        let Some(powerup_id) = state.powerup_at(player.cell).map(|p| p.id.clone()) else {
            continue;
        };

        if let Some(event) = collect_powerup(state, player_id, &powerup_id, now_ms, config) {
            state.push_event(event);
            claims.push((powerup_id, player_id.clone()));
        }
    }

    claims
}
