//! Explosion Application
//!
//! Turns a detonation into its permanent rule effects: crates destroyed,
//! players eliminated, other bombs in the blast scheduled to chain. Effects
//! are applied exactly once per explosion id.
//!
//! Uses mark-then-apply: the affected cells are scanned first and the
//! collected crates, victims and bombs are mutated afterwards.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::rng::DeterministicRng;
use crate::game::bomb::explosion_cells;
use crate::game::events::GameEvent;
use crate::game::grid::{Cell, GridCell};
use crate::game::powerup::{roll_powerup, spawn_powerup};
use crate::game::schedule::{ScheduledTask, TaskQueue};
use crate::game::state::{
    BombId, BombState, ExplosionId, ExplosionState, MatchState, PlayerId, PowerUpId,
};
use crate::game::tick::MatchConfig;

/// What one explosion did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplosionReport {
    /// Explosion id
    pub explosion_id: ExplosionId,
    /// Owner of the bomb
    pub owner_id: PlayerId,
    /// Affected cells
    pub cells: Vec<Cell>,
    /// Crates turned to empty
    pub destroyed: Vec<Cell>,
    /// Players eliminated
    pub eliminated: Vec<PlayerId>,
    /// Bombs scheduled to chain
    pub chained: Vec<BombId>,
    /// Power-ups dropped by destroyed crates
    pub spawned: Vec<PowerUpId>,
}

/// Remove a bomb from the store and free its owner's slot.
pub fn retire_bomb(state: &mut MatchState, bomb_id: &BombId) -> Option<BombState> {
    let mut bomb = state.bombs.remove(bomb_id)?;
    bomb.exploded = true;

    if let Some(owner) = state.get_player_mut(&bomb.owner_id) {
        owner.current_bombs = owner.current_bombs.saturating_sub(1);
    }
    state.refresh_cell(bomb.cell);
    Some(bomb)
}

/// Detonate a bomb now.
///
/// `spawner` is passed only by the participant that owns the bomb; others
/// leave power-up drops to the owner's published state.
pub fn detonate_bomb(
    state: &mut MatchState,
    bomb_id: &BombId,
    now_ms: u64,
    config: &MatchConfig,
    queue: &mut TaskQueue,
    spawner: Option<&mut DeterministicRng>,
) -> Option<ExplosionReport> {
    let grid = state.grid.as_ref()?;
    let bomb = state.bombs.get(bomb_id)?;
    let cells = explosion_cells(grid, bomb.cell, bomb.range);

    let bomb = retire_bomb(state, bomb_id)?;
    let explosion = ExplosionState {
        id: ExplosionId::from(&bomb.id),
        owner_id: bomb.owner_id,
        cells,
        at_ms: now_ms,
        expires_at: now_ms.saturating_add(config.explosion_display_ms),
    };

    apply_explosion(state, explosion, now_ms, config, queue, spawner)
}

/// Apply an explosion's effects. Returns `None` if this id is already on
/// display, so replays of the same event are no-ops.
pub fn apply_explosion(
    state: &mut MatchState,
    explosion: ExplosionState,
    now_ms: u64,
    config: &MatchConfig,
    queue: &mut TaskQueue,
    mut spawner: Option<&mut DeterministicRng>,
) -> Option<ExplosionReport> {
    if state.explosions.contains_key(&explosion.id) {
        debug!(explosion = %explosion.id, "Explosion already applied");
        return None;
    }

    // Mark
    let crates: Vec<Cell> = explosion
        .cells
        .iter()
        .copied()
        .filter(|&c| state.cell_at(c) == Some(GridCell::Destructible))
        .collect();

    let victims: Vec<PlayerId> = state
        .players
        .values()
        .filter(|p| p.alive && explosion.cells.contains(&p.cell))
        .map(|p| p.id.clone())
        .collect();

    let bomb_self = BombId::new(explosion.id.as_str());
    let chained: Vec<BombId> = state
        .bombs
        .values()
        .filter(|b| !b.exploded && b.id != bomb_self && explosion.cells.contains(&b.cell))
        .map(|b| b.id.clone())
        .collect();

    let mut report = ExplosionReport {
        explosion_id: explosion.id.clone(),
        owner_id: explosion.owner_id.clone(),
        cells: explosion.cells.clone(),
        destroyed: Vec::new(),
        eliminated: Vec::new(),
        chained: Vec::new(),
        spawned: Vec::new(),
    };

    // Apply: crates
    let chance = if config.powerups_enabled { config.powerup_spawn_chance } else { 0.0 };
    for cell in crates {
        if let Some(grid) = state.grid.as_mut() {
            grid.set(cell, GridCell::Empty);
        }
        state.refresh_cell(cell);
        state.push_event(GameEvent::cell_destroyed(now_ms, cell));
        report.destroyed.push(cell);

        if let Some(rng) = spawner.as_deref_mut() {
            if let Some(kind) = roll_powerup(rng, chance) {
                report.spawned.push(spawn_powerup(state, cell, kind, now_ms));
            }
        }
    }

    // Apply: victims
    for victim in victims {
        if let Some(event) = state.eliminate_player(&victim, Some(&explosion.owner_id), now_ms) {
            state.push_event(event);
            report.eliminated.push(victim);
        }
    }

    // Apply: chain reactions
    for bomb_id in chained {
        if !queue.has_detonation(&bomb_id) {
            queue.schedule(now_ms.saturating_add(config.chain_delay_ms), ScheduledTask::Detonate(bomb_id.clone()));
        }
        report.chained.push(bomb_id);
    }

    queue.schedule(explosion.expires_at, ScheduledTask::ClearExplosion(explosion.id.clone()));
    state.push_event(GameEvent::bomb_exploded(
        now_ms,
        explosion.id.clone(),
        explosion.owner_id.clone(),
        explosion.cells.clone(),
    ));
    state.explosions.insert(explosion.id.clone(), explosion);

    Some(report)
}
