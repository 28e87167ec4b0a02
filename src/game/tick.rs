//! Simulation Tick
//!
//! One `SimulationEngine` owns the state of one match on one participant.
//! Each tick applies local inputs, advances rolling bombs, detonates expired
//! fuses, drains scheduled work and collects power-ups. All timers are
//! wall-clock based: the caller passes `now_ms` in.
//!
//! Rule outcomes only depend on the grid, the inputs and the order they are
//! applied in. Continuous positions are cosmetic and may differ per machine.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::core::rng::DeterministicRng;
use crate::game::bomb::{expired_bombs, place_bomb};
use crate::game::events::GameEvent;
use crate::game::explosion::{apply_explosion, detonate_bomb, retire_bomb, ExplosionReport};
use crate::game::grid::Cell;
use crate::game::input::InputFrame;
use crate::game::movement::{advance_rolling_bombs, interpolate_positions, try_move, MoveOutcome};
use crate::game::powerup::{collect_powerups, PowerUpDensity};
use crate::game::schedule::{ScheduledTask, TaskQueue};
use crate::game::state::{BombId, ExplosionState, MatchState, PlayerId, PowerUpId};

// =============================================================================
// CONFIG
// =============================================================================

/// Configuration for match simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Fuse length (ms)
    pub fuse_ms: u64,
    /// How long an explosion stays on display (ms)
    pub explosion_display_ms: u64,
    /// Delay before a bomb caught in a blast detonates (ms)
    pub chain_delay_ms: u64,
    /// Invincibility granted by the power-up (ms)
    pub invincibility_ms: u64,
    /// Move interval at speed level 1 (ms)
    pub base_move_interval_ms: u64,
    /// Interval reduction per speed level (ms)
    pub move_interval_step_ms: u64,
    /// Floor on the move interval (ms)
    pub min_move_interval_ms: u64,
    /// Exponential easing rate for rendered positions (per second)
    pub interpolation_rate: f32,
    /// Time a kicked bomb spends on each cell (ms)
    pub bomb_roll_interval_ms: u64,
    /// Chance a destroyed crate drops a power-up
    pub powerup_spawn_chance: f64,
    /// Power-ups on or off
    pub powerups_enabled: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            fuse_ms: 3000,
            explosion_display_ms: 500,
            chain_delay_ms: 100,
            invincibility_ms: 5000,
            base_move_interval_ms: 180,
            move_interval_step_ms: 20,
            min_move_interval_ms: 80,
            interpolation_rate: 15.0,
            bomb_roll_interval_ms: 60,
            powerup_spawn_chance: PowerUpDensity::Medium.spawn_chance(),
            powerups_enabled: true,
        }
    }
}

impl MatchConfig {
    /// Apply room-level power-up settings.
    pub fn with_powerups(mut self, enabled: bool, density: PowerUpDensity) -> Self {
        self.powerups_enabled = enabled;
        self.powerup_spawn_chance = density.spawn_chance();
        self
    }
}

// =============================================================================
// ERRORS & RESULTS
// =============================================================================

/// A rejected player action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Player is not in the match
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// Player is dead
    #[error("player is eliminated")]
    PlayerDead,

    /// Grid not generated or adopted yet
    #[error("no grid in play")]
    NoGrid,

    /// All bombs already planted
    #[error("no bombs available")]
    NoBombsAvailable,

    /// One bomb per cell
    #[error("cell ({}, {}) already holds a bomb", .0.x, .0.y)]
    CellOccupied(Cell),
}

/// What one input frame did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputOutcome {
    /// Bomb planted this frame
    pub placed: Option<BombId>,
    /// Movement result
    pub movement: Option<MoveOutcome>,
}

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick, in event order
    pub events: Vec<GameEvent>,
    /// Explosions applied this tick
    pub explosions: Vec<ExplosionReport>,
    /// Bombs planted this tick
    pub placed_bombs: Vec<BombId>,
    /// Bombs that rolled or stopped this tick
    pub moved_bombs: Vec<BombId>,
    /// Power-ups claimed this tick
    pub collected: Vec<(PowerUpId, PlayerId)>,
    /// Controlled players whose rule state changed
    pub changed_players: Vec<PlayerId>,
    /// Inputs rejected this tick
    pub rejected_inputs: u32,
    /// Alive players after the tick
    pub alive_players: u32,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Per-match simulation owned by one participant.
#[derive(Debug)]
pub struct SimulationEngine {
    state: MatchState,
    config: MatchConfig,
    tasks: TaskQueue,
    rng: DeterministicRng,
    local_player: Option<PlayerId>,
    last_tick_ms: Option<u64>,
}

impl SimulationEngine {
    /// Engine that controls every player (offline or single-machine play).
    pub fn new(state: MatchState, config: MatchConfig) -> Self {
        let rng = DeterministicRng::for_room(&state.room_code);
        Self {
            state,
            config,
            tasks: TaskQueue::new(),
            rng,
            local_player: None,
            last_tick_ms: None,
        }
    }

    /// Engine that controls only `local` and mirrors everyone else.
    pub fn for_participant(state: MatchState, config: MatchConfig, local: PlayerId) -> Self {
        let mut engine = Self::new(state, config);
        engine.local_player = Some(local);
        engine
    }

    /// Current state.
    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// Mutable state, for reconciliation.
    pub fn state_mut(&mut self) -> &mut MatchState {
        &mut self.state
    }

    /// Simulation config.
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// The locally controlled player, if any.
    pub fn local_player(&self) -> Option<&PlayerId> {
        self.local_player.as_ref()
    }

    /// Does this engine drive `player_id`'s inputs?
    pub fn controls(&self, player_id: &PlayerId) -> bool {
        self.local_player.as_ref().map_or(true, |local| local == player_id)
    }

    /// Does this engine publish the bomb's explosion and roll its drops?
    pub fn owns_bomb(&self, bomb_id: &BombId) -> bool {
        self.state
            .bombs
            .get(bomb_id)
            .is_some_and(|b| self.controls(&b.owner_id))
    }

    /// Pending scheduled tasks.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Apply one frame of input for a controlled player.
    pub fn apply_input(
        &mut self,
        player_id: &PlayerId,
        input: &InputFrame,
        now_ms: u64,
    ) -> Result<InputOutcome, ActionError> {
        let mut outcome = InputOutcome::default();

        if input.bomb_pressed() {
            outcome.placed = Some(place_bomb(&mut self.state, player_id, now_ms, &self.config)?);
        }
        if let Some(dir) = input.direction {
            outcome.movement = Some(try_move(&mut self.state, player_id, dir, now_ms, &self.config)?);
        }

        Ok(outcome)
    }

    /// Run one tick.
    ///
    /// `inputs` is a BTreeMap so inputs apply in player-id order. Inputs for
    /// players this engine does not control are ignored. A rejected input is
    /// logged and does not stop the rest of the tick.
    pub fn tick(&mut self, inputs: &BTreeMap<PlayerId, InputFrame>, now_ms: u64) -> TickResult {
        let mut result = TickResult::default();
        let dt_secs = self
            .last_tick_ms
            .map_or(0.0, |last| now_ms.saturating_sub(last) as f32 / 1000.0);
        self.last_tick_ms = Some(now_ms);

        // 1. Local inputs
        for (player_id, input) in inputs {
            if !self.controls(player_id) || input.is_idle() {
                continue;
            }
            match self.apply_input(player_id, input, now_ms) {
                Ok(outcome) => {
                    if let Some(bomb_id) = outcome.placed {
                        result.placed_bombs.push(bomb_id);
                    }
                    if matches!(outcome.movement, Some(MoveOutcome::Moved(_)) | Some(MoveOutcome::Kicked(_))) {
                        push_unique(&mut result.changed_players, player_id);
                    }
                    if let Some(MoveOutcome::Kicked(bomb_id)) = outcome.movement {
                        result.moved_bombs.push(bomb_id);
                    }
                }
                Err(e) => {
                    debug!(player = %player_id, error = %e, "Input rejected");
                    result.rejected_inputs += 1;
                }
            }
        }
        for bomb_id in &result.placed_bombs {
            if let Some(owner) = self.state.bombs.get(bomb_id).map(|b| b.owner_id.clone()) {
                push_unique(&mut result.changed_players, &owner);
            }
        }

        // 2. Rolling bombs
        for bomb_id in advance_rolling_bombs(&mut self.state, now_ms, &self.config) {
            if !result.moved_bombs.contains(&bomb_id) {
                result.moved_bombs.push(bomb_id);
            }
        }

        // 3. Fuse expiry (ids collected before any detonation)
        for bomb_id in expired_bombs(&self.state, now_ms) {
            if let Some(report) = self.detonate(&bomb_id, now_ms) {
                result.explosions.push(report);
            }
        }

        // 4. Scheduled work; a zero chain delay schedules at `now_ms`, so drain until quiet
        loop {
            let due = self.tasks.drain_due(now_ms);
            if due.is_empty() {
                break;
            }
            for task in due {
                match task {
                    ScheduledTask::Detonate(bomb_id) => {
                        if let Some(report) = self.detonate(&bomb_id, now_ms) {
                            result.explosions.push(report);
                        }
                    }
                    ScheduledTask::ClearExplosion(explosion_id) => {
                        self.state.explosions.remove(&explosion_id);
                    }
                }
            }
        }

        // 5. Power-ups under controlled players
        let controlled: Vec<PlayerId> = self
            .state
            .players
            .keys()
            .filter(|id| self.controls(id))
            .cloned()
            .collect();
        result.collected = collect_powerups(&mut self.state, &controlled, now_ms, &self.config);
        for (_, player_id) in &result.collected {
            push_unique(&mut result.changed_players, player_id);
        }

        for report in &result.explosions {
            for victim in &report.eliminated {
                if self.controls(victim) {
                    push_unique(&mut result.changed_players, victim);
                }
            }
            if self.controls(&report.owner_id) {
                push_unique(&mut result.changed_players, &report.owner_id);
            }
        }

        // 6. Cosmetic easing
        interpolate_positions(&mut self.state, dt_secs, &self.config);

        result.events = self.state.take_events();
        result.events.sort();
        result.alive_players = self.state.alive_player_count();

        trace!(
            room = %self.state.room_code,
            events = result.events.len(),
            explosions = result.explosions.len(),
            "Tick complete"
        );

        #[cfg(feature = "debug-tracing")]
        trace!(
            room = %self.state.room_code,
            now_ms,
            hash = %hex::encode(self.state.compute_hash()),
            "State hash"
        );

        result
    }

    /// Detonate a bomb immediately. Drops are rolled only for owned bombs.
    pub fn detonate(&mut self, bomb_id: &BombId, now_ms: u64) -> Option<ExplosionReport> {
        let spawner = if self.owns_bomb(bomb_id) && self.config.powerups_enabled {
            Some(&mut self.rng)
        } else {
            None
        };
        detonate_bomb(&mut self.state, bomb_id, now_ms, &self.config, &mut self.tasks, spawner)
    }

    /// Apply an explosion observed on the network.
    ///
    /// Any local bomb with the same id is retired first, so a remote
    /// detonation never explodes twice here.
    pub fn apply_remote_explosion(&mut self, explosion: ExplosionState, now_ms: u64) -> Option<ExplosionReport> {
        let bomb_id = BombId::new(explosion.id.as_str());
        retire_bomb(&mut self.state, &bomb_id);
        apply_explosion(&mut self.state, explosion, now_ms, &self.config, &mut self.tasks, None)
    }

    /// Take timed-out players out of play. Returns the ones that were still
    /// alive; their elimination events surface with the next tick.
    pub fn forfeit_players(&mut self, player_ids: &[PlayerId], now_ms: u64) -> Vec<PlayerId> {
        let mut forfeited = Vec::new();
        for player_id in player_ids {
            if let Some(event) = self.state.forfeit_player(player_id, now_ms) {
                self.state.push_event(event);
                forfeited.push(player_id.clone());
            }
        }
        if !forfeited.is_empty() {
            info!(room = %self.state.room_code, count = forfeited.len(), "Players forfeited");
        }
        forfeited
    }

    /// Drop all pending chain detonations and explosion expiries.
    pub fn cancel_scheduled(&mut self) -> usize {
        let n = self.tasks.cancel_all();
        if n > 0 {
            debug!(room = %self.state.room_code, cancelled = n, "Scheduled tasks cancelled");
        }
        n
    }
}

fn push_unique(ids: &mut Vec<PlayerId>, id: &PlayerId) {
    if !ids.contains(id) {
        ids.push(id.clone());
    }
}
