//! State Reconciliation
//!
//! Merges inbound snapshots into the local engine and rate-limits outbound
//! publication of the local player.
//!
//! - Local player: predicted locally, never overwritten by a snapshot.
//! - Remote players: overwritten wholesale from the latest snapshot.
//! - Bombs and power-ups: created, patched or deleted to match the snapshot,
//!   except entities this participant created within the grace window.
//! - Explosions: applied at most once per id via a bounded FIFO set. Log
//!   records past their display window plus a grace period are never applied.
//! - Grid: adopted once by followers; the host never adopts.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::game::explosion::ExplosionReport;
use crate::game::state::{BombId, PowerUpId};
use crate::game::tick::SimulationEngine;
use crate::network::protocol::GameSnapshot;

/// Synchronisation settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum gap between local player publications (ms)
    pub publish_interval_ms: u64,
    /// Explosion ids remembered for dedup
    pub recent_explosion_capacity: usize,
    /// Locally created entities survive snapshots that predate them (ms)
    pub recent_entity_grace_ms: u64,
    /// Explosion log records older than their expiry by more than this are
    /// ignored, and removed from the log by the host (ms)
    pub stale_explosion_grace_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 50,
            recent_explosion_capacity: 64,
            recent_entity_grace_ms: 1000,
            stale_explosion_grace_ms: 1000,
        }
    }
}

// =============================================================================
// RECENT IDS
// =============================================================================

/// Bounded set of recently seen ids. The oldest id is evicted first.
#[derive(Debug, Clone)]
pub struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    /// Create with a fixed capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Has this id been seen (and not evicted)?
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Record an id. Returns false if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    /// Number of remembered ids.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Nothing remembered?
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

// =============================================================================
// PUBLISH THROTTLE
// =============================================================================

/// Leading-edge throttle with a trailing flush.
///
/// The first change in an interval is sent immediately; later changes in the
/// same interval are held and flushed once the interval has passed.
#[derive(Debug, Clone)]
pub struct PublishThrottle {
    interval_ms: u64,
    last_sent: Option<u64>,
    pending: bool,
}

impl PublishThrottle {
    /// Create with a minimum interval.
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_sent: None,
            pending: false,
        }
    }

    /// Local state changed. Returns true if it should be sent now.
    pub fn offer(&mut self, now_ms: u64) -> bool {
        match self.last_sent {
            Some(last) if now_ms.saturating_sub(last) < self.interval_ms => {
                self.pending = true;
                false
            }
            _ => {
                self.last_sent = Some(now_ms);
                self.pending = false;
                true
            }
        }
    }

    /// Returns true if a held change is now due.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if !self.pending {
            return false;
        }
        let due = self
            .last_sent
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.interval_ms);
        if due {
            self.last_sent = Some(now_ms);
            self.pending = false;
        }
        due
    }

    /// Is a change being held?
    pub fn has_pending(&self) -> bool {
        self.pending
    }
}

// =============================================================================
// RECONCILER
// =============================================================================

/// What one snapshot changed locally.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Grid adopted from this snapshot
    pub grid_adopted: bool,
    /// Remote players overwritten or added
    pub players_updated: usize,
    /// Local player adopted from the snapshot (was missing locally)
    pub local_adopted: bool,
    /// Bombs created
    pub bombs_created: usize,
    /// Bombs patched
    pub bombs_patched: usize,
    /// Bombs deleted
    pub bombs_removed: usize,
    /// Power-ups created
    pub powerups_created: usize,
    /// Power-ups deleted
    pub powerups_removed: usize,
    /// Explosions applied
    pub explosions: Vec<ExplosionReport>,
    /// Explosion ids skipped as duplicates
    pub explosions_skipped: usize,
    /// Explosion records skipped as expired
    pub explosions_stale: usize,
}

/// Merges snapshots into one participant's engine.
#[derive(Debug)]
pub struct Reconciler {
    config: SyncConfig,
    is_host: bool,
    recent_explosions: RecentIds,
    retired: RecentIds,
    local_created: HashMap<String, u64>,
}

impl Reconciler {
    /// Create for a host or a follower.
    pub fn new(config: SyncConfig, is_host: bool) -> Self {
        let capacity = config.recent_explosion_capacity;
        Self {
            config,
            is_host,
            recent_explosions: RecentIds::new(capacity),
            retired: RecentIds::new(capacity.saturating_mul(4)),
            local_created: HashMap::new(),
        }
    }

    /// Sync settings.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Is this the host's reconciler?
    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// Remember a bomb or power-up this participant just created.
    pub fn note_local_entity(&mut self, id: &str, now_ms: u64) {
        self.local_created.insert(id.to_string(), now_ms);
    }

    /// Remember a bomb or power-up this participant just removed, so stale
    /// snapshots do not bring it back.
    pub fn note_local_removal(&mut self, id: &str) {
        self.local_created.remove(id);
        self.retired.insert(id);
    }

    /// Mark an explosion as handled. Returns false if it already was.
    pub fn note_explosion(&mut self, id: &str) -> bool {
        self.recent_explosions.insert(id)
    }

    /// Has this explosion id been handled recently?
    pub fn explosion_seen(&self, id: &str) -> bool {
        self.recent_explosions.contains(id)
    }

    /// Is a log record with this expiry too old to apply?
    pub fn is_stale_explosion(&self, expires_at: u64, now_ms: u64) -> bool {
        expires_at.saturating_add(self.config.stale_explosion_grace_ms) < now_ms
    }

    fn in_grace(&self, id: &str, now_ms: u64) -> bool {
        self.local_created
            .get(id)
            .is_some_and(|&at| now_ms.saturating_sub(at) < self.config.recent_entity_grace_ms)
    }

    /// Merge a normalised snapshot into the engine.
    pub fn apply(&mut self, engine: &mut SimulationEngine, snapshot: GameSnapshot, now_ms: u64) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let local = engine.local_player().cloned();
        self.local_created
            .retain(|_, at| now_ms.saturating_sub(*at) < self.config.recent_entity_grace_ms);

        // Grid
        if !self.is_host && engine.state().grid.is_none() {
            if let Some(grid) = snapshot.grid {
                info!(
                    room = %engine.state().room_code,
                    width = grid.width(),
                    height = grid.height(),
                    "Grid adopted"
                );
                engine.state_mut().grid = Some(grid);
                report.grid_adopted = true;
            }
        }

        // Explosions first, so bombs they consumed are not recreated below
        for record in snapshot.explosions {
            // Stale records still retire their bomb but never touch rule state
            if self.is_stale_explosion(record.expires_at, now_ms) {
                self.retired.insert(record.id.as_str());
                report.explosions_stale += 1;
                continue;
            }
            if !self.recent_explosions.insert(record.id.as_str()) {
                report.explosions_skipped += 1;
                continue;
            }
            self.retired.insert(record.id.as_str());
            if let Some(applied) = engine.apply_remote_explosion(record.into_state(), now_ms) {
                report.explosions.push(applied);
            }
        }

        // Players
        for (id, record) in snapshot.players {
            if local.as_ref() == Some(&id) {
                if engine.state().get_player(&id).is_none() {
                    engine.state_mut().add_player(record.into_state());
                    report.local_adopted = true;
                }
                continue;
            }
            engine.state_mut().add_player(record.into_state());
            report.players_updated += 1;
        }

        // Bombs: ids snapshotted before mutating
        let local_bombs: Vec<BombId> = engine.state().bombs.keys().cloned().collect();
        for bomb_id in local_bombs {
            if snapshot.bombs.contains_key(&bomb_id) {
                continue;
            }
            let state = engine.state();
            let Some(bomb) = state.bombs.get(&bomb_id) else { continue };
            let own = local.as_ref().map_or(true, |l| *l == bomb.owner_id);
            if own || self.in_grace(bomb_id.as_str(), now_ms) {
                continue;
            }
            let cell = bomb.cell;
            let state = engine.state_mut();
            state.bombs.remove(&bomb_id);
            state.refresh_cell(cell);
            report.bombs_removed += 1;
        }

        for (bomb_id, record) in snapshot.bombs {
            let state = engine.state_mut();
            match state.bombs.get_mut(&bomb_id) {
                Some(bomb) => {
                    let own = local.as_ref().map_or(true, |l| *l == bomb.owner_id);
                    if own {
                        continue;
                    }
                    let old = bomb.cell;
                    let new = record.cell();
                    if old != new || bomb.moving != record.moving {
                        bomb.cell = new;
                        bomb.moving = record.moving;
                        bomb.last_roll_at = record.last_roll_at.max(bomb.planted_at);
                        state.refresh_cell(old);
                        state.refresh_cell(new);
                        report.bombs_patched += 1;
                    }
                }
                None => {
                    if self.retired.contains(bomb_id.as_str()) {
                        continue;
                    }
                    let cell = record.cell();
                    if state.grid.as_ref().is_some_and(|g| g.get(cell).map_or(true, |c| c.is_solid())) {
                        debug!(bomb = %bomb_id, "Dropping bomb on a solid cell");
                        continue;
                    }
                    state.bombs.insert(bomb_id, record.into_state());
                    state.refresh_cell(cell);
                    report.bombs_created += 1;
                }
            }
        }

        // Power-ups
        let local_powerups: Vec<PowerUpId> = engine.state().powerups.keys().cloned().collect();
        for powerup_id in local_powerups {
            if snapshot.powerups.contains_key(&powerup_id) || self.in_grace(powerup_id.as_str(), now_ms) {
                continue;
            }
            let state = engine.state_mut();
            if let Some(powerup) = state.powerups.remove(&powerup_id) {
                state.refresh_cell(powerup.cell);
                report.powerups_removed += 1;
            }
        }

        for (powerup_id, record) in snapshot.powerups {
            let state = engine.state_mut();
            if record.collected {
                if let Some(powerup) = state.powerups.remove(&powerup_id) {
                    state.refresh_cell(powerup.cell);
                    report.powerups_removed += 1;
                }
                continue;
            }
            if state.powerups.contains_key(&powerup_id) || self.retired.contains(powerup_id.as_str()) {
                continue;
            }
            let cell = record.cell();
            state.powerups.insert(powerup_id, record.into_state());
            state.refresh_cell(cell);
            report.powerups_created += 1;
        }

        if report.explosions_skipped > 0 {
            debug!(skipped = report.explosions_skipped, "Duplicate explosions ignored");
        }

        report
    }

    /// Forget dedup history (replay).
    pub fn reset(&mut self) {
        self.recent_explosions.clear();
        self.retired.clear();
        self.local_created.clear();
    }
}
