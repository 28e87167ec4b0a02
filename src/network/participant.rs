//! Match Participant
//!
//! Binds one player's [`SimulationEngine`] to the shared store: drains the
//! latest `gameState` snapshot, runs a tick, then publishes what this
//! participant is responsible for.
//!
//! Publication rules:
//! - Bombs this participant placed (and bombs it kicked or owns that moved).
//! - Explosions of bombs it owns, appended once to the explosion log and
//!   removed again when their display window ends. The host also sweeps
//!   expired entries left behind by departed owners.
//! - Power-ups its own explosions spawned, and removal of ones it collected.
//! - Its own player record, throttled.
//!
//! Store failures are logged and never stop the simulation; the next
//! publish repairs the shared state.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::game::events::{EndReason, GameEventData};
use crate::game::explosion::ExplosionReport;
use crate::game::input::InputFrame;
use crate::game::state::{BombId, ExplosionState, MatchState, PlayerId};
use crate::game::tick::{MatchConfig, SimulationEngine, TickResult};
use crate::network::gateway::{paths, GatewayError, NetworkGateway, Subscription};
use crate::network::protocol::{grid_to_value, BombRecord, ExplosionRecord, GameSnapshot, PlayerRecord, PowerUpRecord};
use crate::network::reconcile::{PublishThrottle, ReconcileReport, Reconciler, SyncConfig};
use crate::network::session::{PlayerSlot, Room};

/// Participant errors.
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// No match running for this participant
    #[error("match not started")]
    NotStarted,

    /// Store call failed
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Record could not be encoded
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of one participant frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// Local simulation result
    pub tick: TickResult,
    /// Inbound snapshot merge, if a snapshot arrived
    pub reconciled: Option<ReconcileReport>,
    /// Store writes that failed this frame
    pub failed_writes: u32,
}

/// One player's view of a running match.
pub struct MatchParticipant<G: NetworkGateway> {
    gateway: G,
    room_code: String,
    player_id: PlayerId,
    sim_config: MatchConfig,
    reconciler: Reconciler,
    throttle: PublishThrottle,
    engine: Option<SimulationEngine>,
    subscription: Option<Subscription>,
    last_published: Option<PlayerRecord>,
    /// Explosion log keys this participant appended, with their expiry
    logged: Vec<(String, u64)>,
}

impl<G: NetworkGateway> MatchParticipant<G> {
    /// Create a participant for `player_id` in room `room_code`.
    pub fn new(
        gateway: G,
        room_code: impl Into<String>,
        player_id: PlayerId,
        sim_config: MatchConfig,
        sync_config: SyncConfig,
    ) -> Self {
        let throttle = PublishThrottle::new(sync_config.publish_interval_ms);
        Self {
            gateway,
            room_code: room_code.into(),
            player_id,
            sim_config,
            reconciler: Reconciler::new(sync_config, false),
            throttle,
            engine: None,
            subscription: None,
            last_published: None,
            logged: Vec::new(),
        }
    }

    /// Player id.
    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// Room code.
    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    /// The local engine, once a match is running.
    pub fn engine(&self) -> Option<&SimulationEngine> {
        self.engine.as_ref()
    }

    /// The store handle.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Is this participant the host of the running match?
    pub fn is_host(&self) -> bool {
        self.reconciler.is_host()
    }

    /// Players alive in the local view.
    pub fn alive_players(&self) -> u32 {
        self.engine.as_ref().map_or(0, |e| e.state().alive_player_count())
    }

    /// Publish this member's lobby slot and register its removal on
    /// disconnect. Safe to repeat; re-announcing restores a lost slot.
    pub fn announce(&self, slot: &PlayerSlot) -> Result<(), ParticipantError> {
        let path = paths::slot(&self.room_code, slot.id.as_str());
        self.gateway.write(&path, serde_json::to_value(slot)?)?;
        self.gateway.on_disconnect_remove(&path)?;
        self.gateway
            .on_disconnect_remove(&paths::game_player(&self.room_code, self.player_id.as_str()))?;
        Ok(())
    }

    /// Re-announce if this member's slot is missing from the store's roster.
    /// Returns true if it had to.
    pub fn reannounce_if_missing(&self, slot: &PlayerSlot) -> Result<bool, ParticipantError> {
        let path = paths::slot(&self.room_code, slot.id.as_str());
        if self.gateway.read_once(&path)?.is_some() {
            return Ok(false);
        }
        info!(room = %self.room_code, player = %slot.id, "Slot missing from roster, re-announcing");
        self.announce(slot)?;
        Ok(true)
    }

    /// Refresh this member's heartbeat in its lobby slot.
    pub fn heartbeat(&self, now_ms: u64) -> Result<(), ParticipantError> {
        let mut fields = Map::new();
        fields.insert("lastHeartbeat".to_string(), json!(now_ms));
        fields.insert("connected".to_string(), json!(true));
        self.gateway
            .patch(&paths::slot(&self.room_code, self.player_id.as_str()), fields)?;
        Ok(())
    }

    /// Host only: publish the initial game state and start simulating.
    pub fn start_as_host(&mut self, state: MatchState) -> Result<(), ParticipantError> {
        let players: Map<String, Value> = state
            .players
            .values()
            .map(|p| Ok((p.id.to_string(), serde_json::to_value(PlayerRecord::from(p))?)))
            .collect::<Result<_, serde_json::Error>>()?;
        let bombs: Map<String, Value> = state
            .bombs
            .values()
            .map(|b| Ok((b.id.to_string(), serde_json::to_value(BombRecord::from(b))?)))
            .collect::<Result<_, serde_json::Error>>()?;
        let powerups: Map<String, Value> = state
            .powerups
            .values()
            .map(|p| Ok((p.id.to_string(), serde_json::to_value(PowerUpRecord::from(p))?)))
            .collect::<Result<_, serde_json::Error>>()?;

        let mut root = Map::new();
        root.insert("players".to_string(), Value::Object(players));
        root.insert("bombs".to_string(), Value::Object(bombs));
        root.insert("powerups".to_string(), Value::Object(powerups));
        if let Some(grid) = &state.grid {
            root.insert("grid".to_string(), grid_to_value(grid));
        }
        self.gateway
            .write(&paths::game_state(&self.room_code), Value::Object(root))?;

        info!(room = %self.room_code, players = state.players.len(), "Game state published");
        self.begin(state, true)
    }

    /// Follower: start with an empty state and adopt grid and players from
    /// the first snapshot.
    pub fn join_match(&mut self) -> Result<(), ParticipantError> {
        let state = MatchState::new(self.room_code.as_str());
        self.begin(state, false)
    }

    fn begin(&mut self, state: MatchState, is_host: bool) -> Result<(), ParticipantError> {
        let subscription = self.gateway.subscribe(&paths::game_state(&self.room_code))?;
        let sync = self.reconciler.config().clone();
        self.reconciler = Reconciler::new(sync.clone(), is_host);
        self.throttle = PublishThrottle::new(sync.publish_interval_ms);
        self.last_published = None;
        self.logged.clear();
        self.engine = Some(SimulationEngine::for_participant(
            state,
            self.sim_config.clone(),
            self.player_id.clone(),
        ));
        self.subscription = Some(subscription);
        debug!(room = %self.room_code, player = %self.player_id, is_host, "Participant started");
        Ok(())
    }

    /// Run one frame: merge the latest snapshot, simulate, publish.
    pub fn tick(&mut self, input: InputFrame, now_ms: u64) -> Result<FrameReport, ParticipantError> {
        let mut engine = self.engine.take().ok_or(ParticipantError::NotStarted)?;
        let reconciled = self.sync_inbound(&mut engine, now_ms);

        let mut inputs = BTreeMap::new();
        inputs.insert(self.player_id.clone(), input);
        let tick = engine.tick(&inputs, now_ms);

        let mut failed_writes = self.publish(&engine, &tick, now_ms);
        if self.is_host() && reconciled.as_ref().is_some_and(|r| r.explosions_stale > 0) {
            failed_writes += self.sweep_explosion_log(now_ms);
        }
        self.engine = Some(engine);

        Ok(FrameReport { tick, reconciled, failed_writes })
    }

    fn sync_inbound(&mut self, engine: &mut SimulationEngine, now_ms: u64) -> Option<ReconcileReport> {
        let value = self.subscription.as_mut()?.latest()?;
        match GameSnapshot::from_value(&value) {
            Ok(snapshot) => Some(self.reconciler.apply(engine, snapshot, now_ms)),
            Err(e) => {
                warn!(room = %self.room_code, error = %e, "Snapshot rejected");
                None
            }
        }
    }

    fn publish(&mut self, engine: &SimulationEngine, tick: &TickResult, now_ms: u64) -> u32 {
        let mut failed = 0;
        let mut record = |result: Result<(), ParticipantError>, what: &str| {
            if let Err(e) = result {
                warn!(room = %self.room_code, what, error = %e, "Publish failed");
                failed += 1;
            }
        };
        let state = engine.state();

        // Bombs placed here
        for bomb_id in &tick.placed_bombs {
            self.reconciler.note_local_entity(bomb_id.as_str(), now_ms);
            if let Some(bomb) = state.bombs.get(bomb_id) {
                record(self.write_record(&paths::bomb(&self.room_code, bomb_id.as_str()), &BombRecord::from(bomb)), "bomb");
            }
        }

        // Bombs that moved and are ours to report
        let kicked: Vec<&BombId> = tick
            .events
            .iter()
            .filter_map(|e| match &e.data {
                GameEventData::BombKicked { bomb_id, kicker_id, .. } if *kicker_id == self.player_id => Some(bomb_id),
                _ => None,
            })
            .collect();
        for bomb_id in &tick.moved_bombs {
            let Some(bomb) = state.bombs.get(bomb_id) else { continue };
            if bomb.owner_id != self.player_id && !kicked.contains(&bomb_id) {
                continue;
            }
            let mut fields = Map::new();
            fields.insert("x".to_string(), json!(bomb.cell.x));
            fields.insert("y".to_string(), json!(bomb.cell.y));
            fields.insert("moving".to_string(), json!(bomb.moving));
            fields.insert("lastRollAt".to_string(), json!(bomb.last_roll_at));
            let path = paths::bomb(&self.room_code, bomb_id.as_str());
            record(self.gateway.patch(&path, fields).map_err(Into::into), "bomb move");
        }

        // Explosions: every local one is marked handled; owned ones are logged
        for report in &tick.explosions {
            self.reconciler.note_explosion(report.explosion_id.as_str());
            self.reconciler.note_local_removal(report.explosion_id.as_str());
            if report.owner_id != self.player_id {
                continue;
            }
            let log = ExplosionRecord::from(&explosion_state(state, report, now_ms, &self.sim_config));
            let appended = serde_json::to_value(&log)
                .map_err(ParticipantError::from)
                .and_then(|v| self.gateway.append(&paths::explosions(&self.room_code), v).map_err(Into::into));
            match appended {
                Ok(key) => self.logged.push((key, log.expires_at)),
                Err(e) => record(Err(e), "explosion"),
            }
            let bomb_path = paths::bomb(&self.room_code, report.explosion_id.as_str());
            record(self.gateway.remove(&bomb_path).map_err(Into::into), "bomb removal");

            for powerup_id in &report.spawned {
                self.reconciler.note_local_entity(powerup_id.as_str(), now_ms);
                if let Some(powerup) = state.powerups.get(powerup_id) {
                    let path = paths::powerup(&self.room_code, powerup_id.as_str());
                    record(self.write_record(&path, &PowerUpRecord::from(powerup)), "powerup");
                }
            }
        }

        // Own log entries whose display window is over
        let mut expired = Vec::new();
        self.logged.retain(|(key, expires_at)| {
            let keep = *expires_at > now_ms;
            if !keep {
                expired.push(key.clone());
            }
            keep
        });
        for key in expired {
            let path = format!("{}/{}", paths::explosions(&self.room_code), key);
            record(self.gateway.remove(&path).map_err(Into::into), "explosion expiry");
        }

        // Power-ups collected here
        for (powerup_id, _) in &tick.collected {
            self.reconciler.note_local_removal(powerup_id.as_str());
            let path = paths::powerup(&self.room_code, powerup_id.as_str());
            record(self.gateway.remove(&path).map_err(Into::into), "powerup removal");
        }

        // Local player, throttled
        if let Some(player) = state.get_player(&self.player_id) {
            let current = PlayerRecord::from(player);
            let changed = self.last_published.as_ref() != Some(&current);
            let send = match (changed, self.throttle.has_pending()) {
                (false, _) => false,
                (true, false) => self.throttle.offer(now_ms),
                (true, true) => self.throttle.poll(now_ms),
            };
            if send {
                let path = paths::game_player(&self.room_code, self.player_id.as_str());
                let result = self.write_record(&path, &current);
                if result.is_ok() {
                    self.last_published = Some(current);
                }
                record(result, "player");
            }
        }

        failed
    }

    /// Host only: remove log entries past expiry plus the stale grace.
    /// Returns the number of failed store calls.
    fn sweep_explosion_log(&self, now_ms: u64) -> u32 {
        let log_path = paths::explosions(&self.room_code);
        let entries = match self.gateway.read_once(&log_path) {
            Ok(Some(Value::Object(entries))) => entries,
            Ok(_) => return 0,
            Err(e) => {
                warn!(room = %self.room_code, error = %e, "Explosion log read failed");
                return 1;
            }
        };

        let mut failed = 0;
        let mut removed = 0;
        for (key, entry) in entries {
            let Some(expires_at) = entry.get("expiresAt").and_then(Value::as_u64) else { continue };
            if !self.reconciler.is_stale_explosion(expires_at, now_ms) {
                continue;
            }
            match self.gateway.remove(&format!("{}/{}", log_path, key)) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(room = %self.room_code, key = %key, error = %e, "Explosion log sweep failed");
                    failed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(room = %self.room_code, removed, "Stale explosions swept");
        }
        failed
    }

    fn write_record<T: serde::Serialize>(&self, path: &str, value: &T) -> Result<(), ParticipantError> {
        self.gateway.write(path, serde_json::to_value(value)?)?;
        Ok(())
    }

    /// Host only: eliminate players the room timed out and publish their
    /// records so every participant sees them dead. Returns how many were
    /// still alive here.
    pub fn forfeit_players(&mut self, player_ids: &[PlayerId], now_ms: u64) -> Result<usize, ParticipantError> {
        if !self.is_host() || player_ids.is_empty() {
            return Ok(0);
        }
        let engine = self.engine.as_mut().ok_or(ParticipantError::NotStarted)?;
        let forfeited = engine.forfeit_players(player_ids, now_ms);
        let records: Vec<PlayerRecord> = forfeited
            .iter()
            .filter_map(|id| engine.state().get_player(id))
            .map(PlayerRecord::from)
            .collect();
        for record in &records {
            self.write_record(&paths::game_player(&self.room_code, record.id.as_str()), record)?;
        }
        Ok(forfeited.len())
    }

    /// Host only: check the room's end condition against the local view.
    pub fn evaluate_end(&self, room: &mut Room, now_ms: u64) -> Option<EndReason> {
        if !self.is_host() || self.engine.is_none() {
            return None;
        }
        room.evaluate_end(self.alive_players(), now_ms)
    }

    /// Prepare for a replay: tear down and drop the local match. The host
    /// also clears the published game state.
    pub fn reset_for_replay(&mut self) -> Result<(), ParticipantError> {
        self.teardown();
        let was_host = self.is_host();
        self.engine = None;
        self.last_published = None;
        self.logged.clear();
        self.reconciler = Reconciler::new(self.reconciler.config().clone(), false);
        if was_host {
            self.gateway.remove(&paths::game_state(&self.room_code))?;
        }
        Ok(())
    }

    /// Stop the match locally: cancel scheduled work, drop the subscription
    /// and forget dedup history. Returns the number of cancelled tasks.
    pub fn teardown(&mut self) -> usize {
        self.subscription = None;
        self.reconciler.reset();
        let cancelled = self.engine.as_mut().map_or(0, |e| e.cancel_scheduled());
        info!(room = %self.room_code, player = %self.player_id, cancelled, "Participant torn down");
        cancelled
    }
}

/// Logged form of a local explosion, taken from state while it is displayed.
fn explosion_state(state: &MatchState, report: &ExplosionReport, now_ms: u64, config: &MatchConfig) -> ExplosionState {
    match state.explosions.get(&report.explosion_id) {
        Some(explosion) => explosion.clone(),
        None => ExplosionState {
            id: report.explosion_id.clone(),
            owner_id: report.owner_id.clone(),
            cells: report.cells.clone(),
            at_ms: now_ms,
            expires_at: now_ms + config.explosion_display_ms,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::{Cell, Direction, GridCell};
    use crate::game::state::{BombState, PlayerState};
    use crate::network::memory::{InMemoryGateway, InMemoryStore};
    use crate::network::session::{Room, RoomSettings};

    fn pid(name: &str) -> PlayerId {
        PlayerId::new(name)
    }

    fn started_room() -> MatchState {
        let mut room = Room::new("ARENA1", pid("host"), "host", RoomSettings::default(), 0);
        room.join(pid("guest"), "guest", 0).unwrap();
        room.set_ready(&pid("host"), true).unwrap();
        room.set_ready(&pid("guest"), true).unwrap();
        room.start(&pid("host"), 0).unwrap()
    }

    fn pair() -> (InMemoryStore, MatchParticipant<InMemoryGateway>, MatchParticipant<InMemoryGateway>) {
        let store = InMemoryStore::new();
        let config = MatchConfig::default().with_powerups(false, Default::default());
        let mut host = MatchParticipant::new(store.connect(), "ARENA1", pid("host"), config.clone(), SyncConfig::default());
        let mut guest = MatchParticipant::new(store.connect(), "ARENA1", pid("guest"), config, SyncConfig::default());
        host.start_as_host(started_room()).unwrap();
        guest.join_match().unwrap();
        (store, host, guest)
    }

    #[test]
    fn test_tick_before_start_fails() {
        let store = InMemoryStore::new();
        let mut p = MatchParticipant::new(store.connect(), "R", pid("a"), MatchConfig::default(), SyncConfig::default());
        assert!(matches!(p.tick(InputFrame::new(), 0), Err(ParticipantError::NotStarted)));
    }

    #[test]
    fn test_follower_adopts_grid_and_self() {
        let (_store, mut host, mut guest) = pair();
        host.tick(InputFrame::new(), 0).unwrap();
        let frame = guest.tick(InputFrame::new(), 0).unwrap();

        let reconciled = frame.reconciled.unwrap();
        assert!(reconciled.grid_adopted);
        assert!(reconciled.local_adopted);
        assert_eq!(guest.alive_players(), 2);
        assert_eq!(
            guest.engine().unwrap().state().grid,
            host.engine().unwrap().state().grid
        );
    }

    #[test]
    fn test_bomb_propagates_and_explodes_once() {
        let (store, mut host, mut guest) = pair();
        guest.tick(InputFrame::new(), 0).unwrap();

        let placed = host.tick(InputFrame::place_bomb(), 10).unwrap();
        assert_eq!(placed.tick.placed_bombs.len(), 1);
        let bomb_id = placed.tick.placed_bombs[0].clone();

        let frame = guest.tick(InputFrame::new(), 20).unwrap();
        assert_eq!(frame.reconciled.unwrap().bombs_created, 1);
        assert!(guest.engine().unwrap().state().bombs.contains_key(&bomb_id));

        // Both sides detonate at fuse expiry; only the owner logs it
        let fuse_end = 10 + MatchConfig::default().fuse_ms;
        let guest_frame = guest.tick(InputFrame::new(), fuse_end).unwrap();
        assert_eq!(guest_frame.tick.explosions.len(), 1);
        let host_frame = host.tick(InputFrame::new(), fuse_end).unwrap();
        assert_eq!(host_frame.tick.explosions.len(), 1);

        let log = store.connect().read_once(&paths::explosions("ARENA1")).unwrap().unwrap();
        assert_eq!(log.as_object().unwrap().len(), 1);
        assert!(store.connect().read_once(&paths::bomb("ARENA1", bomb_id.as_str())).unwrap().is_none());

        // The logged record arrives after the local detonation and is skipped
        let later = guest.tick(InputFrame::new(), fuse_end + 10).unwrap();
        let reconciled = later.reconciled.unwrap();
        assert!(reconciled.explosions.is_empty());
        assert_eq!(reconciled.explosions_skipped, 1);
        assert!(!guest.engine().unwrap().state().bombs.contains_key(&bomb_id));

        // The owner drops its log entry once the display window ends
        let display_end = fuse_end + MatchConfig::default().explosion_display_ms;
        host.tick(InputFrame::new(), display_end).unwrap();
        assert_eq!(log_len(&store), 0);
    }

    fn log_len(store: &InMemoryStore) -> usize {
        store
            .connect()
            .read_once(&paths::explosions("ARENA1"))
            .unwrap()
            .and_then(|v| v.as_object().map(|o| o.len()))
            .unwrap_or(0)
    }

    #[test]
    fn test_host_sweeps_stale_log_entries() {
        let (store, mut host, mut guest) = pair();
        host.tick(InputFrame::new(), 0).unwrap();

        // Left behind by an owner that is no longer around
        let record = ExplosionRecord {
            id: crate::game::state::ExplosionId::new("orphan"),
            owner_id: pid("gone"),
            cells: vec![[0, 0]],
            timestamp: 100,
            expires_at: 600,
        };
        store
            .connect()
            .append(&paths::explosions("ARENA1"), serde_json::to_value(&record).unwrap())
            .unwrap();
        let frame = host.tick(InputFrame::new(), 100).unwrap();
        assert_eq!(frame.reconciled.unwrap().explosions.len(), 1);
        assert_eq!(log_len(&store), 1);

        // Any later change redelivers the log; the host removes the stale entry
        guest.tick(InputFrame::new(), 2000).unwrap();
        let frame = host.tick(InputFrame::new(), 2010).unwrap();
        let reconciled = frame.reconciled.unwrap();
        assert!(reconciled.explosions.is_empty());
        assert_eq!(reconciled.explosions_stale, 1);
        assert_eq!(frame.failed_writes, 0);
        assert_eq!(log_len(&store), 0);
    }

    #[test]
    fn test_remote_explosion_applied_when_missed() {
        let (store, mut host, mut guest) = pair();
        guest.tick(InputFrame::new(), 0).unwrap();

        // Another client logs an explosion over the guest's spawn
        let spawn = guest.engine().unwrap().state().players[&pid("guest")].cell;
        let record = ExplosionRecord {
            id: crate::game::state::ExplosionId::new("remote-blast"),
            owner_id: pid("host"),
            cells: vec![[spawn.x, spawn.y]],
            timestamp: 100,
            expires_at: 600,
        };
        store
            .connect()
            .append(&paths::explosions("ARENA1"), serde_json::to_value(&record).unwrap())
            .unwrap();

        let frame = guest.tick(InputFrame::new(), 100).unwrap();
        assert_eq!(frame.reconciled.unwrap().explosions.len(), 1);
        assert!(!guest.engine().unwrap().state().players[&pid("guest")].alive);
        assert_eq!(guest.alive_players(), 1);

        // The guest publishes its own death
        let published = store
            .connect()
            .read_once(&paths::game_player("ARENA1", "guest"))
            .unwrap()
            .unwrap();
        assert_eq!(published["alive"], json!(false));

        host.tick(InputFrame::new(), 120).unwrap();
        assert!(!host.engine().unwrap().state().players[&pid("guest")].alive);
    }

    #[test]
    fn test_player_publish_is_throttled() {
        let store = InMemoryStore::new();
        let mut state = MatchState::with_grid("R", crate::game::grid::Grid::new(9, 9));
        state.add_player(PlayerState::new(pid("a"), "a", Cell::new(1, 1), 0));
        let mut p = MatchParticipant::new(store.connect(), "R", pid("a"), MatchConfig::default(), SyncConfig::default());
        p.start_as_host(state).unwrap();

        p.tick(InputFrame::with_movement(Direction::Right), 0).unwrap();
        let path = paths::game_player("R", "a");
        let first = store.connect().read_once(&path).unwrap().unwrap();
        assert_eq!(first["cellX"], json!(2));
        assert_eq!(first["x"].as_f64(), Some(1.0));

        // Easing changes the position, but within the interval it is held
        p.tick(InputFrame::new(), 10).unwrap();
        let held = store.connect().read_once(&path).unwrap().unwrap();
        assert_eq!(held["x"].as_f64(), Some(1.0));

        // Once the interval has passed, the latest state is flushed
        p.tick(InputFrame::new(), 60).unwrap();
        let flushed = store.connect().read_once(&path).unwrap().unwrap();
        assert!(flushed["x"].as_f64().unwrap() > 1.0);
    }

    #[test]
    fn test_failed_writes_do_not_stop_simulation() {
        let (store, mut host, _guest) = pair();
        store.set_offline(true);
        let frame = host.tick(InputFrame::place_bomb(), 10).unwrap();
        assert_eq!(frame.tick.placed_bombs.len(), 1);
        assert!(frame.failed_writes >= 1);
        store.set_offline(false);
    }

    #[test]
    fn test_kicked_bomb_move_published_by_kicker() {
        let store = InMemoryStore::new();
        let mut state = MatchState::with_grid("K", crate::game::grid::Grid::new(9, 9));
        let mut kicker = PlayerState::new(pid("k"), "k", Cell::new(1, 1), 0);
        kicker.can_kick = true;
        state.add_player(kicker);
        state.add_player(PlayerState::new(pid("o"), "o", Cell::new(7, 7), 1));
        let bomb = BombState::new(BombId::new("ob"), pid("o"), Cell::new(2, 1), 1, 0, 3000);
        state.bombs.insert(bomb.id.clone(), bomb);
        state.refresh_cell(Cell::new(2, 1));
        assert_eq!(state.cell_at(Cell::new(2, 1)), Some(GridCell::BombOccupied));

        let mut p = MatchParticipant::new(store.connect(), "K", pid("k"), MatchConfig::default(), SyncConfig::default());
        p.start_as_host(state).unwrap();
        let frame = p.tick(InputFrame::with_movement(Direction::Right), 10).unwrap();
        assert_eq!(frame.tick.moved_bombs, vec![BombId::new("ob")]);

        let published = store.connect().read_once(&paths::bomb("K", "ob")).unwrap().unwrap();
        assert_eq!(published["moving"], json!("right"));
    }

    #[test]
    fn test_teardown_cancels_scheduled_work() {
        let (_store, mut host, _guest) = pair();
        host.tick(InputFrame::place_bomb(), 0).unwrap();
        host.tick(InputFrame::new(), MatchConfig::default().fuse_ms).unwrap();
        assert!(host.teardown() >= 1);
        assert_eq!(host.engine().unwrap().pending_tasks(), 0);
    }

    #[test]
    fn test_only_host_evaluates_end() {
        let (_store, mut host, mut guest) = pair();
        let mut room = Room::new("ARENA1", pid("host"), "host", RoomSettings::default(), 0).with_end_dwell(0);
        room.join(pid("guest"), "guest", 0).unwrap();
        room.set_ready(&pid("host"), true).unwrap();
        room.set_ready(&pid("guest"), true).unwrap();
        room.start(&pid("host"), 0).unwrap();

        host.tick(InputFrame::new(), 0).unwrap();
        guest.tick(InputFrame::new(), 0).unwrap();
        assert_eq!(host.evaluate_end(&mut room, 10), None);

        let time_up = RoomSettings::default().match_duration_secs as u64 * 1000;
        assert_eq!(guest.evaluate_end(&mut room, time_up), None);
        assert_eq!(host.evaluate_end(&mut room, time_up), Some(EndReason::TimeUp));
    }

    #[test]
    fn test_replay_clears_published_state() {
        let (store, mut host, mut guest) = pair();
        host.tick(InputFrame::place_bomb(), 10).unwrap();
        guest.reset_for_replay().unwrap();
        assert!(store.connect().read_once(&paths::game_state("ARENA1")).unwrap().is_some());

        host.reset_for_replay().unwrap();
        assert!(host.engine().is_none());
        assert!(!host.is_host());
        assert!(store.connect().read_once(&paths::game_state("ARENA1")).unwrap().is_none());
        assert!(matches!(host.tick(InputFrame::new(), 20), Err(ParticipantError::NotStarted)));
    }

    #[test]
    fn test_reannounce_restores_lost_slot() {
        let store = InMemoryStore::new();
        let room = Room::new("LOBBY2", pid("a"), "a", RoomSettings::default(), 0);
        let slot = room.player(&pid("a")).unwrap();
        let p = MatchParticipant::new(store.connect(), "LOBBY2", pid("a"), MatchConfig::default(), SyncConfig::default());

        assert!(p.reannounce_if_missing(slot).unwrap());
        assert!(!p.reannounce_if_missing(slot).unwrap());
        store.connect().remove(&paths::slot("LOBBY2", "a")).unwrap();
        assert!(p.reannounce_if_missing(slot).unwrap());
    }

    #[test]
    fn test_announce_and_disconnect_cleanup() {
        let store = InMemoryStore::new();
        let room = Room::new("LOBBY1", pid("a"), "a", RoomSettings::default(), 0);
        let p = MatchParticipant::new(store.connect(), "LOBBY1", pid("a"), MatchConfig::default(), SyncConfig::default());
        p.announce(room.player(&pid("a")).unwrap()).unwrap();
        p.heartbeat(500).unwrap();

        let path = paths::slot("LOBBY1", "a");
        let slot = store.connect().read_once(&path).unwrap().unwrap();
        assert_eq!(slot["lastHeartbeat"], json!(500));

        store.disconnect(p.gateway().client_id()).unwrap();
        assert!(store.connect().read_once(&path).unwrap().is_none());
    }

    #[test]
    fn test_timed_out_players_forfeit_and_end_match() {
        let store = InMemoryStore::new();
        let mut room = Room::new("ARENA1", pid("host"), "host", RoomSettings::default(), 0)
            .with_end_dwell(0);
        room.join(pid("p1"), "p1", 0).unwrap();
        room.join(pid("p2"), "p2", 0).unwrap();
        for id in ["host", "p1", "p2"] {
            room.set_ready(&pid(id), true).unwrap();
        }
        let state = room.start(&pid("host"), 0).unwrap();

        let config = MatchConfig::default().with_powerups(false, Default::default());
        let mut host = MatchParticipant::new(store.connect(), "ARENA1", pid("host"), config, SyncConfig::default());
        host.start_as_host(state).unwrap();
        host.tick(InputFrame::new(), 0).unwrap();

        room.heartbeat(&pid("host"), 30_000).unwrap();
        room.mark_disconnected(&pid("p1"));
        room.mark_disconnected(&pid("p2"));
        let swept = room.sweep_disconnected(31_000, 30_000);
        assert_eq!(swept, vec![pid("p1"), pid("p2")]);

        assert_eq!(host.forfeit_players(&swept, 31_000).unwrap(), 2);
        assert_eq!(host.alive_players(), 1);
        let published = store
            .connect()
            .read_once(&paths::game_player("ARENA1", "p1"))
            .unwrap()
            .unwrap();
        assert_eq!(published["alive"], json!(false));

        let frame = host.tick(InputFrame::new(), 31_016).unwrap();
        let eliminated = frame
            .tick
            .events
            .iter()
            .filter(|e| matches!(e.data, GameEventData::PlayerEliminated { killer_id: None, .. }))
            .count();
        assert_eq!(eliminated, 2);

        let reason = host.evaluate_end(&mut room, 31_016).unwrap();
        let results = room.finish(host.engine().unwrap().state(), reason, 31_016).unwrap().clone();
        assert_eq!(results.winner, Some(pid("host")));
        assert!(!room.player(&pid("p1")).unwrap().alive);
        assert_eq!(host.forfeit_players(&swept, 31_100).unwrap(), 0);
    }
}
