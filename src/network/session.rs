//! Room Lifecycle
//!
//! Rooms move Waiting → Playing → Finished and back to Waiting on replay,
//! never skipping a step. The host owns every phase transition and is the
//! only member that generates the map.
//!
//! All checks run before any mutation, so a rejected call leaves the room
//! untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Serialize, Deserialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RoomDefaults;
use crate::game::events::EndReason;
use crate::game::map::{spawn_for_index, MapGenerator, MapSize, DEFAULT_CRATE_DENSITY};
use crate::game::powerup::PowerUpDensity;
use crate::game::state::{MatchState, PlayerId, PlayerState};

/// Fewest players a match can start with.
pub const MIN_PLAYERS: u8 = 2;

/// Hard cap on room capacity.
pub const MAX_PLAYERS: u8 = 10;

/// Room code length.
pub const ROOM_CODE_LEN: usize = 6;

/// Upper-case letters and digits without look-alikes (no I, O, 0, 1).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Fresh room code derived from a v4 UUID.
pub fn generate_room_code() -> String {
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(ROOM_CODE_LEN)
        .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
        .collect()
}

// =============================================================================
// TYPES
// =============================================================================

/// Room phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Lobby: joining and readying
    Waiting,
    /// Match in progress
    Playing,
    /// Match over, results available
    Finished,
}

/// Host-controlled room settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomSettings {
    /// Map size
    pub map_size: MapSize,
    /// Match length (seconds)
    pub match_duration_secs: u32,
    /// Power-up drop rate
    pub powerup_density: PowerUpDensity,
    /// Power-ups on or off
    pub powerups_enabled: bool,
    /// Capacity, kept within [2, 10]
    pub max_players: u8,
    /// Chance an eligible cell gets a crate
    pub crate_density: f64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            map_size: MapSize::Medium,
            match_duration_secs: 180,
            powerup_density: PowerUpDensity::Medium,
            powerups_enabled: true,
            max_players: 4,
            crate_density: DEFAULT_CRATE_DENSITY,
        }
    }
}

impl RoomSettings {
    /// Bring every field into its legal range.
    pub fn clamped(mut self) -> Self {
        self.max_players = self.max_players.clamp(MIN_PLAYERS, MAX_PLAYERS);
        self.match_duration_secs = self.match_duration_secs.max(1);
        self.crate_density = self.crate_density.clamp(0.0, 1.0);
        self
    }
}

/// One member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSlot {
    /// Player id
    pub id: PlayerId,
    /// Display name
    pub username: String,
    /// Ready to start
    pub ready: bool,
    /// Slot colour
    pub color_index: u8,
    /// Join order (spawn index and host succession)
    pub join_order: u32,
    /// Connection flag
    pub connected: bool,
    /// Last heartbeat (ms)
    pub last_heartbeat: u64,
    /// Still in the current match
    pub alive: bool,
}

/// Result of leaving a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Member removed, host unchanged
    Left,
    /// The host left; authority moved to this member
    HostMigrated(PlayerId),
    /// Last member left; the room should be destroyed
    RoomEmpty,
}

/// One row of the final standings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    /// Player
    pub player_id: PlayerId,
    /// 1-based place
    pub place: u8,
    /// Kills
    pub kills: u32,
}

/// Final results of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResults {
    /// Sole survivor, if any
    pub winner: Option<PlayerId>,
    /// Why it ended
    pub reason: EndReason,
    /// Standings
    pub placements: Vec<Placement>,
    /// When it ended (ms)
    pub finished_at: u64,
}

/// Room errors. Messages are user-facing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// No room with this code
    #[error("Room {0} not found")]
    RoomNotFound(String),

    /// Capacity reached
    #[error("Room is full ({max} players)")]
    RoomFull {
        /// Capacity
        max: u8,
    },

    /// Operation not allowed in this phase
    #[error("Room is {actual:?}, expected {expected:?}")]
    WrongStatus {
        /// Phase the operation needs
        expected: RoomStatus,
        /// Current phase
        actual: RoomStatus,
    },

    /// Caller is not the host
    #[error("Only the host can do that")]
    NotHost,

    /// Caller is not in the room
    #[error("Player {0} is not in this room")]
    UnknownPlayer(PlayerId),

    /// Too few players to start
    #[error("Need at least {need} players, have {have}")]
    NotEnoughPlayers {
        /// Present
        have: usize,
        /// Required
        need: u8,
    },

    /// Someone is not ready
    #[error("Not all players are ready")]
    PlayersNotReady,

    /// Settings rejected
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

// =============================================================================
// ROOM
// =============================================================================

/// A room and its roster.
#[derive(Debug, Clone)]
pub struct Room {
    code: String,
    host_id: PlayerId,
    status: RoomStatus,
    settings: RoomSettings,
    players: BTreeMap<PlayerId, PlayerSlot>,
    created_at: u64,
    started_at: Option<u64>,
    finished_at: Option<u64>,
    next_join_order: u32,
    started_player_count: u32,
    end_dwell_ms: u64,
    end_candidate_since: Option<u64>,
    ready_debounce_ms: u64,
    ready_toggled_at: BTreeMap<PlayerId, u64>,
    results: Option<MatchResults>,
}

impl Room {
    /// Create a room. The creator is host and takes slot 0.
    pub fn new(
        code: impl Into<String>,
        host_id: PlayerId,
        username: impl Into<String>,
        settings: RoomSettings,
        now_ms: u64,
    ) -> Self {
        let mut room = Self {
            code: code.into(),
            host_id: host_id.clone(),
            status: RoomStatus::Waiting,
            settings: settings.clamped(),
            players: BTreeMap::new(),
            created_at: now_ms,
            started_at: None,
            finished_at: None,
            next_join_order: 0,
            started_player_count: 0,
            end_dwell_ms: RoomDefaults::default().end_dwell_ms,
            end_candidate_since: None,
            ready_debounce_ms: RoomDefaults::default().ready_debounce_ms,
            ready_toggled_at: BTreeMap::new(),
            results: None,
        };
        room.insert_slot(host_id, username.into(), now_ms);
        room
    }

    /// Override the end-game dwell window.
    pub fn with_end_dwell(mut self, dwell_ms: u64) -> Self {
        self.end_dwell_ms = dwell_ms;
        self
    }

    /// Override the ready toggle debounce.
    pub fn with_ready_debounce(mut self, debounce_ms: u64) -> Self {
        self.ready_debounce_ms = debounce_ms;
        self
    }

    /// Room code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Current host.
    pub fn host_id(&self) -> &PlayerId {
        &self.host_id
    }

    /// Is this player the host?
    pub fn is_host(&self, player_id: &PlayerId) -> bool {
        &self.host_id == player_id
    }

    /// Current phase.
    pub fn status(&self) -> RoomStatus {
        self.status
    }

    /// Current settings.
    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    /// Creation time (ms).
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Results of the last finished match.
    pub fn results(&self) -> Option<&MatchResults> {
        self.results.as_ref()
    }

    /// Slot for a player.
    pub fn player(&self, player_id: &PlayerId) -> Option<&PlayerSlot> {
        self.players.get(player_id)
    }

    /// Slots in join order.
    pub fn slots(&self) -> Vec<&PlayerSlot> {
        let mut slots: Vec<&PlayerSlot> = self.players.values().collect();
        slots.sort_by_key(|s| s.join_order);
        slots
    }

    /// Number of members.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// No members left?
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    fn require_status(&self, expected: RoomStatus) -> Result<(), RoomError> {
        if self.status != expected {
            return Err(RoomError::WrongStatus { expected, actual: self.status });
        }
        Ok(())
    }

    fn require_host(&self, player_id: &PlayerId) -> Result<(), RoomError> {
        if !self.is_host(player_id) {
            return Err(RoomError::NotHost);
        }
        Ok(())
    }

    fn free_color(&self) -> u8 {
        (0..=u8::MAX)
            .find(|c| self.players.values().all(|s| s.color_index != *c))
            .unwrap_or(0)
    }

    fn insert_slot(&mut self, id: PlayerId, username: String, now_ms: u64) -> &PlayerSlot {
        let slot = PlayerSlot {
            id: id.clone(),
            username,
            ready: false,
            color_index: self.free_color(),
            join_order: self.next_join_order,
            connected: true,
            last_heartbeat: now_ms,
            alive: true,
        };
        self.next_join_order += 1;
        self.players.entry(id).or_insert(slot)
    }

    /// Join the room.
    ///
    /// Joining again while already a member re-announces the existing slot
    /// instead of failing, so a member missing from a propagated roster can
    /// write itself back.
    pub fn join(&mut self, player_id: PlayerId, username: impl Into<String>, now_ms: u64) -> Result<&PlayerSlot, RoomError> {
        if self.players.contains_key(&player_id) {
            let slot = self
                .players
                .get_mut(&player_id)
                .ok_or_else(|| RoomError::UnknownPlayer(player_id.clone()))?;
            slot.connected = true;
            slot.last_heartbeat = now_ms;
            return Ok(&*slot);
        }

        self.require_status(RoomStatus::Waiting)?;
        if self.players.len() >= self.settings.max_players as usize {
            return Err(RoomError::RoomFull { max: self.settings.max_players });
        }

        info!(room = %self.code, player = %player_id, "Player joined");
        Ok(self.insert_slot(player_id, username.into(), now_ms))
    }

    /// Flip a member's ready flag. Returns the new value.
    pub fn toggle_ready(&mut self, player_id: &PlayerId, now_ms: u64) -> Result<bool, RoomError> {
        self.require_status(RoomStatus::Waiting)?;
        let slot = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| RoomError::UnknownPlayer(player_id.clone()))?;

        if let Some(&at) = self.ready_toggled_at.get(player_id) {
            if now_ms.saturating_sub(at) < self.ready_debounce_ms {
                debug!(room = %self.code, player = %player_id, "Ready toggle debounced");
                return Ok(slot.ready);
            }
        }
        slot.ready = !slot.ready;
        self.ready_toggled_at.insert(player_id.clone(), now_ms);
        Ok(slot.ready)
    }

    /// Set a member's ready flag.
    pub fn set_ready(&mut self, player_id: &PlayerId, ready: bool) -> Result<(), RoomError> {
        self.require_status(RoomStatus::Waiting)?;
        let slot = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| RoomError::UnknownPlayer(player_id.clone()))?;
        slot.ready = ready;
        Ok(())
    }

    /// Enough members and all of them ready?
    pub fn all_ready(&self) -> bool {
        self.players.len() >= MIN_PLAYERS as usize && self.players.values().all(|s| s.ready)
    }

    /// Replace the settings (host only, lobby only).
    pub fn update_settings(&mut self, by: &PlayerId, settings: RoomSettings) -> Result<(), RoomError> {
        self.require_host(by)?;
        self.require_status(RoomStatus::Waiting)?;

        let settings = settings.clamped();
        if (settings.max_players as usize) < self.players.len() {
            return Err(RoomError::InvalidSettings(format!(
                "max players {} is below the {} already in the room",
                settings.max_players,
                self.players.len()
            )));
        }
        self.settings = settings;
        Ok(())
    }

    /// Start the match (host only). Generates the grid, places everyone on
    /// their spawn by join order and returns the initial match state.
    pub fn start(&mut self, by: &PlayerId, now_ms: u64) -> Result<MatchState, RoomError> {
        self.require_host(by)?;
        self.require_status(RoomStatus::Waiting)?;
        if self.players.len() < MIN_PLAYERS as usize {
            return Err(RoomError::NotEnoughPlayers { have: self.players.len(), need: MIN_PLAYERS });
        }
        if !self.all_ready() {
            return Err(RoomError::PlayersNotReady);
        }

        let grid = MapGenerator::new(self.code.as_str(), self.settings.map_size)
            .with_crate_density(self.settings.crate_density)
            .generate();
        let (width, height) = (grid.width(), grid.height());
        let mut state = MatchState::with_grid(self.code.as_str(), grid);

        for (index, slot) in self.slots().into_iter().enumerate() {
            let spawn = spawn_for_index(width, height, index);
            state.add_player(PlayerState::new(slot.id.clone(), slot.username.as_str(), spawn, slot.color_index));
        }
        state.started_at = now_ms;
        state.started_player_count = state.players.len() as u32;

        for slot in self.players.values_mut() {
            slot.alive = true;
        }
        self.status = RoomStatus::Playing;
        self.started_at = Some(now_ms);
        self.started_player_count = state.started_player_count;
        self.end_candidate_since = None;
        self.results = None;

        info!(
            room = %self.code,
            players = self.started_player_count,
            width,
            height,
            "Match started"
        );
        Ok(state)
    }

    /// Check the end condition with debounce.
    ///
    /// The match qualifies to end when at most one of two or more starters is
    /// alive, or the duration has elapsed. It only ends once the condition
    /// has held continuously for the dwell window; any tick where it does not
    /// hold resets the window.
    pub fn evaluate_end(&mut self, alive: u32, now_ms: u64) -> Option<EndReason> {
        if self.status != RoomStatus::Playing {
            self.end_candidate_since = None;
            return None;
        }

        let started = self.started_at.unwrap_or(now_ms);
        let duration_ms = self.settings.match_duration_secs as u64 * 1000;
        let reason = if self.started_player_count >= MIN_PLAYERS as u32 && alive <= 1 {
            Some(EndReason::LastStanding)
        } else if now_ms.saturating_sub(started) >= duration_ms {
            Some(EndReason::TimeUp)
        } else {
            None
        };

        let Some(reason) = reason else {
            if self.end_candidate_since.take().is_some() {
                debug!(room = %self.code, alive, "End condition cleared before dwell");
            }
            return None;
        };

        let since = *self.end_candidate_since.get_or_insert(now_ms);
        if now_ms.saturating_sub(since) >= self.end_dwell_ms {
            Some(reason)
        } else {
            None
        }
    }

    /// Record the final results and move to Finished.
    pub fn finish(&mut self, state: &MatchState, reason: EndReason, now_ms: u64) -> Result<&MatchResults, RoomError> {
        self.require_status(RoomStatus::Playing)?;

        // Slots swept for disconnecting stay dead even if the view missed it
        let mut standings = state.clone();
        for slot in self.players.values().filter(|s| !s.alive) {
            if let Some(player) = standings.players.get_mut(&slot.id) {
                player.alive = false;
            }
        }

        let survivors: Vec<&PlayerId> = standings.players.values().filter(|p| p.alive).map(|p| &p.id).collect();
        let winner = match survivors.as_slice() {
            [only] => Some((*only).clone()),
            _ => None,
        };
        let placements = standings
            .get_placements()
            .into_iter()
            .map(|(player_id, place, kills)| Placement { player_id, place, kills })
            .collect();

        for (id, slot) in self.players.iter_mut() {
            slot.alive = slot.alive && standings.get_player(id).is_some_and(|p| p.alive);
        }
        self.status = RoomStatus::Finished;
        self.finished_at = Some(now_ms);
        self.end_candidate_since = None;

        info!(room = %self.code, ?reason, winner = ?winner, "Match finished");
        Ok(&*self.results.insert(MatchResults { winner, reason, placements, finished_at: now_ms }))
    }

    /// Back to the lobby (host only). Keeps the roster, clears ready flags.
    pub fn replay(&mut self, by: &PlayerId) -> Result<(), RoomError> {
        self.require_host(by)?;
        self.require_status(RoomStatus::Finished)?;

        for slot in self.players.values_mut() {
            slot.ready = false;
            slot.alive = true;
        }
        self.status = RoomStatus::Waiting;
        self.started_at = None;
        self.finished_at = None;
        self.started_player_count = 0;
        self.end_candidate_since = None;
        info!(room = %self.code, "Room reset for replay");
        Ok(())
    }

    /// Remove a member. The earliest remaining joiner inherits host.
    pub fn leave(&mut self, player_id: &PlayerId) -> Result<LeaveOutcome, RoomError> {
        if self.players.remove(player_id).is_none() {
            return Err(RoomError::UnknownPlayer(player_id.clone()));
        }
        self.ready_toggled_at.remove(player_id);
        if self.players.is_empty() {
            info!(room = %self.code, "Last player left");
            return Ok(LeaveOutcome::RoomEmpty);
        }
        if !self.is_host(player_id) {
            return Ok(LeaveOutcome::Left);
        }

        let Some(next) = self.slots().first().map(|s| s.id.clone()) else {
            return Ok(LeaveOutcome::RoomEmpty);
        };
        info!(room = %self.code, from = %player_id, to = %next, "Host migrated");
        self.host_id = next.clone();
        Ok(LeaveOutcome::HostMigrated(next))
    }

    /// Record a heartbeat.
    pub fn heartbeat(&mut self, player_id: &PlayerId, now_ms: u64) -> Result<(), RoomError> {
        let slot = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| RoomError::UnknownPlayer(player_id.clone()))?;
        slot.connected = true;
        slot.last_heartbeat = slot.last_heartbeat.max(now_ms);
        Ok(())
    }

    /// Flag a member as disconnected. Returns false for unknown players.
    pub fn mark_disconnected(&mut self, player_id: &PlayerId) -> bool {
        match self.players.get_mut(player_id) {
            Some(slot) => {
                slot.connected = false;
                true
            }
            None => false,
        }
    }

    /// Mark dead every disconnected member whose last heartbeat is older than
    /// `timeout_ms`. Slots are kept for the final standings.
    pub fn sweep_disconnected(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<PlayerId> {
        if self.status != RoomStatus::Playing {
            return Vec::new();
        }
        let mut timed_out = Vec::new();
        for slot in self.players.values_mut() {
            if !slot.connected && slot.alive && now_ms.saturating_sub(slot.last_heartbeat) > timeout_ms {
                slot.alive = false;
                timed_out.push(slot.id.clone());
            }
        }
        if !timed_out.is_empty() {
            warn!(room = %self.code, count = timed_out.len(), "Disconnected players timed out");
        }
        timed_out
    }

    /// Should the directory drop this room?
    pub fn is_expired(&self, now_ms: u64, finished_ttl_ms: u64) -> bool {
        if self.players.is_empty() {
            return true;
        }
        match (self.status, self.finished_at) {
            (RoomStatus::Finished, Some(at)) => now_ms.saturating_sub(at) >= finished_ttl_ms,
            _ => false,
        }
    }
}

// =============================================================================
// ROOM DIRECTORY
// =============================================================================

/// All rooms known to this process.
pub struct RoomDirectory {
    rooms: RwLock<BTreeMap<String, Arc<RwLock<Room>>>>,
    defaults: RoomDefaults,
}

impl RoomDirectory {
    /// Create with room defaults.
    pub fn new(defaults: RoomDefaults) -> Self {
        Self {
            rooms: RwLock::new(BTreeMap::new()),
            defaults,
        }
    }

    /// Room defaults.
    pub fn defaults(&self) -> &RoomDefaults {
        &self.defaults
    }

    /// Create a room with default settings under a fresh code.
    pub async fn create_room(
        &self,
        host_id: PlayerId,
        username: &str,
        now_ms: u64,
    ) -> (String, Arc<RwLock<Room>>) {
        let mut rooms = self.rooms.write().await;
        let mut code = generate_room_code();
        while rooms.contains_key(&code) {
            code = generate_room_code();
        }

        let room = Room::new(code.as_str(), host_id, username, self.defaults.settings(), now_ms)
            .with_end_dwell(self.defaults.end_dwell_ms)
            .with_ready_debounce(self.defaults.ready_debounce_ms);
        let room = Arc::new(RwLock::new(room));
        rooms.insert(code.clone(), room.clone());

        info!(room = %code, "Room created");
        (code, room)
    }

    /// Look up a room.
    pub async fn get(&self, code: &str) -> Option<Arc<RwLock<Room>>> {
        let rooms = self.rooms.read().await;
        rooms.get(code).cloned()
    }

    /// Join a room by code.
    pub async fn join(
        &self,
        code: &str,
        player_id: PlayerId,
        username: &str,
        now_ms: u64,
    ) -> Result<Arc<RwLock<Room>>, RoomError> {
        let room = self
            .get(code)
            .await
            .ok_or_else(|| RoomError::RoomNotFound(code.to_string()))?;
        room.write().await.join(player_id, username, now_ms)?;
        Ok(room)
    }

    /// Leave a room; an emptied room is destroyed.
    pub async fn leave(&self, code: &str, player_id: &PlayerId) -> Result<LeaveOutcome, RoomError> {
        let room = self
            .get(code)
            .await
            .ok_or_else(|| RoomError::RoomNotFound(code.to_string()))?;
        let outcome = room.write().await.leave(player_id)?;
        if outcome == LeaveOutcome::RoomEmpty {
            self.remove(code).await;
        }
        Ok(outcome)
    }

    /// Destroy a room.
    pub async fn remove(&self, code: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        rooms.remove(code).is_some()
    }

    /// Number of rooms.
    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }

    /// Drop empty rooms and finished rooms past their TTL.
    pub async fn sweep(&self, now_ms: u64) -> Vec<String> {
        let mut rooms = self.rooms.write().await;
        let mut expired = Vec::new();

        for (code, room) in rooms.iter() {
            let r = room.read().await;
            if r.is_expired(now_ms, self.defaults.finished_ttl_ms) {
                expired.push(code.clone());
            }
        }

        for code in &expired {
            rooms.remove(code);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Rooms swept");
        }
        expired
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new(RoomDefaults::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(name: &str) -> PlayerId {
        PlayerId::new(name)
    }

    fn lobby(n: usize) -> Room {
        let mut room = Room::new("ROOM01", pid("p0"), "p0", RoomSettings::default(), 0);
        for i in 1..n {
            room.join(pid(&format!("p{}", i)), format!("p{}", i), 0).unwrap();
        }
        room
    }

    fn ready_all(room: &mut Room) {
        let ids: Vec<PlayerId> = room.slots().iter().map(|s| s.id.clone()).collect();
        for id in ids {
            room.set_ready(&id, true).unwrap();
        }
    }

    fn playing(n: usize) -> (Room, MatchState) {
        let mut room = lobby(n);
        ready_all(&mut room);
        let state = room.start(&pid("p0"), 1000).unwrap();
        (room, state)
    }

    #[test]
    fn test_room_code_format() {
        let code = generate_room_code();
        assert_eq!(code.len(), ROOM_CODE_LEN);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_create_makes_host_slot_zero() {
        let room = lobby(1);
        assert_eq!(room.status(), RoomStatus::Waiting);
        assert!(room.is_host(&pid("p0")));
        assert_eq!(room.slots()[0].join_order, 0);
    }

    #[test]
    fn test_join_assigns_free_colors() {
        let mut room = lobby(3);
        assert_eq!(room.leave(&pid("p1")).unwrap(), LeaveOutcome::Left);
        let slot = room.join(pid("p9"), "p9", 5).unwrap();
        assert_eq!(slot.color_index, 1);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut room = lobby(4);
        let err = room.join(pid("extra"), "extra", 0).unwrap_err();
        assert_eq!(err, RoomError::RoomFull { max: 4 });
        assert_eq!(room.player_count(), 4);
    }

    #[test]
    fn test_max_players_clamped() {
        let mut room = lobby(1);
        let settings = RoomSettings { max_players: 50, ..RoomSettings::default() };
        room.update_settings(&pid("p0"), settings).unwrap();
        assert_eq!(room.settings().max_players, MAX_PLAYERS);

        let settings = RoomSettings { max_players: 0, ..RoomSettings::default() };
        room.update_settings(&pid("p0"), settings).unwrap();
        assert_eq!(room.settings().max_players, MIN_PLAYERS);

        for i in 1..MIN_PLAYERS {
            room.join(pid(&format!("x{}", i)), "x", 0).unwrap();
        }
        assert!(matches!(room.join(pid("over"), "over", 0), Err(RoomError::RoomFull { .. })));
    }

    #[test]
    fn test_settings_below_roster_rejected() {
        let mut room = lobby(3);
        let settings = RoomSettings { max_players: 2, ..RoomSettings::default() };
        assert!(matches!(room.update_settings(&pid("p0"), settings), Err(RoomError::InvalidSettings(_))));
        assert_eq!(room.settings().max_players, 4);
    }

    #[test]
    fn test_non_host_rejected() {
        let mut room = lobby(2);
        ready_all(&mut room);
        assert_eq!(room.start(&pid("p1"), 0).unwrap_err(), RoomError::NotHost);
        assert_eq!(
            room.update_settings(&pid("p1"), RoomSettings::default()).unwrap_err(),
            RoomError::NotHost
        );
        assert_eq!(room.status(), RoomStatus::Waiting);
    }

    #[test]
    fn test_start_requires_two_ready_players() {
        let mut room = lobby(1);
        room.set_ready(&pid("p0"), true).unwrap();
        assert!(matches!(room.start(&pid("p0"), 0), Err(RoomError::NotEnoughPlayers { have: 1, .. })));

        room.join(pid("p1"), "p1", 0).unwrap();
        assert_eq!(room.start(&pid("p0"), 0).unwrap_err(), RoomError::PlayersNotReady);
        assert!(room.toggle_ready(&pid("p1"), 0).unwrap());
        assert!(room.start(&pid("p0"), 0).is_ok());
    }

    #[test]
    fn test_ready_toggle_debounced() {
        let mut room = lobby(2).with_ready_debounce(300);
        assert!(room.toggle_ready(&pid("p1"), 1000).unwrap());
        // Double click: ignored
        assert!(room.toggle_ready(&pid("p1"), 1100).unwrap());
        assert!(room.player(&pid("p1")).unwrap().ready);

        assert!(!room.toggle_ready(&pid("p1"), 1300).unwrap());
        // Per player
        assert!(room.toggle_ready(&pid("p0"), 1310).unwrap());
        // Explicit set is never debounced
        room.set_ready(&pid("p1"), true).unwrap();
        assert!(room.player(&pid("p1")).unwrap().ready);
    }

    #[test]
    fn test_start_builds_match_state() {
        let (room, state) = playing(3);
        assert_eq!(room.status(), RoomStatus::Playing);
        assert_eq!(state.players.len(), 3);
        assert_eq!(state.started_player_count, 3);
        let grid = state.grid.as_ref().unwrap();
        assert_eq!((grid.width(), grid.height()), MapSize::Medium.dimensions());
        assert_eq!(state.players[&pid("p0")].cell, spawn_for_index(grid.width(), grid.height(), 0));
        assert!(state.bombs.is_empty() && state.explosions.is_empty() && state.powerups.is_empty());
    }

    #[test]
    fn test_no_join_or_skip_while_playing() {
        let (mut room, _) = playing(2);
        assert!(matches!(room.join(pid("late"), "late", 0), Err(RoomError::WrongStatus { .. })));
        assert!(matches!(room.replay(&pid("p0")), Err(RoomError::WrongStatus { .. })));
    }

    #[test]
    fn test_end_debounce_flicker() {
        let (mut room, _) = playing(2);
        assert_eq!(room.evaluate_end(1, 2000), None);
        assert_eq!(room.evaluate_end(1, 2500), None);
        // Flicker back to two alive resets the window
        assert_eq!(room.evaluate_end(2, 3000), None);
        assert_eq!(room.evaluate_end(1, 3200), None);
        assert_eq!(room.evaluate_end(1, 4699), None);
        assert_eq!(room.evaluate_end(1, 4700), Some(EndReason::LastStanding));
    }

    #[test]
    fn test_end_on_time_up() {
        let (mut room, _) = playing(2);
        let end = 1000 + 180_000;
        assert_eq!(room.evaluate_end(2, end), None);
        assert_eq!(room.evaluate_end(2, end + 1500), Some(EndReason::TimeUp));
    }

    #[test]
    fn test_finish_and_replay() {
        let (mut room, mut state) = playing(2);
        state.eliminate_player(&pid("p1"), Some(&pid("p0")), 2000);

        let results = room.finish(&state, EndReason::LastStanding, 5000).unwrap().clone();
        assert_eq!(results.winner, Some(pid("p0")));
        assert_eq!(results.placements[0].player_id, pid("p0"));
        assert_eq!(results.placements[0].kills, 1);
        assert_eq!(room.status(), RoomStatus::Finished);

        assert_eq!(room.replay(&pid("p1")).unwrap_err(), RoomError::NotHost);
        room.replay(&pid("p0")).unwrap();
        assert_eq!(room.status(), RoomStatus::Waiting);
        assert_eq!(room.player_count(), 2);
        assert!(room.slots().iter().all(|s| !s.ready && s.alive));
    }

    #[test]
    fn test_host_migration_to_earliest_joiner() {
        let mut room = lobby(3);
        assert_eq!(room.leave(&pid("p0")).unwrap(), LeaveOutcome::HostMigrated(pid("p1")));
        assert!(room.is_host(&pid("p1")));
        assert_eq!(room.leave(&pid("p2")).unwrap(), LeaveOutcome::Left);
        assert_eq!(room.leave(&pid("p1")).unwrap(), LeaveOutcome::RoomEmpty);
        assert!(room.is_empty());
    }

    #[test]
    fn test_disconnect_sweep_keeps_slot() {
        let (mut room, _) = playing(3);
        room.heartbeat(&pid("p1"), 2000).unwrap();
        assert!(room.mark_disconnected(&pid("p1")));

        assert!(room.sweep_disconnected(32_000, 30_000).is_empty());
        assert_eq!(room.sweep_disconnected(32_001, 30_000), vec![pid("p1")]);
        assert_eq!(room.player_count(), 3);
        assert!(!room.player(&pid("p1")).unwrap().alive);
        // Already dead: not reported twice
        assert!(room.sweep_disconnected(40_000, 30_000).is_empty());
    }

    #[test]
    fn test_finish_keeps_swept_slots_dead() {
        let (mut room, state) = playing(3);
        room.heartbeat(&pid("p0"), 30_000).unwrap();
        room.mark_disconnected(&pid("p1"));
        room.mark_disconnected(&pid("p2"));
        assert_eq!(room.sweep_disconnected(31_000, 30_000), vec![pid("p1"), pid("p2")]);

        // Match state never heard about the timeouts
        assert_eq!(state.alive_player_count(), 3);
        let results = room.finish(&state, EndReason::LastStanding, 31_500).unwrap().clone();
        assert_eq!(results.winner, Some(pid("p0")));
        assert_eq!(results.placements[0].player_id, pid("p0"));
        assert!(!room.player(&pid("p1")).unwrap().alive);
        assert!(!room.player(&pid("p2")).unwrap().alive);
        assert!(room.player(&pid("p0")).unwrap().alive);
    }

    #[test]
    fn test_rejoin_reannounces() {
        let mut room = lobby(2);
        room.mark_disconnected(&pid("p1"));
        let slot = room.join(pid("p1"), "p1", 99).unwrap();
        assert!(slot.connected);
        assert_eq!(room.player_count(), 2);
    }

    #[tokio::test]
    async fn test_directory_lifecycle() {
        let directory = RoomDirectory::default();
        let (code, room) = directory.create_room(pid("host"), "host", 0).await;
        assert_eq!(directory.room_count().await, 1);

        directory.join(&code, pid("guest"), "guest", 10).await.unwrap();
        assert_eq!(room.read().await.player_count(), 2);

        let err = directory.join("NOPE00", pid("x"), "x", 0).await.unwrap_err();
        assert_eq!(err, RoomError::RoomNotFound("NOPE00".to_string()));

        assert_eq!(
            directory.leave(&code, &pid("host")).await.unwrap(),
            LeaveOutcome::HostMigrated(pid("guest"))
        );
        assert_eq!(directory.leave(&code, &pid("guest")).await.unwrap(), LeaveOutcome::RoomEmpty);
        assert_eq!(directory.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_directory_sweeps_finished_rooms() {
        let directory = RoomDirectory::default();
        let (code, room) = directory.create_room(pid("a"), "a", 0).await;
        directory.join(&code, pid("b"), "b", 0).await.unwrap();

        {
            let mut r = room.write().await;
            r.set_ready(&pid("a"), true).unwrap();
            r.set_ready(&pid("b"), true).unwrap();
            let state = r.start(&pid("a"), 0).unwrap();
            r.finish(&state, EndReason::TimeUp, 1000).unwrap();
        }

        let ttl = directory.defaults().finished_ttl_ms;
        assert!(directory.sweep(1000 + ttl - 1).await.is_empty());
        assert_eq!(directory.sweep(1000 + ttl).await, vec![code]);
    }
}
