//! Game State Definitions
//!
//! The in-memory mirror of one match: players, bombs, explosions, power-ups
//! and the grid. Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::game::events::GameEvent;
use crate::game::grid::{Cell, Direction, Grid, GridCell};

// =============================================================================
// IDS
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh random id (UUID v4, simple form).
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            /// Borrow as str.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id! {
    /// Player identifier issued by the external auth collaborator.
    ///
    /// Implements Ord for deterministic BTreeMap ordering.
    PlayerId
}

string_id! {
    /// Bomb identifier.
    BombId
}

string_id! {
    /// Explosion identifier. Defaults to the exploding bomb's id.
    ExplosionId
}

string_id! {
    /// Power-up identifier.
    PowerUpId
}

impl From<&BombId> for ExplosionId {
    fn from(id: &BombId) -> Self {
        ExplosionId(id.0.clone())
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// Lowest speed level.
pub const MIN_SPEED: u8 = 1;
/// Highest speed level.
pub const MAX_SPEED: u8 = 6;
/// Bomb capacity cap.
pub const MAX_BOMBS_CAP: u8 = 8;
/// Blast range cap.
pub const MAX_RANGE_CAP: u8 = 8;

/// Continuous position used only for rendering interpolation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Column (fractional)
    pub x: f32,
    /// Row (fractional)
    pub y: f32,
}

impl Position {
    /// Create a position.
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Centre of a cell.
    pub fn of_cell(cell: Cell) -> Self {
        Self::new(cell.x as f32, cell.y as f32)
    }
}

/// State of a single player in the match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Unique player ID
    pub id: PlayerId,

    /// Display name
    pub username: String,

    /// Smoothed position for rendering
    pub position: Position,

    /// Authoritative grid cell
    pub cell: Cell,

    /// Facing direction
    pub direction: Direction,

    /// Is player still alive?
    pub alive: bool,

    /// Speed level (1..=6)
    pub speed: u8,

    /// Bomb capacity
    pub max_bombs: u8,

    /// Bombs currently planted and not yet exploded
    pub current_bombs: u8,

    /// Blast range in cells
    pub bomb_range: u8,

    /// Can push bombs by walking into them
    pub can_kick: bool,

    /// Wall-clock ms until which the player cannot be killed
    pub invincible_until: u64,

    /// Number of other players eliminated by this player
    pub kills: u32,

    /// Number of times this player died
    pub deaths: u32,

    /// Slot colour
    pub color_index: u8,

    /// Wall-clock ms of the last accepted cell move
    pub last_move_at: Option<u64>,
}

impl PlayerState {
    /// Create a new player at a spawn cell.
    pub fn new(id: PlayerId, username: impl Into<String>, cell: Cell, color_index: u8) -> Self {
        Self {
            id,
            username: username.into(),
            position: Position::of_cell(cell),
            cell,
            direction: Direction::Down,
            alive: true,
            speed: MIN_SPEED,
            max_bombs: 1,
            current_bombs: 0,
            bomb_range: 1,
            can_kick: false,
            invincible_until: 0,
            kills: 0,
            deaths: 0,
            color_index,
            last_move_at: None,
        }
    }

    /// Is the player invincible at `now_ms`?
    #[inline]
    pub fn is_invincible(&self, now_ms: u64) -> bool {
        now_ms < self.invincible_until
    }

    /// Can another bomb be planted?
    #[inline]
    pub fn has_bomb_available(&self) -> bool {
        self.current_bombs < self.max_bombs
    }

    /// Hash this player's rule-relevant state.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_str(self.id.as_str());
        hasher.update_i32(self.cell.x);
        hasher.update_i32(self.cell.y);
        hasher.update_bool(self.alive);
        hasher.update_u8(self.speed);
        hasher.update_u8(self.max_bombs);
        hasher.update_u8(self.current_bombs);
        hasher.update_u8(self.bomb_range);
        hasher.update_bool(self.can_kick);
        hasher.update_u64(self.invincible_until);
        hasher.update_u32(self.kills);
        hasher.update_u32(self.deaths);
    }
}

// =============================================================================
// BOMB STATE
// =============================================================================

/// State of a planted bomb.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BombState {
    /// Bomb id
    pub id: BombId,
    /// Who planted it
    pub owner_id: PlayerId,
    /// Current cell
    pub cell: Cell,
    /// Blast range
    pub range: u8,
    /// Wall-clock plant time (ms)
    pub planted_at: u64,
    /// Fuse length (ms)
    pub fuse_ms: u64,
    /// Rolling direction after a kick
    pub moving: Option<Direction>,
    /// Wall-clock ms of the last rolling step
    pub last_roll_at: u64,
    /// Has it gone off?
    pub exploded: bool,
}

impl BombState {
    /// Create a freshly planted bomb.
    pub fn new(id: BombId, owner_id: PlayerId, cell: Cell, range: u8, planted_at: u64, fuse_ms: u64) -> Self {
        Self {
            id,
            owner_id,
            cell,
            range,
            planted_at,
            fuse_ms,
            moving: None,
            last_roll_at: planted_at,
            exploded: false,
        }
    }

    /// Wall-clock time the fuse expires.
    #[inline]
    pub fn explodes_at(&self) -> u64 {
        self.planted_at.saturating_add(self.fuse_ms)
    }

    /// Has the fuse expired at `now_ms`?
    #[inline]
    pub fn fuse_expired(&self, now_ms: u64) -> bool {
        !self.exploded && now_ms >= self.explodes_at()
    }
}

// =============================================================================
// EXPLOSION STATE
// =============================================================================

/// An explosion on display. Its rule effects were applied when it was created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplosionState {
    /// Stable id (the bomb id by default)
    pub id: ExplosionId,
    /// Owner of the bomb
    pub owner_id: PlayerId,
    /// Affected cells
    pub cells: Vec<Cell>,
    /// When it went off (ms)
    pub at_ms: u64,
    /// When to stop displaying it (ms)
    pub expires_at: u64,
}

// =============================================================================
// POWER-UP STATE
// =============================================================================

/// Power-up kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUpType {
    /// +1 speed level
    Speed,
    /// +1 bomb capacity
    ExtraBomb,
    /// +1 blast range
    Range,
    /// Enables kicking bombs
    Kick,
    /// Temporary immunity to explosions
    Invincible,
}

impl PowerUpType {
    /// All kinds, in weight-table order.
    pub const ALL: [PowerUpType; 5] = [
        PowerUpType::Speed,
        PowerUpType::ExtraBomb,
        PowerUpType::Range,
        PowerUpType::Kick,
        PowerUpType::Invincible,
    ];

    /// Spawn weights, parallel to [`PowerUpType::ALL`].
    pub const WEIGHTS: [u32; 5] = [25, 25, 25, 15, 10];
}

/// State of a power-up on the field.
///
/// Local collection removes the power-up outright, so `collected` and
/// `collected_by` are never set here. They carry claim markers from peers
/// that mark a record instead of deleting it; the reconciler treats a marked
/// record as a removal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerUpState {
    /// Power-up id
    pub id: PowerUpId,
    /// Cell it sits on
    pub cell: Cell,
    /// Kind
    pub kind: PowerUpType,
    /// Has it been claimed?
    pub collected: bool,
    /// Who claimed it
    pub collected_by: Option<PlayerId>,
    /// Wall-clock spawn time (ms)
    pub spawned_at: u64,
}

impl PowerUpState {
    /// Create an uncollected power-up.
    pub fn new(id: PowerUpId, cell: Cell, kind: PowerUpType, spawned_at: u64) -> Self {
        Self {
            id,
            cell,
            kind,
            collected: false,
            collected_by: None,
            spawned_at,
        }
    }
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Complete local mirror of one match.
///
/// Uses BTreeMap for deterministic iteration order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchState {
    /// Room this match belongs to
    pub room_code: String,

    /// Authoritative grid (None until generated or adopted)
    pub grid: Option<Grid>,

    /// All players
    pub players: BTreeMap<PlayerId, PlayerState>,

    /// Live bombs
    pub bombs: BTreeMap<BombId, BombState>,

    /// Explosions on display
    pub explosions: BTreeMap<ExplosionId, ExplosionState>,

    /// Power-ups on the field
    pub powerups: BTreeMap<PowerUpId, PowerUpState>,

    /// Wall-clock start time (ms)
    pub started_at: u64,

    /// Players present at start
    pub started_player_count: u32,

    /// Events generated this tick (cleared each tick)
    #[serde(skip)]
    pub pending_events: Vec<GameEvent>,
}

impl MatchState {
    /// Create an empty match state.
    pub fn new(room_code: impl Into<String>) -> Self {
        Self {
            room_code: room_code.into(),
            grid: None,
            players: BTreeMap::new(),
            bombs: BTreeMap::new(),
            explosions: BTreeMap::new(),
            powerups: BTreeMap::new(),
            started_at: 0,
            started_player_count: 0,
            pending_events: Vec::new(),
        }
    }

    /// Create with a grid already in place.
    pub fn with_grid(room_code: impl Into<String>, grid: Grid) -> Self {
        let mut state = Self::new(room_code);
        state.grid = Some(grid);
        state
    }

    /// Add (or replace) a player.
    pub fn add_player(&mut self, player: PlayerState) {
        self.players.insert(player.id.clone(), player);
    }

    /// Get a player by ID.
    pub fn get_player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    /// Get a player mutably by ID.
    pub fn get_player_mut(&mut self, id: &PlayerId) -> Option<&mut PlayerState> {
        self.players.get_mut(id)
    }

    /// Get count of alive players.
    pub fn alive_player_count(&self) -> u32 {
        self.players.values().filter(|p| p.alive).count() as u32
    }

    /// Live bomb on a cell, if any.
    pub fn bomb_at(&self, cell: Cell) -> Option<&BombState> {
        self.bombs.values().find(|b| !b.exploded && b.cell == cell)
    }

    /// Uncollected power-up on a cell, if any.
    pub fn powerup_at(&self, cell: Cell) -> Option<&PowerUpState> {
        self.powerups.values().find(|p| !p.collected && p.cell == cell)
    }

    /// Grid contents at a cell (None without a grid or out of bounds).
    pub fn cell_at(&self, cell: Cell) -> Option<GridCell> {
        self.grid.as_ref().and_then(|g| g.get(cell))
    }

    /// Recompute the occupancy marker of a non-solid cell from the entity
    /// collections: bomb, then power-up, else empty. Solid cells are untouched.
    pub fn refresh_cell(&mut self, cell: Cell) {
        let marker = if self.bomb_at(cell).is_some() {
            GridCell::BombOccupied
        } else if self.powerup_at(cell).is_some() {
            GridCell::PowerUp
        } else {
            GridCell::Empty
        };

        if let Some(grid) = self.grid.as_mut() {
            match grid.get(cell) {
                Some(current) if !current.is_solid() => {
                    grid.set(cell, marker);
                }
                _ => {}
            }
        }
    }

    /// Eliminate a player.
    ///
    /// Dead, unknown and invincible victims short-circuit with `None`, so the
    /// call is idempotent. A killer equal to the victim is a self-elimination:
    /// deaths +1, no kill credit.
    pub fn eliminate_player(
        &mut self,
        victim_id: &PlayerId,
        killer_id: Option<&PlayerId>,
        now_ms: u64,
    ) -> Option<GameEvent> {
        let victim = self.players.get_mut(victim_id)?;
        if !victim.alive || victim.is_invincible(now_ms) {
            return None;
        }

        victim.alive = false;
        victim.deaths += 1;

        // Credit kill to killer (separate borrow)
        if let Some(kid) = killer_id {
            if kid != victim_id {
                if let Some(killer) = self.players.get_mut(kid) {
                    killer.kills += 1;
                }
            }
        }

        Some(GameEvent::player_eliminated(now_ms, victim_id.clone(), killer_id.cloned()))
    }

    /// Take a player out of play without a killer (disconnect timeout).
    /// Ignores invincibility. `None` if unknown or already dead.
    pub fn forfeit_player(&mut self, player_id: &PlayerId, now_ms: u64) -> Option<GameEvent> {
        let player = self.players.get_mut(player_id)?;
        if !player.alive {
            return None;
        }
        player.alive = false;
        player.deaths += 1;
        Some(GameEvent::player_eliminated(now_ms, player_id.clone(), None))
    }

    /// Final standings: alive first, then kills, then fewest deaths, then id.
    pub fn get_placements(&self) -> Vec<(PlayerId, u8, u32)> {
        let mut ranked: Vec<&PlayerState> = self.players.values().collect();
        ranked.sort_by(|a, b| {
            b.alive
                .cmp(&a.alive)
                .then(b.kills.cmp(&a.kills))
                .then(a.deaths.cmp(&b.deaths))
                .then(a.id.cmp(&b.id))
        });

        ranked
            .into_iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), (i + 1) as u8, p.kills))
            .collect()
    }

    /// Compute hash of rule-relevant state.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_match_state();
        if let Some(grid) = &self.grid {
            hasher.update_bytes(&grid.fingerprint());
        }
        for player in self.players.values() {
            player.hash_into(&mut hasher);
        }
        // Entity ids are random per participant; hash by cell instead
        let mut bombs: Vec<&BombState> = self.bombs.values().collect();
        bombs.sort_by(|a, b| a.cell.cmp(&b.cell).then(a.owner_id.cmp(&b.owner_id)));
        for bomb in bombs {
            hasher.update_str(bomb.owner_id.as_str());
            hasher.update_i32(bomb.cell.x);
            hasher.update_i32(bomb.cell.y);
            hasher.update_u8(bomb.range);
        }
        let mut powerups: Vec<&PowerUpState> = self.powerups.values().collect();
        powerups.sort_by_key(|p| (p.cell, p.kind));
        for powerup in powerups {
            hasher.update_i32(powerup.cell.x);
            hasher.update_i32(powerup.cell.y);
            hasher.update_u8(powerup.kind as u8);
            hasher.update_bool(powerup.collected);
        }
        hasher.finalize()
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Push a game event.
    pub fn push_event(&mut self, event: GameEvent) {
        self.pending_events.push(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn two_player_state() -> (MatchState, PlayerId, PlayerId) {
        let mut state = MatchState::with_grid("ROOM", Grid::new(7, 7));
        let a = PlayerId::new("alice");
        let b = PlayerId::new("bob");
        state.add_player(PlayerState::new(a.clone(), "alice", Cell::new(1, 1), 0));
        state.add_player(PlayerState::new(b.clone(), "bob", Cell::new(5, 5), 1));
        (state, a, b)
    }

    #[test]
    fn test_player_id_ordering() {
        assert!(PlayerId::new("a") < PlayerId::new("b"));
        assert_eq!(PlayerId::new("x").to_string(), "x");
        assert_ne!(BombId::generate(), BombId::generate());
    }

    #[test]
    fn test_explosion_id_defaults_to_bomb_id() {
        let bomb = BombId::new("bomb-1");
        assert_eq!(ExplosionId::from(&bomb).as_str(), "bomb-1");
    }

    #[test]
    fn test_kill_credit() {
        let (mut state, a, b) = two_player_state();
        let event = state.eliminate_player(&b, Some(&a), 100).unwrap();
        assert!(!event.is_self_elimination());
        assert_eq!(state.players[&a].kills, 1);
        assert_eq!(state.players[&b].deaths, 1);
        assert!(!state.players[&b].alive);
    }

    #[test]
    fn test_self_elimination_no_credit() {
        let (mut state, a, _) = two_player_state();
        let event = state.eliminate_player(&a, Some(&a), 100).unwrap();
        assert!(event.is_self_elimination());
        assert_eq!(state.players[&a].kills, 0);
        assert_eq!(state.players[&a].deaths, 1);
    }

    #[test]
    fn test_elimination_idempotent() {
        let (mut state, a, b) = two_player_state();
        assert!(state.eliminate_player(&b, Some(&a), 100).is_some());
        assert!(state.eliminate_player(&b, Some(&a), 200).is_none());
        assert_eq!(state.players[&a].kills, 1);
        assert_eq!(state.players[&b].deaths, 1);
    }

    #[test]
    fn test_invincible_cannot_die() {
        let (mut state, a, b) = two_player_state();
        state.get_player_mut(&b).unwrap().invincible_until = 1000;
        assert!(state.eliminate_player(&b, Some(&a), 500).is_none());
        assert!(state.players[&b].alive);
        assert_eq!(state.players[&a].kills, 0);

        // Expired invincibility no longer protects
        assert!(state.eliminate_player(&b, Some(&a), 1000).is_some());
    }

    #[test]
    fn test_refresh_cell() {
        let (mut state, a, _) = two_player_state();
        let cell = Cell::new(3, 3);
        state.bombs.insert(
            BombId::new("b1"),
            BombState::new(BombId::new("b1"), a, cell, 1, 0, 3000),
        );
        state.refresh_cell(cell);
        assert_eq!(state.cell_at(cell), Some(GridCell::BombOccupied));

        state.bombs.clear();
        state.powerups.insert(
            PowerUpId::new("p1"),
            PowerUpState::new(PowerUpId::new("p1"), cell, PowerUpType::Kick, 0),
        );
        state.refresh_cell(cell);
        assert_eq!(state.cell_at(cell), Some(GridCell::PowerUp));

        state.powerups.clear();
        state.refresh_cell(cell);
        assert_eq!(state.cell_at(cell), Some(GridCell::Empty));
    }

    #[test]
    fn test_refresh_cell_leaves_walls() {
        let (mut state, _, _) = two_player_state();
        let cell = Cell::new(0, 0);
        state.grid.as_mut().unwrap().set(cell, GridCell::Wall);
        state.refresh_cell(cell);
        assert_eq!(state.cell_at(cell), Some(GridCell::Wall));
    }

    #[test]
    fn test_placements() {
        let (mut state, a, b) = two_player_state();
        state.eliminate_player(&b, Some(&a), 10);
        let placements = state.get_placements();
        assert_eq!(placements[0].0, a);
        assert_eq!(placements[0].1, 1);
        assert_eq!(placements[1].0, b);
    }

    #[test]
    fn test_hash_determinism() {
        let (s1, _, _) = two_player_state();
        let (s2, _, _) = two_player_state();
        assert_eq!(s1.compute_hash(), s2.compute_hash());
    }

    #[test]
    fn test_forfeit_ignores_invincibility_and_credits_nobody() {
        let mut state = MatchState::new("ROOM");
        let a = PlayerId::new("a");
        let b = PlayerId::new("b");
        state.add_player(PlayerState::new(a.clone(), "a", Cell::new(1, 1), 0));
        state.add_player(PlayerState::new(b.clone(), "b", Cell::new(3, 3), 1));
        state.get_player_mut(&a).unwrap().invincible_until = 10_000;

        let event = state.forfeit_player(&a, 100).unwrap();
        assert!(matches!(event.data, crate::game::events::GameEventData::PlayerEliminated { killer_id: None, .. }));
        assert!(!state.players[&a].alive);
        assert_eq!(state.players[&a].deaths, 1);
        assert_eq!(state.players[&b].kills, 0);
        assert!(state.forfeit_player(&a, 200).is_none());
        assert!(state.forfeit_player(&PlayerId::new("nobody"), 200).is_none());
    }
}
