//! Wire Records
//!
//! Explicit records per entity kind as they are stored in the shared game
//! state, plus the normalisation step every inbound snapshot passes through
//! before it reaches the typed store.
//!
//! The store may hand back collections as arrays or as objects keyed by id or
//! index, and grids with sparsely keyed rows. Anything that cannot be turned
//! into a complete structure rejects the whole snapshot.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use serde_json::Value;
use thiserror::Error;

use crate::game::grid::{Cell, Direction, Grid, GridCell};
use crate::game::state::{
    BombId, BombState, ExplosionId, ExplosionState, PlayerId, PlayerState, Position,
    PowerUpId, PowerUpState, PowerUpType, MAX_BOMBS_CAP, MAX_RANGE_CAP, MAX_SPEED, MIN_SPEED,
};

/// Snapshot normalisation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// Root value is not an object
    #[error("snapshot root is not an object")]
    NotAnObject,

    /// Grid cannot be made rectangular and complete
    #[error("malformed grid: {0}")]
    MalformedGrid(String),

    /// Grid holds a code outside the cell table
    #[error("unknown cell code {0}")]
    UnknownCellCode(u64),

    /// An entity record is missing fields or has the wrong types
    #[error("malformed {kind} record: {reason}")]
    MalformedRecord { kind: &'static str, reason: String },
}

// =============================================================================
// ENTITY RECORDS
// =============================================================================

/// Published player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    /// Player id
    pub id: PlayerId,
    /// Display name
    pub username: String,
    /// Rendered column
    pub x: f32,
    /// Rendered row
    pub y: f32,
    /// Authoritative column
    pub cell_x: i32,
    /// Authoritative row
    pub cell_y: i32,
    /// Facing
    pub direction: Direction,
    /// Still in the match
    pub alive: bool,
    /// Speed level
    pub speed: u8,
    /// Bomb capacity
    pub max_bombs: u8,
    /// Bombs on the field
    pub current_bombs: u8,
    /// Blast range
    pub bomb_range: u8,
    /// Kick ability
    pub can_kick: bool,
    /// Invincible until (ms)
    #[serde(default)]
    pub invincible_until: u64,
    /// Kills
    #[serde(default)]
    pub kills: u32,
    /// Deaths
    #[serde(default)]
    pub deaths: u32,
    /// Slot colour
    #[serde(default)]
    pub color_index: u8,
}

impl From<&PlayerState> for PlayerRecord {
    fn from(p: &PlayerState) -> Self {
        Self {
            id: p.id.clone(),
            username: p.username.clone(),
            x: p.position.x,
            y: p.position.y,
            cell_x: p.cell.x,
            cell_y: p.cell.y,
            direction: p.direction,
            alive: p.alive,
            speed: p.speed,
            max_bombs: p.max_bombs,
            current_bombs: p.current_bombs,
            bomb_range: p.bomb_range,
            can_kick: p.can_kick,
            invincible_until: p.invincible_until,
            kills: p.kills,
            deaths: p.deaths,
            color_index: p.color_index,
        }
    }
}

impl PlayerRecord {
    /// Build the full player state. Move timing is local-only.
    pub fn into_state(self) -> PlayerState {
        let cell = Cell::new(self.cell_x, self.cell_y);
        let mut player = PlayerState::new(self.id, self.username, cell, self.color_index);
        player.position = Position::new(self.x, self.y);
        player.direction = self.direction;
        player.alive = self.alive;
        player.speed = self.speed.clamp(MIN_SPEED, MAX_SPEED);
        player.max_bombs = self.max_bombs.clamp(1, MAX_BOMBS_CAP);
        player.current_bombs = self.current_bombs.min(player.max_bombs);
        player.bomb_range = self.bomb_range.clamp(1, MAX_RANGE_CAP);
        player.can_kick = self.can_kick;
        player.invincible_until = self.invincible_until;
        player.kills = self.kills;
        player.deaths = self.deaths;
        player
    }
}

/// Published bomb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BombRecord {
    /// Bomb id
    pub id: BombId,
    /// Owner
    pub owner_id: PlayerId,
    /// Column
    pub x: i32,
    /// Row
    pub y: i32,
    /// Blast range
    pub range: u8,
    /// Plant time (ms)
    pub planted_at: u64,
    /// Fuse length (ms)
    pub fuse_ms: u64,
    /// Rolling direction
    #[serde(default)]
    pub moving: Option<Direction>,
    /// Last rolling step (ms)
    #[serde(default)]
    pub last_roll_at: u64,
}

impl From<&BombState> for BombRecord {
    fn from(b: &BombState) -> Self {
        Self {
            id: b.id.clone(),
            owner_id: b.owner_id.clone(),
            x: b.cell.x,
            y: b.cell.y,
            range: b.range,
            planted_at: b.planted_at,
            fuse_ms: b.fuse_ms,
            moving: b.moving,
            last_roll_at: b.last_roll_at,
        }
    }
}

impl BombRecord {
    /// Grid cell.
    pub fn cell(&self) -> Cell {
        Cell::new(self.x, self.y)
    }

    /// Build a live bomb.
    pub fn into_state(self) -> BombState {
        let cell = self.cell();
        let mut bomb = BombState::new(self.id, self.owner_id, cell, self.range, self.planted_at, self.fuse_ms);
        bomb.moving = self.moving;
        bomb.last_roll_at = self.last_roll_at.max(self.planted_at);
        bomb
    }
}

/// Published explosion (an entry in the explosion log).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplosionRecord {
    /// Explosion id (the bomb id)
    pub id: ExplosionId,
    /// Owner
    pub owner_id: PlayerId,
    /// Affected cells as `[x, y]`
    pub cells: Vec<[i32; 2]>,
    /// Detonation time (ms)
    pub timestamp: u64,
    /// End of display (ms)
    pub expires_at: u64,
}

impl From<&ExplosionState> for ExplosionRecord {
    fn from(e: &ExplosionState) -> Self {
        Self {
            id: e.id.clone(),
            owner_id: e.owner_id.clone(),
            cells: e.cells.iter().map(|c| [c.x, c.y]).collect(),
            timestamp: e.at_ms,
            expires_at: e.expires_at,
        }
    }
}

impl ExplosionRecord {
    /// Build the explosion.
    pub fn into_state(self) -> ExplosionState {
        ExplosionState {
            id: self.id,
            owner_id: self.owner_id,
            cells: self.cells.into_iter().map(|[x, y]| Cell::new(x, y)).collect(),
            at_ms: self.timestamp,
            expires_at: self.expires_at,
        }
    }
}

/// Published power-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUpRecord {
    /// Power-up id
    pub id: PowerUpId,
    /// Column
    pub x: i32,
    /// Row
    pub y: i32,
    /// Kind
    #[serde(rename = "type")]
    pub kind: PowerUpType,
    /// Claimed
    #[serde(default)]
    pub collected: bool,
    /// Claimer
    #[serde(default)]
    pub collected_by: Option<PlayerId>,
    /// Spawn time (ms)
    #[serde(default)]
    pub spawned_at: u64,
}

impl From<&PowerUpState> for PowerUpRecord {
    fn from(p: &PowerUpState) -> Self {
        Self {
            id: p.id.clone(),
            x: p.cell.x,
            y: p.cell.y,
            kind: p.kind,
            collected: p.collected,
            collected_by: p.collected_by.clone(),
            spawned_at: p.spawned_at,
        }
    }
}

impl PowerUpRecord {
    /// Grid cell.
    pub fn cell(&self) -> Cell {
        Cell::new(self.x, self.y)
    }

    /// Build the power-up.
    pub fn into_state(self) -> PowerUpState {
        let cell = self.cell();
        let mut powerup = PowerUpState::new(self.id, cell, self.kind, self.spawned_at);
        powerup.collected = self.collected;
        powerup.collected_by = self.collected_by;
        powerup
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A normalised `gameState` snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameSnapshot {
    /// Players by id
    pub players: BTreeMap<PlayerId, PlayerRecord>,
    /// Bombs by id
    pub bombs: BTreeMap<BombId, BombRecord>,
    /// Explosion log, in log order
    pub explosions: Vec<ExplosionRecord>,
    /// Power-ups by id
    pub powerups: BTreeMap<PowerUpId, PowerUpRecord>,
    /// Grid, if published
    pub grid: Option<Grid>,
}

impl GameSnapshot {
    /// Normalise a raw `gameState` value. `Null` is an empty snapshot.
    pub fn from_value(value: &Value) -> Result<Self, SnapshotError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let root = value.as_object().ok_or(SnapshotError::NotAnObject)?;
        let mut snapshot = Self::default();

        for item in collection(root.get("players")) {
            let record: PlayerRecord = parse_record("player", item)?;
            snapshot.players.insert(record.id.clone(), record);
        }
        for item in collection(root.get("bombs")) {
            let record: BombRecord = parse_record("bomb", item)?;
            snapshot.bombs.insert(record.id.clone(), record);
        }
        for item in collection(root.get("explosions")) {
            snapshot.explosions.push(parse_record("explosion", item)?);
        }
        for item in collection(root.get("powerups")) {
            let record: PowerUpRecord = parse_record("powerup", item)?;
            snapshot.powerups.insert(record.id.clone(), record);
        }
        if let Some(grid) = root.get("grid").filter(|g| !g.is_null()) {
            snapshot.grid = Some(normalize_grid(grid)?);
        }

        Ok(snapshot)
    }
}

/// Children of a collection, whether stored as an array or a keyed object.
/// Holes (nulls) are skipped.
fn collection(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).collect(),
        Some(Value::Object(map)) => map.values().filter(|v| !v.is_null()).collect(),
        _ => Vec::new(),
    }
}

fn parse_record<T: for<'de> Deserialize<'de>>(kind: &'static str, value: &Value) -> Result<T, SnapshotError> {
    T::deserialize(value).map_err(|e| SnapshotError::MalformedRecord {
        kind,
        reason: e.to_string(),
    })
}

/// Elements of an index-keyed sequence: an array, or an object whose keys are
/// exactly `0..n`. Anything with gaps is incomplete.
fn indexed<'a>(value: &'a Value, what: &str) -> Result<Vec<&'a Value>, SnapshotError> {
    match value {
        Value::Array(items) => {
            if items.iter().any(Value::is_null) {
                return Err(SnapshotError::MalformedGrid(format!("{} has holes", what)));
            }
            Ok(items.iter().collect())
        }
        Value::Object(map) => {
            let mut keyed: Vec<(usize, &Value)> = Vec::with_capacity(map.len());
            for (key, v) in map {
                let idx: usize = key
                    .parse()
                    .map_err(|_| SnapshotError::MalformedGrid(format!("{} key {:?} is not an index", what, key)))?;
                keyed.push((idx, v));
            }
            keyed.sort_by_key(|(idx, _)| *idx);
            if keyed.iter().enumerate().any(|(i, (idx, v))| i != *idx || v.is_null()) {
                return Err(SnapshotError::MalformedGrid(format!("{} is sparse", what)));
            }
            Ok(keyed.into_iter().map(|(_, v)| v).collect())
        }
        _ => Err(SnapshotError::MalformedGrid(format!("{} is not a sequence", what))),
    }
}

/// Turn a published grid into a rectangular [`Grid`].
pub fn normalize_grid(value: &Value) -> Result<Grid, SnapshotError> {
    let rows = indexed(value, "grid")?;
    if rows.is_empty() {
        return Err(SnapshotError::MalformedGrid("no rows".to_string()));
    }

    let mut code_rows = Vec::with_capacity(rows.len());
    for (y, row) in rows.into_iter().enumerate() {
        let cells = indexed(row, &format!("row {}", y))?;
        let mut codes = Vec::with_capacity(cells.len());
        for cell in cells {
            let code = cell
                .as_u64()
                .ok_or_else(|| SnapshotError::MalformedGrid(format!("row {} has a non-numeric cell", y)))?;
            let kind = u8::try_from(code)
                .ok()
                .and_then(GridCell::from_code)
                .ok_or(SnapshotError::UnknownCellCode(code))?;
            codes.push(kind.code());
        }
        code_rows.push(codes);
    }

    Grid::from_code_rows(&code_rows)
        .ok_or_else(|| SnapshotError::MalformedGrid("rows differ in length".to_string()))
}

/// Grid as published: rows of cell codes.
pub fn grid_to_value(grid: &Grid) -> Value {
    serde_json::json!(grid.to_code_rows())
}
