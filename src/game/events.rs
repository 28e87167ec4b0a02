//! Game Events
//!
//! Events generated during simulation. The participant layer turns the ones
//! it owns into gateway writes; the demo binary logs them.

use serde::{Serialize, Deserialize};

use crate::game::grid::{Cell, Direction};
use crate::game::state::{BombId, ExplosionId, PlayerId, PowerUpId, PowerUpType};

/// Priority for event processing order.
///
/// Lower value = processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Player deaths processed first
    PlayerElimination = 0,
    /// Then explosions and destroyed cells
    Explosion = 1,
    /// Then pickups
    PowerUp = 2,
    /// Then bomb placement and kicks
    Bomb = 3,
    /// Lowest priority
    Other = 255,
}

/// Why a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// At most one player left alive
    LastStanding,
    /// Match duration elapsed
    TimeUp,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Bomb planted
    BombPlaced {
        bomb_id: BombId,
        owner_id: PlayerId,
        cell: Cell,
    },

    /// Bomb kicked into motion
    BombKicked {
        bomb_id: BombId,
        kicker_id: PlayerId,
        direction: Direction,
    },

    /// Bomb changed cell (rolling after a kick)
    BombMoved {
        bomb_id: BombId,
        cell: Cell,
        moving: Option<Direction>,
    },

    /// Bomb detonated
    BombExploded {
        explosion_id: ExplosionId,
        owner_id: PlayerId,
        cells: Vec<Cell>,
    },

    /// Crate destroyed by an explosion
    CellDestroyed {
        cell: Cell,
    },

    /// Player eliminated
    PlayerEliminated {
        victim_id: PlayerId,
        killer_id: Option<PlayerId>,
        self_elimination: bool,
    },

    /// Power-up appeared in a destroyed crate's cell
    PowerUpSpawned {
        powerup_id: PowerUpId,
        kind: PowerUpType,
        cell: Cell,
    },

    /// Power-up claimed
    PowerUpCollected {
        powerup_id: PowerUpId,
        player_id: PlayerId,
        kind: PowerUpType,
    },

    /// Match ended
    MatchEnded {
        winner_id: Option<PlayerId>,
        reason: EndReason,
    },
}

/// A game event with timing and priority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEvent {
    /// Wall-clock time (ms) when the event occurred
    pub at_ms: u64,

    /// Processing priority
    pub priority: EventPriority,

    /// Player involved (for tie-breaking)
    pub player_id: Option<PlayerId>,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(at_ms: u64, priority: EventPriority, data: GameEventData) -> Self {
        let player_id = match &data {
            GameEventData::BombPlaced { owner_id, .. } => Some(owner_id.clone()),
            GameEventData::BombKicked { kicker_id, .. } => Some(kicker_id.clone()),
            GameEventData::BombExploded { owner_id, .. } => Some(owner_id.clone()),
            GameEventData::PlayerEliminated { victim_id, .. } => Some(victim_id.clone()),
            GameEventData::PowerUpCollected { player_id, .. } => Some(player_id.clone()),
            GameEventData::MatchEnded { winner_id, .. } => winner_id.clone(),
            _ => None,
        };

        Self {
            at_ms,
            priority,
            player_id,
            data,
        }
    }

    /// Create bomb placed event.
    pub fn bomb_placed(at_ms: u64, bomb_id: BombId, owner_id: PlayerId, cell: Cell) -> Self {
        Self::new(at_ms, EventPriority::Bomb, GameEventData::BombPlaced { bomb_id, owner_id, cell })
    }

    /// Create bomb kicked event.
    pub fn bomb_kicked(at_ms: u64, bomb_id: BombId, kicker_id: PlayerId, direction: Direction) -> Self {
        Self::new(at_ms, EventPriority::Bomb, GameEventData::BombKicked { bomb_id, kicker_id, direction })
    }

    /// Create bomb moved event.
    pub fn bomb_moved(at_ms: u64, bomb_id: BombId, cell: Cell, moving: Option<Direction>) -> Self {
        Self::new(at_ms, EventPriority::Bomb, GameEventData::BombMoved { bomb_id, cell, moving })
    }

    /// Create bomb exploded event.
    pub fn bomb_exploded(at_ms: u64, explosion_id: ExplosionId, owner_id: PlayerId, cells: Vec<Cell>) -> Self {
        Self::new(
            at_ms,
            EventPriority::Explosion,
            GameEventData::BombExploded { explosion_id, owner_id, cells },
        )
    }

    /// Create cell destroyed event.
    pub fn cell_destroyed(at_ms: u64, cell: Cell) -> Self {
        Self::new(at_ms, EventPriority::Explosion, GameEventData::CellDestroyed { cell })
    }

    /// Create player eliminated event.
    pub fn player_eliminated(at_ms: u64, victim_id: PlayerId, killer_id: Option<PlayerId>) -> Self {
        let self_elimination = killer_id.as_ref() == Some(&victim_id);
        Self::new(
            at_ms,
            EventPriority::PlayerElimination,
            GameEventData::PlayerEliminated { victim_id, killer_id, self_elimination },
        )
    }

    /// Create power-up spawned event.
    pub fn powerup_spawned(at_ms: u64, powerup_id: PowerUpId, kind: PowerUpType, cell: Cell) -> Self {
        Self::new(at_ms, EventPriority::PowerUp, GameEventData::PowerUpSpawned { powerup_id, kind, cell })
    }

    /// Create power-up collected event.
    pub fn powerup_collected(at_ms: u64, powerup_id: PowerUpId, player_id: PlayerId, kind: PowerUpType) -> Self {
        Self::new(
            at_ms,
            EventPriority::PowerUp,
            GameEventData::PowerUpCollected { powerup_id, player_id, kind },
        )
    }

    /// Create match ended event.
    pub fn match_ended(at_ms: u64, winner_id: Option<PlayerId>, reason: EndReason) -> Self {
        Self::new(at_ms, EventPriority::Other, GameEventData::MatchEnded { winner_id, reason })
    }

    /// Is this a self-elimination?
    pub fn is_self_elimination(&self) -> bool {
        matches!(
            self.data,
            GameEventData::PlayerEliminated { self_elimination: true, .. }
        )
    }
}

impl PartialEq for GameEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at_ms == other.at_ms
            && self.priority == other.priority
            && self.player_id == other.player_id
    }
}

impl Eq for GameEvent {}

impl PartialOrd for GameEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GameEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sort by: time, then priority, then player_id
        self.at_ms
            .cmp(&other.at_ms)
            .then(self.priority.cmp(&other.priority))
            .then(self.player_id.cmp(&other.player_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let a = PlayerId::new("a");
        let b = PlayerId::new("b");

        let elim_a = GameEvent::player_eliminated(10, a.clone(), None);
        let pickup = GameEvent::powerup_collected(10, PowerUpId::new("p1"), a.clone(), PowerUpType::Speed);
        let elim_b = GameEvent::player_eliminated(10, b, None);

        // Same time, but elimination < collection
        assert!(elim_a < pickup);

        // Same time and priority, but a < b
        assert!(elim_a < elim_b);
    }

    #[test]
    fn test_self_elimination_tag() {
        let a = PlayerId::new("a");
        let own = GameEvent::player_eliminated(5, a.clone(), Some(a.clone()));
        assert!(own.is_self_elimination());

        let other = GameEvent::player_eliminated(5, a, Some(PlayerId::new("b")));
        assert!(!other.is_self_elimination());
    }
}
