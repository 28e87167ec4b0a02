//! Bomb Placement and Blast Propagation
//!
//! Placement enforces one bomb per cell and the owner's capacity. Propagation
//! is a pure function of the grid: it walks the four cardinal directions up to
//! the bomb's range, stopping before walls and on the first crate.

use crate::game::events::GameEvent;
use crate::game::grid::{Cell, Direction, Grid, GridCell};
use crate::game::state::{BombId, BombState, MatchState, PlayerId};
use crate::game::tick::{ActionError, MatchConfig};

/// Plant a bomb on the player's current cell.
pub fn place_bomb(
    state: &mut MatchState,
    player_id: &PlayerId,
    now_ms: u64,
    config: &MatchConfig,
) -> Result<BombId, ActionError> {
    let (cell, range) = {
        let player = state
            .get_player(player_id)
            .ok_or_else(|| ActionError::UnknownPlayer(player_id.clone()))?;
        if !player.alive {
            return Err(ActionError::PlayerDead);
        }
        if !player.has_bomb_available() {
            return Err(ActionError::NoBombsAvailable);
        }
        (player.cell, player.bomb_range)
    };

    if state.grid.is_none() {
        return Err(ActionError::NoGrid);
    }
    if state.bomb_at(cell).is_some() {
        return Err(ActionError::CellOccupied(cell));
    }

    let bomb_id = BombId::generate();
    let bomb = BombState::new(bomb_id.clone(), player_id.clone(), cell, range, now_ms, config.fuse_ms);
    state.bombs.insert(bomb_id.clone(), bomb);

    if let Some(player) = state.get_player_mut(player_id) {
        player.current_bombs = (player.current_bombs + 1).min(player.max_bombs);
    }
    state.refresh_cell(cell);
    state.push_event(GameEvent::bomb_placed(now_ms, bomb_id.clone(), player_id.clone(), cell));

    Ok(bomb_id)
}

/// Cells affected by a blast at `origin` with `range`.
///
/// Own cell first, then up, down, left, right. A direction halts before a wall
/// or the grid edge, and halts after including the first crate.
pub fn explosion_cells(grid: &Grid, origin: Cell, range: u8) -> Vec<Cell> {
    let mut cells = Vec::with_capacity(1 + 4 * range as usize);
    cells.push(origin);

    for dir in Direction::ALL {
        for dist in 1..=range as i32 {
            let cell = origin.step(dir, dist);
            match grid.get(cell) {
                None | Some(GridCell::Wall) => break,
                Some(GridCell::Destructible) => {
                    cells.push(cell);
                    break;
                }
                Some(_) => cells.push(cell),
            }
        }
    }

    cells
}

/// Ids of bombs whose fuse has expired, in id order.
pub fn expired_bombs(state: &MatchState, now_ms: u64) -> Vec<BombId> {
    state
        .bombs
        .values()
        .filter(|b| b.fuse_expired(now_ms))
        .map(|b| b.id.clone())
        .collect()
}
