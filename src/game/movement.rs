//! Movement and Kicking
//!
//! Cell moves are validated against the grid and rate-limited per player by a
//! speed-dependent interval. Continuous positions ease toward the authoritative
//! cell independently of frame rate. Walking into a bomb with the kick ability
//! sends the bomb rolling instead.

use crate::game::events::GameEvent;
use crate::game::grid::{Cell, Direction, Grid, GridCell};
use crate::game::state::{BombId, MatchState, PlayerId, MIN_SPEED};
use crate::game::tick::{ActionError, MatchConfig};

/// Result of a movement attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Player entered a new cell
    Moved(Cell),
    /// Player kicked a bomb instead of moving
    Kicked(BombId),
    /// Destination is a wall, crate, bomb or out of bounds
    Blocked,
    /// Minimum interval since the last move has not elapsed
    TooSoon,
}

/// Minimum time between cell moves for a speed level.
pub fn move_interval_ms(speed: u8, config: &MatchConfig) -> u64 {
    let levels = speed.saturating_sub(MIN_SPEED) as u64;
    config
        .base_move_interval_ms
        .saturating_sub(levels * config.move_interval_step_ms)
        .max(config.min_move_interval_ms)
}

/// Attempt to move a player one cell.
pub fn try_move(
    state: &mut MatchState,
    player_id: &PlayerId,
    dir: Direction,
    now_ms: u64,
    config: &MatchConfig,
) -> Result<MoveOutcome, ActionError> {
    let (from, can_kick) = {
        let player = state
            .players
            .get_mut(player_id)
            .ok_or_else(|| ActionError::UnknownPlayer(player_id.clone()))?;
        if !player.alive {
            return Err(ActionError::PlayerDead);
        }

        player.direction = dir;

        if let Some(last) = player.last_move_at {
            if now_ms.saturating_sub(last) < move_interval_ms(player.speed, config) {
                return Ok(MoveOutcome::TooSoon);
            }
        }
        (player.cell, player.can_kick)
    };

    let grid = state.grid.as_ref().ok_or(ActionError::NoGrid)?;
    let dest = from.step(dir, 1);

    let dest_kind = match grid.get(dest) {
        Some(kind) => kind,
        None => return Ok(MoveOutcome::Blocked),
    };
    if dest_kind.is_solid() {
        return Ok(MoveOutcome::Blocked);
    }

    let bomb_here = state.bomb_at(dest).map(|b| b.id.clone());
    if dest_kind == GridCell::BombOccupied || bomb_here.is_some() {
        let Some(bomb_id) = bomb_here.filter(|_| can_kick) else {
            return Ok(MoveOutcome::Blocked);
        };
        if kick_bomb(state, &bomb_id, player_id, dir, now_ms) {
            if let Some(player) = state.players.get_mut(player_id) {
                player.last_move_at = Some(now_ms);
            }
            return Ok(MoveOutcome::Kicked(bomb_id));
        }
        return Ok(MoveOutcome::Blocked);
    }

    if let Some(player) = state.players.get_mut(player_id) {
        player.cell = dest;
        player.last_move_at = Some(now_ms);
    }
    Ok(MoveOutcome::Moved(dest))
}

/// Cell where a bomb rolling from `from` in `dir` comes to rest.
pub fn slide_destination(grid: &Grid, from: Cell, dir: Direction) -> Cell {
    let mut cell = from;
    loop {
        let next = cell.step(dir, 1);
        if !grid.is_empty(next) {
            return cell;
        }
        cell = next;
    }
}

/// Set a bomb rolling. Returns false if the bomb is gone or cannot move at all.
///
/// Concurrent kicks are last-write-wins on the rolling direction.
pub fn kick_bomb(
    state: &mut MatchState,
    bomb_id: &BombId,
    kicker_id: &PlayerId,
    dir: Direction,
    now_ms: u64,
) -> bool {
    let Some(grid) = state.grid.as_ref() else {
        return false;
    };
    let Some(bomb) = state.bombs.get(bomb_id) else {
        return false;
    };
    if bomb.exploded || slide_destination(grid, bomb.cell, dir) == bomb.cell {
        return false;
    }

    if let Some(bomb) = state.bombs.get_mut(bomb_id) {
        bomb.moving = Some(dir);
        bomb.last_roll_at = now_ms;
    }
    state.push_event(GameEvent::bomb_kicked(now_ms, bomb_id.clone(), kicker_id.clone(), dir));
    true
}

/// Advance rolling bombs one cell per roll interval until blocked.
///
/// Returns ids of bombs whose cell or rolling state changed.
pub fn advance_rolling_bombs(state: &mut MatchState, now_ms: u64, config: &MatchConfig) -> Vec<BombId> {
    let rolling: Vec<BombId> = state
        .bombs
        .values()
        .filter(|b| b.moving.is_some() && !b.exploded)
        .map(|b| b.id.clone())
        .collect();

    let interval = config.bomb_roll_interval_ms.max(1);
    let mut changed = Vec::new();

    for bomb_id in rolling {
        let mut moved = false;
        loop {
            let Some(bomb) = state.bombs.get(&bomb_id) else { break };
            let Some(dir) = bomb.moving else { break };
            if now_ms.saturating_sub(bomb.last_roll_at) < interval {
                break;
            }

            let from = bomb.cell;
            let next = from.step(dir, 1);
            let free = state.grid.as_ref().is_some_and(|g| g.is_empty(next));

            if let Some(bomb) = state.bombs.get_mut(&bomb_id) {
                if free {
                    bomb.cell = next;
                    bomb.last_roll_at += interval;
                } else {
                    bomb.moving = None;
                }
            }

            if free {
                state.refresh_cell(from);
                state.refresh_cell(next);
            }
            moved = true;
        }

        if moved {
            if let Some(bomb) = state.bombs.get(&bomb_id) {
                let event = GameEvent::bomb_moved(now_ms, bomb_id.clone(), bomb.cell, bomb.moving);
                state.push_event(event);
            }
            changed.push(bomb_id);
        }
    }

    changed
}

/// Ease every player's continuous position toward their cell.
pub fn interpolate_positions(state: &mut MatchState, dt_secs: f32, config: &MatchConfig) {
    let factor = 1.0 - (-config.interpolation_rate * dt_secs.max(0.0)).exp();

    for player in state.players.values_mut() {
        let tx = player.cell.x as f32;
        let ty = player.cell.y as f32;
        let dx = tx - player.position.x;
        let dy = ty - player.position.y;

        if dx.abs() < 0.01 && dy.abs() < 0.01 {
            player.position.x = tx;
            player.position.y = ty;
        } else {
            player.position.x += dx * factor;
            player.position.y += dy * factor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{BombState, PlayerState};

    fn open_state() -> (MatchState, PlayerId) {
        let mut grid = Grid::new(9, 9);
        for (cell, _) in grid.clone().iter() {
            if cell.x == 0 || cell.y == 0 || cell.x == 8 || cell.y == 8 {
                grid.set(cell, GridCell::Wall);
            }
        }
        let mut state = MatchState::with_grid("ROOM", grid);
        let id = PlayerId::new("p1");
        state.add_player(PlayerState::new(id.clone(), "p1", Cell::new(4, 4), 0));
        (state, id)
    }

    fn plant(state: &mut MatchState, id: &str, owner: &PlayerId, cell: Cell) -> BombId {
        let bomb_id = BombId::new(id);
        state.bombs.insert(bomb_id.clone(), BombState::new(bomb_id.clone(), owner.clone(), cell, 1, 0, 3000));
        state.refresh_cell(cell);
        bomb_id
    }

    #[test]
    fn test_move_interval_shrinks_with_speed() {
        let config = MatchConfig::default();
        assert_eq!(move_interval_ms(1, &config), 180);
        assert_eq!(move_interval_ms(2, &config), 160);
        assert!(move_interval_ms(6, &config) < move_interval_ms(5, &config));
        assert_eq!(move_interval_ms(200, &config), config.min_move_interval_ms);
    }

    #[test]
    fn test_move_into_open_cell() {
        let (mut state, id) = open_state();
        let config = MatchConfig::default();
        let outcome = try_move(&mut state, &id, Direction::Right, 1000, &config).unwrap();
        assert_eq!(outcome, MoveOutcome::Moved(Cell::new(5, 4)));
        assert_eq!(state.players[&id].cell, Cell::new(5, 4));
    }

    #[test]
    fn test_move_rate_limited() {
        let (mut state, id) = open_state();
        let config = MatchConfig::default();
        try_move(&mut state, &id, Direction::Right, 1000, &config).unwrap();
        let outcome = try_move(&mut state, &id, Direction::Right, 1050, &config).unwrap();
        assert_eq!(outcome, MoveOutcome::TooSoon);
        let outcome = try_move(&mut state, &id, Direction::Right, 1180, &config).unwrap();
        assert_eq!(outcome, MoveOutcome::Moved(Cell::new(6, 4)));
    }

    #[test]
    fn test_move_blocked_by_wall_and_crate() {
        let (mut state, id) = open_state();
        let config = MatchConfig::default();
        state.get_player_mut(&id).unwrap().cell = Cell::new(1, 1);
        assert_eq!(try_move(&mut state, &id, Direction::Up, 0, &config).unwrap(), MoveOutcome::Blocked);

        state.grid.as_mut().unwrap().set(Cell::new(2, 1), GridCell::Destructible);
        assert_eq!(try_move(&mut state, &id, Direction::Right, 0, &config).unwrap(), MoveOutcome::Blocked);
        assert_eq!(state.players[&id].cell, Cell::new(1, 1));
    }

    #[test]
    fn test_dead_player_cannot_move() {
        let (mut state, id) = open_state();
        state.get_player_mut(&id).unwrap().alive = false;
        let result = try_move(&mut state, &id, Direction::Left, 0, &MatchConfig::default());
        assert!(matches!(result, Err(ActionError::PlayerDead)));
    }

    #[test]
    fn test_bomb_blocks_without_kick() {
        let (mut state, id) = open_state();
        plant(&mut state, "b1", &id, Cell::new(5, 4));
        let outcome = try_move(&mut state, &id, Direction::Right, 0, &MatchConfig::default()).unwrap();
        assert_eq!(outcome, MoveOutcome::Blocked);
    }

    #[test]
    fn test_kick_rolls_until_blocked() {
        let (mut state, id) = open_state();
        let config = MatchConfig::default();
        state.get_player_mut(&id).unwrap().can_kick = true;
        let bomb_id = plant(&mut state, "b1", &id, Cell::new(5, 4));

        let outcome = try_move(&mut state, &id, Direction::Right, 0, &config).unwrap();
        assert_eq!(outcome, MoveOutcome::Kicked(bomb_id.clone()));
        assert_eq!(state.players[&id].cell, Cell::new(4, 4));

        // Wall at x=8, so the bomb comes to rest at x=7
        advance_rolling_bombs(&mut state, 10 * config.bomb_roll_interval_ms, &config);
        let bomb = &state.bombs[&bomb_id];
        assert_eq!(bomb.cell, Cell::new(7, 4));
        assert_eq!(bomb.moving, None);
        assert_eq!(state.cell_at(Cell::new(7, 4)), Some(GridCell::BombOccupied));
        assert_eq!(state.cell_at(Cell::new(5, 4)), Some(GridCell::Empty));
    }

    #[test]
    fn test_rolling_is_one_cell_per_interval() {
        let (mut state, id) = open_state();
        let config = MatchConfig::default();
        let bomb_id = plant(&mut state, "b1", &id, Cell::new(2, 2));
        assert!(kick_bomb(&mut state, &bomb_id, &id, Direction::Down, 0));

        advance_rolling_bombs(&mut state, config.bomb_roll_interval_ms, &config);
        assert_eq!(state.bombs[&bomb_id].cell, Cell::new(2, 3));
        assert!(state.bombs[&bomb_id].moving.is_some());
    }

    #[test]
    fn test_kick_against_wall_does_nothing() {
        let (mut state, id) = open_state();
        let bomb_id = plant(&mut state, "b1", &id, Cell::new(7, 4));
        assert!(!kick_bomb(&mut state, &bomb_id, &id, Direction::Right, 0));
        assert_eq!(state.bombs[&bomb_id].moving, None);
    }

    #[test]
    fn test_slide_destination() {
        let (state, _) = open_state();
        let grid = state.grid.as_ref().unwrap();
        assert_eq!(slide_destination(grid, Cell::new(4, 4), Direction::Left), Cell::new(1, 4));
        assert_eq!(slide_destination(grid, Cell::new(1, 4), Direction::Left), Cell::new(1, 4));
    }

    #[test]
    fn test_interpolation_converges() {
        let (mut state, id) = open_state();
        let config = MatchConfig::default();
        state.get_player_mut(&id).unwrap().cell = Cell::new(5, 4);

        interpolate_positions(&mut state, 1.0 / 60.0, &config);
        let x = state.players[&id].position.x;
        assert!(x > 4.0 && x < 5.0);

        for _ in 0..120 {
            interpolate_positions(&mut state, 1.0 / 60.0, &config);
        }
        assert_eq!(state.players[&id].position.x, 5.0);
    }
}
