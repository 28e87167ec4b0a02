//! Bomb Arena Demo
//!
//! Runs a two-player match entirely in-process: one shared in-memory store,
//! a room directory, and a participant per player ticking on a simulated
//! clock. Pass a JSON config path as the first argument to override defaults.

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bomb_arena::{
    ArenaConfig, InputFrame, MatchParticipant, PlayerId, RoomDirectory, VERSION,
    core::hash::short_hex,
    game::{events::{GameEvent, GameEventData}, grid::Direction},
    network::InMemoryStore,
};

/// Simulated frame length (ms)
const FRAME_MS: u64 = 16;

/// How often each participant heartbeats (ms)
const HEARTBEAT_MS: u64 = 1000;

const DIRECTIONS: [Direction; 4] = [Direction::Right, Direction::Down, Direction::Left, Direction::Up];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ArenaConfig::from_json_file(&path).with_context(|| format!("loading {}", path))?,
        None => ArenaConfig::default(),
    };

    info!("Bomb Arena v{}", VERSION);
    demo_match(config).await
}

/// Scripted input: wander, and drop a bomb every few seconds.
fn scripted_input(player_index: usize, elapsed_ms: u64) -> InputFrame {
    let phase = (elapsed_ms / 1200) as usize + player_index;
    let mut input = InputFrame::with_movement(DIRECTIONS[phase % DIRECTIONS.len()]);
    let bomb_period = 3500 + player_index as u64 * 700;
    input.set_place_bomb(elapsed_ms % bomb_period < FRAME_MS);
    input
}

async fn demo_match(config: ArenaConfig) -> Result<()> {
    info!("=== Setting Up Room ===");

    let store = InMemoryStore::new();
    let directory = RoomDirectory::new(config.room.clone());
    let epoch = chrono::Utc::now();
    let start_ms = epoch.timestamp_millis().max(0) as u64;

    let alice = PlayerId::new("alice");
    let bob = PlayerId::new("bob");

    let (code, room) = directory.create_room(alice.clone(), "alice", start_ms).await;
    directory.join(&code, bob.clone(), "bob", start_ms).await?;
    info!(room = %code, "Room ready");

    let (state, match_config) = {
        let mut room = room.write().await;
        room.set_ready(&alice, true)?;
        room.set_ready(&bob, true)?;
        let match_config = config.match_config(room.settings());
        (room.start(&alice, start_ms)?, match_config)
    };

    if let Some(grid) = &state.grid {
        info!(
            width = grid.width(),
            height = grid.height(),
            fingerprint = %short_hex(&grid.fingerprint()),
            "Map generated"
        );
    }

    let mut host = MatchParticipant::new(store.connect(), code.as_str(), alice.clone(), match_config.clone(), config.sync.clone());
    let mut guest = MatchParticipant::new(store.connect(), code.as_str(), bob.clone(), match_config, config.sync.clone());

    {
        let room = room.read().await;
        for (participant, id) in [(&host, &alice), (&guest, &bob)] {
            if let Some(slot) = room.player(id) {
                participant.announce(slot)?;
            }
        }
    }
    host.start_as_host(state)?;
    guest.join_match()?;

    info!("=== Running Match ===");
    let max_ms = (config.room.match_duration_secs as u64 * 1000) + config.room.end_dwell_ms + 1000;
    let mut elapsed = 0;
    let mut next_heartbeat = 0;
    let mut end = None;

    while elapsed <= max_ms {
        let now = start_ms + elapsed;

        for (index, participant) in [&mut host, &mut guest].into_iter().enumerate() {
            let frame = participant.tick(scripted_input(index, elapsed), now)?;
            if frame.failed_writes > 0 {
                warn!(player = %participant.player_id(), failed = frame.failed_writes, "Writes failed");
            }
            if index != 0 {
                continue;
            }
            for event in &frame.tick.events {
                match &event.data {
                    GameEventData::PlayerEliminated { victim_id, killer_id, .. } => {
                        info!(victim = %victim_id, killer = ?killer_id, elapsed, "Player eliminated");
                    }
                    GameEventData::PowerUpCollected { player_id, kind, .. } => {
                        info!(player = %player_id, ?kind, "Power-up collected");
                    }
                    _ => {}
                }
            }
        }

        if elapsed >= next_heartbeat {
            next_heartbeat += HEARTBEAT_MS;
            let mut room = room.write().await;
            for participant in [&host, &guest] {
                if let Some(slot) = room.player(participant.player_id()) {
                    if let Err(e) = participant.reannounce_if_missing(slot) {
                        warn!(error = %e, "Re-announce failed");
                    }
                }
                if let Err(e) = participant.heartbeat(now) {
                    warn!(error = %e, "Heartbeat failed");
                }
                room.heartbeat(participant.player_id(), now)?;
            }
            let swept = room.sweep_disconnected(now, config.room.disconnect_timeout_ms);
            if let Err(e) = host.forfeit_players(&swept, now) {
                warn!(error = %e, "Forfeit publish failed");
            }
        }

        if let Some(reason) = host.evaluate_end(&mut *room.write().await, now) {
            end = Some((reason, now));
            break;
        }

        elapsed += FRAME_MS;
    }

    info!("=== Match Results ===");
    let Some((reason, now)) = end else {
        warn!("Demo ran out of time without an end condition");
        return Ok(());
    };

    host.teardown();
    guest.teardown();

    let engine = host.engine().context("host engine missing")?;
    let mut room = room.write().await;
    let results = room.finish(engine.state(), reason, now)?.clone();

    let ended = GameEvent::match_ended(now, results.winner.clone(), results.reason);
    info!(event = %serde_json::to_string(&ended.data)?, "Match over");
    for placement in &results.placements {
        info!("#{}: {} - kills: {}", placement.place, placement.player_id, placement.kills);
    }
    info!(
        state_hash = %short_hex(&engine.state().compute_hash()),
        finished = %(epoch + chrono::Duration::milliseconds((now - start_ms) as i64)).to_rfc3339(),
        "Final state"
    );

    room.replay(&alice)?;
    host.reset_for_replay()?;
    guest.reset_for_replay()?;
    info!(room = %code, status = ?room.status(), players = room.player_count(), "Room reset");
    Ok(())
}
