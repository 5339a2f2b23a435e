use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use towerlink::{TilePos, Way9};
use towerlink_client::{ClientConfig, ClientError, TowerClient, WorldSnapshot};

#[derive(Parser)]
#[command(name = "towerlink-bot")]
#[command(about = "Headless tower client")]
struct Args {
    #[arg(short, long, default_value_t = format!("127.0.0.1:{}", towerlink::DEFAULT_PORT))]
    server: String,

    #[arg(short, long, default_value = "towerbot")]
    nickname: String,

    #[arg(long, help = "Resume an existing session")]
    session_token: Option<String>,

    #[arg(long, default_value_t = 1000, help = "Heartbeat interval in ms")]
    heartbeat_ms: u64,

    #[arg(long, default_value_t = 10_000, help = "Request timeout in ms")]
    timeout_ms: u64,

    #[arg(long, default_value_t = 2, help = "Move requests allowed per turn")]
    moves_per_turn: u32,

    #[arg(long, help = "Wander around the floor on every turn")]
    auto_move: bool,

    #[arg(long, help = "Ask the server to play for this account")]
    ai_play: bool,
}

fn log_turn(snapshot: &WorldSnapshot) {
    if snapshot.turn % 10 != 0 {
        return;
    }
    let floor = snapshot
        .floor
        .as_ref()
        .map(|f| f.name.as_str())
        .unwrap_or("-");
    let (hp, sp) = snapshot
        .player
        .as_ref()
        .map(|p| (p.hp, p.sp))
        .unwrap_or_default();
    log::info!(
        "turn {} floor {} objects {} hp {} ({:+}) sp {} ({:+})",
        snapshot.turn,
        floor,
        snapshot.active_objs.len(),
        hp,
        snapshot.hp_diff,
        sp,
        snapshot.sp_diff
    );
}

/// First walkable direction, rotating the starting point with the turn so
/// the bot does not get stuck against a wall.
fn pick_direction(snapshot: &WorldSnapshot) -> Option<Way9> {
    let pos: TilePos = snapshot.player.as_ref()?.pos;
    let floor = snapshot.current_floor()?;
    let start = (snapshot.turn as usize) % Way9::ALL_MOVING.len();
    Way9::ALL_MOVING
        .iter()
        .cycle()
        .skip(start)
        .take(Way9::ALL_MOVING.len())
        .copied()
        .find(|dir| {
            let tile = floor.tile(pos.step(*dir));
            tile.is_known() && !tile.blocks_movement()
        })
}

async fn wander(client: &TowerClient) {
    let mut turns = client.connection().turns();
    while turns.changed().await.is_ok() {
        let snapshot = Arc::clone(&turns.borrow_and_update());
        let Some(dir) = pick_direction(&snapshot) else {
            continue;
        };
        match client.submit_move(dir).await {
            Ok(()) => {}
            Err(ClientError::WaitingRebirth | ClientError::RateLimited { .. }) => {}
            Err(e) if e.is_fatal() => break,
            Err(e) => log::warn!("Move {:?} failed: {}", dir, e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let auto_move = args.auto_move;

    let config = ClientConfig {
        nickname: args.nickname,
        session_token: args.session_token,
        heartbeat_interval: Duration::from_millis(args.heartbeat_ms),
        request_timeout: Duration::from_millis(args.timeout_ms),
        moves_per_turn: args.moves_per_turn,
        ai_play: args.ai_play,
        ..Default::default()
    };

    let client = TowerClient::connect(args.server.as_str(), config, Arc::new(log_turn)).await?;
    if let Some(session) = client.session() {
        log::info!(
            "Session {} ({}){}",
            session.session_id,
            session.nickname,
            if session.is_degraded() {
                " running with version mismatch"
            } else {
                ""
            }
        );
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, logging out");
            client.logout().await;
        }
        _ = client.closed() => {}
        _ = async {
            if auto_move {
                wander(&client).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {}
    }

    let stats = client.jitter_stats();
    log::info!(
        "ping {:?} jitter server {:?} client {:?} heartbeats {}",
        stats.ping,
        stats.server_jitter,
        stats.client_jitter,
        stats.heartbeats
    );
    Ok(())
}
