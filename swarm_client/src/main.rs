//! Load generator binary.
//!
//! Usage:
//!   cargo run -p swarm_client -- [--config swarm.json] [--url http://localhost:5241/gamehub]
//!       [--bots 2000] [--tick-hz 10] [--sync-hz 10] [--max-bytes 30000] [--seed 42]
//!       [--duration 60]
//!
//! The client connects to the hub, then simulates the bot swarm and streams
//! position batches until the process is stopped (or `--duration` elapses).
//! Exits non-zero when the hub does not open within the handshake timeout.

use std::env;
use std::time::Duration;

use anyhow::Context;
use swarm_client::SimulationEngine;
use swarm_shared::{config::SwarmConfig, hub::HubClient};
use tracing::info;

struct Args {
    cfg: SwarmConfig,
    duration: Option<Duration>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            SwarmConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?
        }
        _ => SwarmConfig::default(),
    };
    let mut duration = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--url", Some(v)) => cfg.hub_url = v.clone(),
            ("--bots", Some(v)) => cfg.bot_count = v.parse().context("--bots")?,
            ("--tick-hz", Some(v)) => cfg.tick_hz = v.parse().context("--tick-hz")?,
            ("--sync-hz", Some(v)) => cfg.sync_hz = v.parse().context("--sync-hz")?,
            ("--max-bytes", Some(v)) => cfg.max_batch_bytes = v.parse().context("--max-bytes")?,
            ("--seed", Some(v)) => cfg.seed = Some(v.parse().context("--seed")?),
            ("--duration", Some(v)) => {
                duration = Some(Duration::from_secs(v.parse().context("--duration")?));
            }
            ("--config", Some(_)) => {}
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    Ok(Args { cfg, duration })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, duration } = parse_args()?;
    let hub = HubClient::new(&cfg.hub_url, cfg.hub);
    let mut engine = SimulationEngine::from_config(cfg, hub).context("build engine")?;

    let cfg = engine.config();
    info!(
        url = %cfg.hub_url,
        bots = cfg.bot_count,
        tick_hz = cfg.tick_hz,
        sync_hz = cfg.sync_hz,
        seed = ?cfg.seed,
        "Starting swarm"
    );
    engine.connect().await.context("connect to hub")?;

    match duration {
        Some(d) => engine.run_for(d).await,
        None => engine.run().await,
    }

    Ok(())
}
