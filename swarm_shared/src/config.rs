//! Configuration system.
//!
//! Loads swarm configuration from JSON strings (file IO left to the app).
//! Every field has a default, so a partial JSON document is a valid config.

use std::{f64::consts::PI, time::Duration};

use anyhow::ensure;
use serde::{Deserialize, Serialize};

/// Inclusive-exclusive sampling range `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
}

impl ParamRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn is_positive(&self) -> bool {
        self.min > 0.0 && self.max >= self.min
    }
}

/// How the initial distance from the arena centre is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RadialSampling {
    /// `u * r_max`: denser towards the centre. Matches the reference load profile.
    #[default]
    Linear,
    /// `sqrt(u) * r_max`: uniform density over the disk.
    UniformArea,
}

/// Steering constants applied on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringConfig {
    /// Half-width of the random target heading nudge, radians.
    pub jitter: f64,
    /// Fraction of the centre-ward correction applied per tick outside the boundary.
    pub boundary_pull: f64,
    /// Gain of the first-order heading filter.
    pub gain: f64,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            jitter: 0.5,
            boundary_pull: 0.1,
            gain: 5.0,
        }
    }
}

/// Connection-layer policy for the hub client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubPolicy {
    pub keep_alive_ms: u64,
    pub server_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    /// Consecutive failed attempts before the client gives up.
    pub max_attempts: u32,
    /// Outbound frames buffered between the engine and the socket task.
    pub outbound_capacity: usize,
}

impl Default for HubPolicy {
    fn default() -> Self {
        Self {
            keep_alive_ms: 10_000,
            server_timeout_ms: 30_000,
            reconnect_interval_ms: 5_000,
            max_attempts: 5,
            outbound_capacity: 256,
        }
    }
}

impl HubPolicy {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Root configuration of a swarm run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Coordinator hub endpoint, e.g. `http://localhost:5241/gamehub`.
    #[serde(default = "default_hub_url")]
    pub hub_url: String,
    #[serde(default = "default_bot_count")]
    pub bot_count: usize,
    #[serde(default = "default_arena_diameter")]
    pub arena_diameter: f64,
    /// Per-bot linear speed, units per second.
    #[serde(default = "default_speed")]
    pub speed: ParamRange,
    /// Per-bot turn rate scaling.
    #[serde(default = "default_turn_rate")]
    pub turn_rate: ParamRange,
    #[serde(default)]
    pub radial_sampling: RadialSampling,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    #[serde(default)]
    pub steering: SteeringConfig,
    /// Kinematic tick rate; the timestep is `1 / tick_hz`.
    #[serde(default = "default_hz")]
    pub tick_hz: u32,
    /// Position sync rate.
    #[serde(default = "default_hz")]
    pub sync_hz: u32,
    /// Serialized-size budget of the records in one outbound batch. The
    /// invocation envelope around them is not counted.
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Period of the stats log line; 0 disables it.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    /// Fixed seed for reproducible populations and wandering.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub hub: HubPolicy,
}

fn default_hub_url() -> String {
    "http://localhost:5241/gamehub".to_string()
}

fn default_bot_count() -> usize {
    2000
}

fn default_arena_diameter() -> f64 {
    500.0
}

fn default_speed() -> ParamRange {
    ParamRange::new(3.0, 8.0)
}

fn default_turn_rate() -> ParamRange {
    ParamRange::new(0.05, 0.2)
}

fn default_id_prefix() -> String {
    "bot_".to_string()
}

fn default_hz() -> u32 {
    10
}

fn default_max_batch_bytes() -> usize {
    30_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_stats_interval_secs() -> u64 {
    10
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            hub_url: default_hub_url(),
            bot_count: default_bot_count(),
            arena_diameter: default_arena_diameter(),
            speed: default_speed(),
            turn_rate: default_turn_rate(),
            radial_sampling: RadialSampling::default(),
            id_prefix: default_id_prefix(),
            steering: SteeringConfig::default(),
            tick_hz: default_hz(),
            sync_hz: default_hz(),
            max_batch_bytes: default_max_batch_bytes(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            stats_interval_secs: default_stats_interval_secs(),
            seed: None,
            hub: HubPolicy::default(),
        }
    }
}

impl SwarmConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Rejects values the simulation cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.bot_count > 0, "bot_count must be > 0");
        ensure!(
            self.arena_diameter.is_finite() && self.arena_diameter > 0.0,
            "arena_diameter must be a positive number"
        );
        ensure!(
            self.speed.is_positive(),
            "speed range must be positive with min <= max, got {:?}",
            self.speed
        );
        ensure!(
            self.turn_rate.is_positive(),
            "turn_rate range must be positive with min <= max, got {:?}",
            self.turn_rate
        );
        ensure!(
            self.steering.jitter.is_finite() && (0.0..=PI).contains(&self.steering.jitter),
            "steering.jitter must be within [0, pi], got {}",
            self.steering.jitter
        );
        ensure!(
            (0.0..=1.0).contains(&self.steering.boundary_pull),
            "steering.boundary_pull must be within [0, 1], got {}",
            self.steering.boundary_pull
        );
        ensure!(
            self.steering.gain.is_finite() && self.steering.gain >= 0.0,
            "steering.gain must be a non-negative number, got {}",
            self.steering.gain
        );
        ensure!(self.tick_hz > 0, "tick_hz must be > 0");
        ensure!(self.sync_hz > 0, "sync_hz must be > 0");
        ensure!(self.max_batch_bytes > 0, "max_batch_bytes must be > 0");
        ensure!(
            self.handshake_timeout_ms > 0,
            "handshake_timeout_ms must be > 0"
        );
        ensure!(
            self.hub.outbound_capacity > 0,
            "hub.outbound_capacity must be > 0"
        );
        Ok(())
    }

    /// Distance from the centre past which bots steer back.
    pub fn arena_radius(&self) -> f64 {
        self.arena_diameter / 2.0
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz))
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.sync_hz))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}
