//! `swarm_client`
//!
//! The load generator:
//! - Bot population simulation at a fixed tick rate
//! - Chunked position sync to the coordinator hub at its own rate
//! - Hub connection bootstrap with a bounded handshake wait
//!
//! Scheduling model:
//! - One task, two fixed-rate clocks (tick, sync), cooperative
//! - The loop sleeps until the earliest due time

pub mod engine;
pub mod schedule;

pub use engine::{EngineStats, SimulationEngine, SyncReport};
