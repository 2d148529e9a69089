//! `swarm_shared`
//!
//! Libraries shared by the load generator and its test harness.
//!
//! Design goals:
//! - Deterministic where practical: every random draw goes through an injected `Rng`.
//! - Clear separation of concerns (population, kinematics, chunking, wire, link).
//! - The hub connection sits behind a trait so the engine never sees the transport.
//! - No `unsafe`.

pub mod bot;
pub mod chunk;
pub mod config;
pub mod hub;
pub mod kinematics;
pub mod math;
pub mod net;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::bot::*;
    pub use crate::chunk::*;
    pub use crate::config::*;
    pub use crate::hub::{HubClient, HubConnection, LinkState};
    pub use crate::math::*;
    pub use crate::net::{BotRecord, SYNC_METHOD};
}
