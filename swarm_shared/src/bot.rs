//! Bot population.
//!
//! A bot is plain data: identity, planar position, heading and fixed motion
//! parameters. Behaviour lives in [`crate::kinematics`].

use std::collections::HashSet;
use std::f64::consts::TAU;

use anyhow::bail;
use rand::Rng;

use crate::{
    config::{ParamRange, RadialSampling, SwarmConfig},
    math::{wrap_angle, Vec3},
    net::BotRecord,
};

/// One simulated agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Bot {
    id: String,
    pub(crate) x: f64,
    pub(crate) z: f64,
    pub(crate) heading: f64,
    pub(crate) target_heading: f64,
    speed: f64,
    turn_rate: f64,
}

impl Bot {
    /// Builds a bot from explicit state. Angles are wrapped into $(-\pi, \pi]$.
    pub fn new(
        id: impl Into<String>,
        position: Vec3,
        heading: f64,
        target_heading: f64,
        speed: f64,
        turn_rate: f64,
    ) -> Self {
        Self {
            id: id.into(),
            x: position.x,
            z: position.z,
            heading: wrap_angle(heading),
            target_heading: wrap_angle(target_heading),
            speed,
            turn_rate,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current position; `y` is always zero.
    pub fn position(&self) -> Vec3 {
        Vec3::planar(self.x, self.z)
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn target_heading(&self) -> f64 {
        self.target_heading
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn turn_rate(&self) -> f64 {
        self.turn_rate
    }

    /// Wire snapshot of this bot.
    pub fn record(&self) -> BotRecord {
        BotRecord {
            id: self.id.clone(),
            x: self.x,
            y: 0.0,
            z: self.z,
        }
    }
}

/// Ordered, fixed-size set of bots.
#[derive(Debug, Clone, Default)]
pub struct Population {
    bots: Vec<Bot>,
}

impl Population {
    /// Spawns `cfg.bot_count` bots with randomized state inside the arena disk.
    pub fn create<R: Rng + ?Sized>(cfg: &SwarmConfig, rng: &mut R) -> Self {
        let max_radius = cfg.arena_radius();
        let bots = (0..cfg.bot_count)
            .map(|i| {
                let u: f64 = rng.gen();
                let radius = match cfg.radial_sampling {
                    RadialSampling::Linear => u * max_radius,
                    RadialSampling::UniformArea => u.sqrt() * max_radius,
                };
                let theta = rng.gen::<f64>() * TAU;
                let heading = rng.gen::<f64>() * TAU;
                let speed = sample(rng, cfg.speed);
                let turn_rate = sample(rng, cfg.turn_rate);
                let target_heading = rng.gen::<f64>() * TAU;

                Bot::new(
                    format!("{}{}", cfg.id_prefix, i + 1),
                    Vec3::planar(radius * theta.cos(), radius * theta.sin()),
                    heading,
                    target_heading,
                    speed,
                    turn_rate,
                )
            })
            .collect();
        Self { bots }
    }

    /// Wraps explicit bots. Ids must be unique.
    pub fn from_bots(bots: Vec<Bot>) -> anyhow::Result<Self> {
        let mut seen = HashSet::with_capacity(bots.len());
        for bot in &bots {
            if !seen.insert(bot.id()) {
                bail!("duplicate bot id {:?}", bot.id());
            }
        }
        Ok(Self { bots })
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bot> {
        self.bots.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Bot> {
        self.bots.iter_mut()
    }

    /// Wire records of every bot, in population order.
    pub fn snapshot(&self) -> Vec<BotRecord> {
        self.bots.iter().map(Bot::record).collect()
    }
}

fn sample<R: Rng + ?Sized>(rng: &mut R, range: ParamRange) -> f64 {
    if range.max > range.min {
        rng.gen_range(range.min..range.max)
    } else {
        range.min
    }
}
