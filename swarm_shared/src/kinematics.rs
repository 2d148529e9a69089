//! Per-tick kinematic update.
//!
//! Each bot wanders by nudging its target heading at random, steers back
//! towards the centre while outside the arena radius, and turns towards the
//! target heading through a first-order filter rather than snapping to it.
//! A bot may briefly overshoot the boundary while it turns back.

use rand::Rng;

use crate::{
    bot::{Bot, Population},
    config::SteeringConfig,
    math::{angle_diff, wrap_angle},
};

/// Fixed parameters of one kinematic step.
#[derive(Debug, Clone, Copy)]
pub struct StepParams {
    pub arena_radius: f64,
    pub dt: f64,
    pub steering: SteeringConfig,
}

/// Advances one bot by `params.dt`.
pub fn step_bot<R: Rng + ?Sized>(bot: &mut Bot, params: &StepParams, rng: &mut R) {
    let steering = &params.steering;

    if steering.jitter > 0.0 {
        bot.target_heading += rng.gen_range(-steering.jitter..=steering.jitter);
    }

    let position = bot.position();
    let radius = params.arena_radius;
    if position.len_sq() > radius * radius {
        let correction = angle_diff(position.heading_to_origin(), bot.target_heading);
        bot.target_heading += correction * steering.boundary_pull;
    }
    bot.target_heading = wrap_angle(bot.target_heading);

    let turn = angle_diff(bot.target_heading, bot.heading);
    bot.heading = wrap_angle(bot.heading + turn * bot.turn_rate() * params.dt * steering.gain);

    let travel = bot.speed() * params.dt;
    bot.x += bot.heading.cos() * travel;
    bot.z += bot.heading.sin() * travel;
}

/// Advances every bot in population order.
pub fn step_population<R: Rng + ?Sized>(
    population: &mut Population,
    params: &StepParams,
    rng: &mut R,
) {
    for bot in population.iter_mut() {
        step_bot(bot, params, rng);
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{config::SwarmConfig, math::Vec3};

    fn params(jitter: f64) -> StepParams {
        StepParams {
            arena_radius: 250.0,
            dt: 0.1,
            steering: SteeringConfig {
                jitter,
                ..Default::default()
            },
        }
    }

    fn in_range(a: f64) -> bool {
        a > -PI && a <= PI
    }

    #[test]
    fn angles_stay_wrapped_over_many_ticks() {
        let cfg = SwarmConfig {
            bot_count: 200,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let mut pop = Population::create(&cfg, &mut rng);
        let p = params(0.5);

        for _ in 0..500 {
            step_population(&mut pop, &p, &mut rng);
            for bot in pop.iter() {
                assert!(in_range(bot.heading()), "heading {}", bot.heading());
                assert!(in_range(bot.target_heading()), "target {}", bot.target_heading());
            }
        }
    }

    #[test]
    fn bots_stay_near_the_arena() {
        let cfg = SwarmConfig {
            bot_count: 100,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        let mut pop = Population::create(&cfg, &mut rng);
        let p = params(0.5);

        for _ in 0..3000 {
            step_population(&mut pop, &p, &mut rng);
        }
        // Soft boundary: overshoot is allowed but bounded.
        let limit = 2.0 * p.arena_radius;
        for bot in pop.iter() {
            assert!(bot.position().len_sq() < limit * limit, "{} escaped", bot.id());
        }
    }

    #[test]
    fn outside_bot_turns_target_towards_centre() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = params(0.0);
        // Facing straight away from the centre at twice the radius.
        let mut bot = Bot::new(
            "far",
            Vec3::planar(2.0 * p.arena_radius, 0.0),
            0.0,
            0.0,
            5.0,
            0.1,
        );

        let home = bot.position().heading_to_origin();
        let before = angle_diff(home, bot.target_heading()).abs();
        step_bot(&mut bot, &p, &mut rng);
        let after = angle_diff(bot.position().heading_to_origin(), bot.target_heading()).abs();

        assert!(after < before, "gap {before} -> {after}");
        assert!(before - after > 0.1);
    }

    #[test]
    fn boundary_correction_is_monotonic() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = params(0.0);
        let mut bot = Bot::new(
            "slow",
            Vec3::planar(0.0, 2.0 * p.arena_radius),
            PI / 2.0,
            PI / 2.0,
            1e-3,
            0.1,
        );

        let mut gap = angle_diff(bot.position().heading_to_origin(), bot.target_heading()).abs();
        for _ in 0..40 {
            step_bot(&mut bot, &p, &mut rng);
            let next = angle_diff(bot.position().heading_to_origin(), bot.target_heading()).abs();
            assert!(next <= gap + 1e-5, "gap grew {gap} -> {next}");
            gap = next;
        }
        assert!(gap < 0.1);
    }

    #[test]
    fn inside_bot_without_jitter_keeps_course() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = params(0.0);
        let mut bot = Bot::new("calm", Vec3::ZERO, 0.0, 0.0, 4.0, 0.1);

        step_bot(&mut bot, &p, &mut rng);

        assert_eq!(bot.heading(), 0.0);
        assert_eq!(bot.target_heading(), 0.0);
        assert!((bot.position().x - 0.4).abs() < 1e-6);
        assert_eq!(bot.position().z, 0.0);
    }

    #[test]
    fn heading_eases_towards_target() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = params(0.0);
        let mut bot = Bot::new("turner", Vec3::ZERO, 0.0, 1.0, 1.0, 0.2);

        step_bot(&mut bot, &p, &mut rng);

        // diff 1.0 * turn 0.2 * dt 0.1 * gain 5
        assert!((bot.heading() - 0.1).abs() < 1e-6);
    }
}
