//! Math helpers.
//!
//! This module intentionally stays small and deterministic.
//! Angles are plain `f64` radians; planar motion happens on the x/z plane.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

/// 3D vector. The simulation only moves along x/z; `y` is the unused up axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Point on the ground plane (`y = 0`).
    pub const fn planar(x: f64, z: f64) -> Self {
        Self { x, y: 0.0, z }
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f64 {
        self.dot(self)
    }

    /// Heading (radians) pointing from `self` back to the origin on the x/z plane.
    pub fn heading_to_origin(self) -> f64 {
        (-self.z).atan2(-self.x)
    }
}

/// Wraps an angle into $(-\pi, \pi]$ by repeated whole turns.
///
/// Non-finite input is returned as-is.
pub fn wrap_angle(mut angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    while angle > PI {
        angle -= TAU;
    }
    while angle <= -PI {
        angle += TAU;
    }
    angle
}

/// Shortest signed turn from `from` to `to`, in $(-\pi, \pi]$.
pub fn angle_diff(to: f64, from: f64) -> f64 {
    wrap_angle(to - from)
}
