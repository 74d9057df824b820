//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! Positions live in world units (pixels); grid coordinates are integer cells.

use serde::{Deserialize, Serialize};

/// 2D vector in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Moves toward `to` by at most `max_step` on each axis independently.
    ///
    /// An axis whose remaining distance is within `max_step` lands exactly on
    /// the target value, so repeated calls never overshoot or oscillate.
    pub fn step_toward(self, to: Self, max_step: f32) -> Self {
        Self::new(
            approach(self.x, to.x, max_step),
            approach(self.y, to.y, max_step),
        )
    }

    /// Converts a world position into the grid cell containing it (rounded up).
    pub fn to_grid(self, cell_size: f32) -> GridPos {
        GridPos::new(
            (self.x / cell_size).ceil() as i32,
            (self.y / cell_size).ceil() as i32,
        )
    }
}

fn approach(from: f32, to: f32, max_step: f32) -> f32 {
    let remaining = to - from;
    if remaining.abs() <= max_step {
        to
    } else {
        from + max_step.copysign(remaining)
    }
}

/// Integer grid coordinate, as exchanged with the simulation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// World position of this cell's origin.
    pub fn to_world(self, cell_size: f32) -> Vec2 {
        Vec2::new(self.x as f32 * cell_size, self.y as f32 * cell_size)
    }
}

impl From<(i32, i32)> for GridPos {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}
