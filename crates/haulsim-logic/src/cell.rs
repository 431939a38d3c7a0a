//! Integer grid cells.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A discrete world cell. Ordered x, then y, then z.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// One of the three grid axes. Declaration order is the tie-break order
/// used by the greedy step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

impl Cell {
    pub const ORIGIN: Self = Self { x: 0, y: 0, z: 0 };

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// Move one unit along `axis` in the direction of `sign` (its signum).
    pub fn step(&self, axis: Axis, sign: i32) -> Self {
        let s = sign.signum();
        match axis {
            Axis::X => self.offset(s, 0, 0),
            Axis::Y => self.offset(0, s, 0),
            Axis::Z => self.offset(0, 0, s),
        }
    }

    /// Component of `other - self` along `axis`.
    pub fn delta(&self, other: &Self, axis: Axis) -> i32 {
        match axis {
            Axis::X => other.x - self.x,
            Axis::Y => other.y - self.y,
            Axis::Z => other.z - self.z,
        }
    }

    pub fn distance_squared(&self, other: &Self) -> i64 {
        let dx = (other.x - self.x) as i64;
        let dy = (other.y - self.y) as i64;
        let dz = (other.z - self.z) as i64;
        dx * dx + dy * dy + dz * dz
    }

    pub fn distance(&self, other: &Self) -> f32 {
        (self.distance_squared(other) as f64).sqrt() as f32
    }

    /// True if `other` is one of the 26 cells surrounding `self`.
    pub fn is_adjacent(&self, other: &Self) -> bool {
        self != other
            && (self.x - other.x).abs() <= 1
            && (self.y - other.y).abs() <= 1
            && (self.z - other.z).abs() <= 1
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}
