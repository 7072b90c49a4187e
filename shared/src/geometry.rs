//! Map bounds and static obstacles used for movement clamping and line-of-sight

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned playable area of the map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn clamp(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: Vec3::new(-100.0, -10.0, -100.0),
            max: Vec3::new(100.0, 50.0, 100.0),
        }
    }
}

/// Solid axis-aligned box that blocks line of sight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub min: Vec3,
    pub max: Vec3,
}

impl Obstacle {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Slab test: does the segment `from -> to` pass through this box?
    pub fn intersects_segment(&self, from: Vec3, to: Vec3) -> bool {
        let dir = to - from;
        let mut t_min = 0.0f32;
        let mut t_max = 1.0f32;

        for axis in 0..3 {
            let origin = from[axis];
            let delta = dir[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);

            if delta.abs() < f32::EPSILON {
                if origin < lo || origin > hi {
                    return false;
                }
                continue;
            }

            let inv = 1.0 / delta;
            let mut t1 = (lo - origin) * inv;
            let mut t2 = (hi - origin) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }

            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return false;
            }
        }

        true
    }
}

/// Returns true when no obstacle blocks the straight line between two points
pub fn has_line_of_sight(obstacles: &[Obstacle], from: Vec3, to: Vec3) -> bool {
    !obstacles.iter().any(|o| o.intersects_segment(from, to))
}
