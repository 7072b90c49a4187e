//! Deterministic movement simulation shared by client prediction and the
//! authoritative server
//!
//! Both sides step a [`MovementState`] with the same [`MovementModel`] and the
//! same fixed timestep, so replaying a buffered input on the client yields
//! bit-identical results to the server applying it.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::geometry::Bounds;
use crate::protocol::MovementInput;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MovementState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub grounded: bool,
}

impl MovementState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            grounded: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementParams {
    pub move_speed: f32,
    pub dash_multiplier: f32,
    pub jump_velocity: f32,
    pub gravity: f32,
    pub ground_height: f32,
}

impl Default for MovementParams {
    fn default() -> Self {
        Self {
            move_speed: 7.0,
            dash_multiplier: 1.6,
            jump_velocity: 8.0,
            gravity: 20.0,
            ground_height: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MovementModel {
    pub params: MovementParams,
    pub bounds: Bounds,
}

impl MovementModel {
    pub fn new(params: MovementParams, bounds: Bounds) -> Self {
        Self { params, bounds }
    }

    /// Fastest horizontal speed a legitimate input can produce
    pub fn max_ground_speed(&self) -> f32 {
        self.params.move_speed * self.params.dash_multiplier.max(1.0)
    }

    /// Fastest a legitimate input can move an entity, a dashing jump
    pub fn max_speed(&self) -> f32 {
        self.max_ground_speed().hypot(self.params.jump_velocity.max(0.0))
    }

    /// Advances `state` by one input over `dt` seconds
    pub fn step(&self, state: &MovementState, input: &MovementInput, dt: f32) -> MovementState {
        let p = &self.params;
        let direction = sanitize_direction(input.move_vector);

        let speed = if input.dash_pressed {
            p.move_speed * p.dash_multiplier
        } else {
            p.move_speed
        };

        let mut velocity = Vec3::new(direction.x * speed, state.velocity.y, direction.y * speed);
        let mut grounded = state.grounded;

        if input.jump_pressed && grounded {
            velocity.y = p.jump_velocity;
            grounded = false;
        }

        if !grounded {
            velocity.y -= p.gravity * dt;
        }

        let mut position = state.position + velocity * dt;

        if position.y <= p.ground_height {
            position.y = p.ground_height;
            if velocity.y < 0.0 {
                velocity.y = 0.0;
            }
            grounded = true;
        }

        let clamped = self.bounds.clamp(position);
        if clamped.x != position.x {
            velocity.x = 0.0;
        }
        if clamped.z != position.z {
            velocity.z = 0.0;
        }
        if clamped.y != position.y {
            velocity.y = 0.0;
        }

        MovementState {
            position: clamped,
            velocity,
            grounded,
        }
    }
}

/// Non-finite components become zero and the magnitude is capped at 1
fn sanitize_direction(direction: Vec2) -> Vec2 {
    if !direction.is_finite() {
        return Vec2::ZERO;
    }
    direction.clamp_length_max(1.0)
}
