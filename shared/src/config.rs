//! Runtime configuration for server and client
//!
//! Every field has a default so a TOML file only needs to name the values it
//! overrides:
//!
//! ```toml
//! tick_rate = 60
//!
//! [anti_cheat]
//! max_suspicion_before_kick = 3
//!
//! [[abilities]]
//! name = "fireball"
//! cooldown = 4.0
//! resource_cost = 30.0
//! range = 12.0
//! damage = 35.0
//! shape = { sphere = { radius = 2.5 } }
//! ```

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::geometry::{Bounds, Obstacle};
use crate::movement::{MovementModel, MovementParams};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetcodeConfig {
    /// Fixed simulation rate in Hz
    pub tick_rate: u32,
    /// Seconds between world-state broadcasts
    pub snapshot_interval: f64,
    /// Per-entity snapshot ring buffer capacity
    pub max_snapshot_history: usize,
    /// Snapshots older than this (seconds) are evicted
    pub history_max_age: f64,
    pub movement: MovementParams,
    pub lag_compensation: LagCompensationConfig,
    pub input: InputValidationConfig,
    pub prediction: PredictionConfig,
    pub rate_limit: RateLimitConfig,
    pub anti_cheat: AntiCheatConfig,
    pub reconnect: ReconnectConfig,
    pub world: WorldConfig,
    pub abilities: Vec<AbilityDefinition>,
}

impl Default for NetcodeConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            snapshot_interval: 0.05,
            max_snapshot_history: 128,
            history_max_age: 1.0,
            movement: MovementParams::default(),
            lag_compensation: LagCompensationConfig::default(),
            input: InputValidationConfig::default(),
            prediction: PredictionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            anti_cheat: AntiCheatConfig::default(),
            reconnect: ReconnectConfig::default(),
            world: WorldConfig::default(),
            abilities: default_abilities(),
        }
    }
}

impl NetcodeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: NetcodeConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Fixed timestep in seconds
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.tick_rate == 0 || self.tick_rate > 240 {
            return invalid("tick_rate must be in 1..=240");
        }
        if self.max_snapshot_history < 2 {
            return invalid("max_snapshot_history must hold at least two snapshots");
        }
        if self.history_max_age < self.lag_compensation.max_compensation_time {
            return invalid("history_max_age must cover max_compensation_time");
        }
        if self.snapshot_interval <= 0.0 {
            return invalid("snapshot_interval must be positive");
        }
        if self.rate_limit.window <= 0.0 || self.rate_limit.max_casts_per_window == 0 {
            return invalid("rate limit window and cap must be positive");
        }
        if self.anti_cheat.max_suspicion_before_kick == 0 {
            return invalid("max_suspicion_before_kick must be at least 1");
        }
        let legitimate = MovementModel::new(self.movement.clone(), self.world.bounds).max_speed();
        if self.anti_cheat.enabled && self.anti_cheat.max_movement_speed < legitimate {
            return Err(ConfigError::Invalid(format!(
                "anti_cheat.max_movement_speed {} is below the fastest legitimate movement {:.2}",
                self.anti_cheat.max_movement_speed, legitimate
            )));
        }
        if self.reconnect.max_attempts == 0 {
            return invalid("reconnect.max_attempts must be at least 1");
        }
        if self.prediction.history_size == 0 {
            return invalid("prediction.history_size must be positive");
        }
        if self.world.spawn_points.is_empty() {
            return invalid("world.spawn_points must not be empty");
        }
        if self.abilities.len() > u16::MAX as usize {
            return invalid("too many abilities");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LagCompensationConfig {
    /// Upper bound on how far back a target may be rewound (seconds)
    pub max_compensation_time: f64,
    /// RTT assumed for connections that have not been measured yet (seconds)
    pub default_rtt: f64,
    /// Allowed distance between a reported hit point and the rewound target
    pub hit_tolerance: f32,
}

impl Default for LagCompensationConfig {
    fn default() -> Self {
        Self {
            max_compensation_time: 0.5,
            default_rtt: 0.1,
            hit_tolerance: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputValidationConfig {
    pub magnitude_epsilon: f32,
    /// Max |input timestamp - server time| in seconds
    pub timestamp_tolerance: f64,
    /// Max frames an input may skip ahead of the previous one
    pub max_frame_lead: u32,
    pub max_inputs_per_tick: usize,
    pub max_pending_inputs: usize,
}

impl Default for InputValidationConfig {
    fn default() -> Self {
        Self {
            magnitude_epsilon: 0.01,
            timestamp_tolerance: 1.0,
            max_frame_lead: 120,
            max_inputs_per_tick: 2,
            max_pending_inputs: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub reconciliation_threshold: f32,
    /// Predicted frames kept for replay
    pub history_size: usize,
    pub rollback_enabled: bool,
    /// Seconds over which a visual correction is blended out
    pub smoothing_duration: f32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            reconciliation_threshold: 0.1,
            history_size: 128,
            rollback_enabled: true,
            smoothing_duration: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window: f64,
    pub max_casts_per_window: u32,
    pub min_cast_interval: f64,
    pub max_consecutive_rapid_casts: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: 1.0,
            max_casts_per_window: 5,
            min_cast_interval: 0.1,
            max_consecutive_rapid_casts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiCheatConfig {
    pub enabled: bool,
    pub max_movement_speed: f32,
    pub max_teleport_distance: f32,
    pub max_suspicion_before_kick: u32,
    pub suspicion_decay_interval: f64,
    /// Large displacements ending this close to a spawn point or teleport zone are allowed
    pub teleport_tolerance_radius: f32,
    /// Seconds after a respawn during which large displacements are allowed
    pub respawn_grace_period: f64,
    pub violation_history_len: usize,
}

impl Default for AntiCheatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_movement_speed: 25.0,
            max_teleport_distance: 10.0,
            max_suspicion_before_kick: 5,
            suspicion_decay_interval: 5.0,
            teleport_tolerance_radius: 2.0,
            respawn_grace_period: 5.0,
            violation_history_len: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Seconds between automatic reconnection attempts
    pub interval: f64,
    pub max_attempts: u32,
    /// Minimum seconds between user-initiated connection attempts
    pub cooldown: f64,
    /// Seconds to wait for a handshake before counting an attempt as failed
    pub connect_timeout: f64,
    /// RTT above this (seconds) raises a high-ping error
    pub max_allowed_ping: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval: 2.0,
            max_attempts: 3,
            cooldown: 2.5,
            connect_timeout: 5.0,
            max_allowed_ping: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub bounds: Bounds,
    pub spawn_points: Vec<Vec3>,
    pub teleport_zones: Vec<Vec3>,
    pub obstacles: Vec<Obstacle>,
    pub respawn_delay: f64,
    pub max_health: f32,
    pub max_resource: f32,
    pub resource_regen_per_second: f32,
    pub global_cooldown: f64,
    pub hit_radius: f32,
    /// Seconds of silence before a client is dropped
    pub client_timeout: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            bounds: Bounds::default(),
            spawn_points: vec![
                Vec3::new(-40.0, 0.0, -40.0),
                Vec3::new(40.0, 0.0, 40.0),
                Vec3::new(-40.0, 0.0, 40.0),
                Vec3::new(40.0, 0.0, -40.0),
            ],
            teleport_zones: Vec::new(),
            obstacles: Vec::new(),
            respawn_delay: 3.0,
            max_health: 100.0,
            max_resource: 100.0,
            resource_regen_per_second: 5.0,
            global_cooldown: 0.5,
            hit_radius: 0.5,
            client_timeout: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitShape {
    /// Area query around the target point
    Sphere { radius: f32 },
    /// Nearest target along the cast direction
    Ray { width: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityDefinition {
    pub name: String,
    pub cooldown: f64,
    pub resource_cost: f32,
    pub range: f32,
    pub damage: f32,
    pub shape: HitShape,
}

pub fn default_abilities() -> Vec<AbilityDefinition> {
    vec![
        AbilityDefinition {
            name: "strike".to_string(),
            cooldown: 0.8,
            resource_cost: 0.0,
            range: 3.0,
            damage: 12.0,
            shape: HitShape::Ray { width: 0.5 },
        },
        AbilityDefinition {
            name: "fireball".to_string(),
            cooldown: 4.0,
            resource_cost: 30.0,
            range: 12.0,
            damage: 35.0,
            shape: HitShape::Sphere { radius: 2.5 },
        },
        AbilityDefinition {
            name: "lance".to_string(),
            cooldown: 6.0,
            resource_cost: 40.0,
            range: 20.0,
            damage: 50.0,
            shape: HitShape::Ray { width: 0.75 },
        },
    ]
}
