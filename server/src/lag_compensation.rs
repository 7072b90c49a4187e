//! Rewinding targets to what a remote shooter actually saw
//!
//! A client stamps each cast or attack with its estimate of server time. By
//! the time the request arrives the world has moved on by roughly the elapsed
//! time plus the one-way latency of the state the client was looking at, so
//! the target is looked up at
//!
//! ```text
//! rewind = client_timestamp - rtt / 2
//! compensation = clamp(server_time - rewind, 0, max_compensation_time)
//! ```
//!
//! Only targets are rewound. The shooter is always taken at its live position.

use glam::Vec3;
use shared::config::LagCompensationConfig;
use thiserror::Error;

use crate::snapshot_history::{HistoricalState, SnapshotHistory};

/// Per-connection round-trip time estimates, in seconds
pub trait LatencySource {
    fn rtt(&self, client_id: u32) -> Option<f64>;
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum HitRejection {
    #[error("hit point is {distance:.2} from the rewound target, tolerance {tolerance:.2}")]
    OutsideTolerance { distance: f32, tolerance: f32 },
    #[error("target is {distance:.2} away, max range {range:.2}")]
    OutOfRange { distance: f32, range: f32 },
}

#[derive(Debug, Clone)]
pub struct LagCompensator {
    config: LagCompensationConfig,
}

impl LagCompensator {
    pub fn new(config: LagCompensationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LagCompensationConfig {
        &self.config
    }

    /// How far back (seconds) to look, never negative and never beyond the cap
    pub fn compensation_time(&self, server_time: f64, client_timestamp: f64, rtt: Option<f64>) -> f64 {
        if !client_timestamp.is_finite() {
            return 0.0;
        }
        let rtt = rtt
            .filter(|r| r.is_finite() && *r >= 0.0)
            .unwrap_or(self.config.default_rtt);
        // The client stamps its estimate of server time, which trails ours
        // by the one-way latency, so half the RTT is added back
        (server_time - client_timestamp + rtt / 2.0).clamp(0.0, self.config.max_compensation_time)
    }

    pub fn rewind_time(&self, server_time: f64, client_timestamp: f64, rtt: Option<f64>) -> f64 {
        server_time - self.compensation_time(server_time, client_timestamp, rtt)
    }

    /// Target state at the rewound time, or `live` if the target has no history
    pub fn compensated_state(
        &self,
        history: &SnapshotHistory,
        target_id: u32,
        server_time: f64,
        client_timestamp: f64,
        rtt: Option<f64>,
        live: HistoricalState,
    ) -> HistoricalState {
        let at = self.rewind_time(server_time, client_timestamp, rtt);
        history.query_or(target_id, at, live)
    }

    pub fn compensated_position(
        &self,
        history: &SnapshotHistory,
        latency: &dyn LatencySource,
        shooter_id: u32,
        target_id: u32,
        server_time: f64,
        client_timestamp: f64,
        live_position: Vec3,
    ) -> Vec3 {
        let at = self.rewind_time(server_time, client_timestamp, latency.rtt(shooter_id));
        history
            .query(target_id, at)
            .map_or(live_position, |state| state.position)
    }

    /// A reported hit must land near the rewound target, and the target must
    /// be within range of the shooter
    pub fn validate_hit(
        &self,
        shooter_position: Vec3,
        compensated_target: Vec3,
        hit_point: Vec3,
        max_range: f32,
    ) -> Result<(), HitRejection> {
        let offset = hit_point.distance(compensated_target);
        if !(offset <= self.config.hit_tolerance) {
            return Err(HitRejection::OutsideTolerance {
                distance: offset,
                tolerance: self.config.hit_tolerance,
            });
        }

        let distance = shooter_position.distance(compensated_target);
        if distance > max_range {
            return Err(HitRejection::OutOfRange {
                distance,
                range: max_range,
            });
        }
        Ok(())
    }
}
