//! Heuristic cheat detection with decaying suspicion
//!
//! Each connected player has a [`PlayerProfile`]. Movement samples are checked
//! once per tick against speed and teleport limits, and the validation
//! pipeline reports rapid-fire casting. Every flag raises the player's
//! suspicion; quiet periods let it decay. Reaching the kick threshold is
//! terminal: the profile is discarded and an [`Enforcement`] is returned for
//! the caller to carry out.
//!
//! These are heuristics. Lag spikes will occasionally trip them, which is why
//! suspicion decays and legitimate teleport destinations are allowlisted.

use glam::Vec3;
use log::{debug, warn};
use shared::config::AntiCheatConfig;
use std::collections::{HashMap, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    Speed,
    Teleport,
    RapidFire,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Speed => write!(f, "speed"),
            ViolationKind::Teleport => write!(f, "teleport"),
            ViolationKind::RapidFire => write!(f, "rapid fire"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub time: f64,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct PlayerProfile {
    pub last_position: Vec3,
    pub last_velocity: Vec3,
    pub last_update_time: f64,
    pub counters: HashMap<ViolationKind, u32>,
    pub total_suspicion: u32,
    pub last_suspicion_time: f64,
    pub is_flagged: bool,
    pub violations: VecDeque<Violation>,
    pub last_respawn_time: Option<f64>,
}

impl PlayerProfile {
    fn new(position: Vec3, now: f64) -> Self {
        Self {
            last_position: position,
            last_velocity: Vec3::ZERO,
            last_update_time: now,
            counters: HashMap::new(),
            total_suspicion: 0,
            last_suspicion_time: now,
            is_flagged: false,
            violations: VecDeque::new(),
            last_respawn_time: None,
        }
    }

    pub fn count(&self, kind: ViolationKind) -> u32 {
        self.counters.get(&kind).copied().unwrap_or(0)
    }
}

/// A connection that must be kicked
#[derive(Debug, Clone, PartialEq)]
pub struct Enforcement {
    pub client_id: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Clean,
    Flagged { kind: ViolationKind, suspicion: u32 },
    Kick(Enforcement),
}

pub struct AntiCheatEngine {
    config: AntiCheatConfig,
    /// Spawn points and teleport zones
    allowlist: Vec<Vec3>,
    profiles: HashMap<u32, PlayerProfile>,
}

impl AntiCheatEngine {
    pub fn new(config: AntiCheatConfig, spawn_points: &[Vec3], teleport_zones: &[Vec3]) -> Self {
        let allowlist = spawn_points.iter().chain(teleport_zones).copied().collect();
        Self {
            config,
            allowlist,
            profiles: HashMap::new(),
        }
    }

    pub fn register(&mut self, client_id: u32, position: Vec3, now: f64) {
        self.profiles.insert(client_id, PlayerProfile::new(position, now));
    }

    pub fn unregister(&mut self, client_id: u32) -> bool {
        self.profiles.remove(&client_id).is_some()
    }

    pub fn profile(&self, client_id: u32) -> Option<&PlayerProfile> {
        self.profiles.get(&client_id)
    }

    pub fn suspicion(&self, client_id: u32) -> Option<u32> {
        self.profiles.get(&client_id).map(|p| p.total_suspicion)
    }

    /// A server-initiated relocation; the jump to `position` is not a violation
    pub fn note_respawn(&mut self, client_id: u32, position: Vec3, now: f64) {
        if let Some(profile) = self.profiles.get_mut(&client_id) {
            profile.last_position = position;
            profile.last_velocity = Vec3::ZERO;
            profile.last_update_time = now;
            profile.last_respawn_time = Some(now);
        }
    }

    /// Checks one movement sample and applies decay when it is clean
    pub fn evaluate_movement(&mut self, client_id: u32, position: Vec3, velocity: Vec3, now: f64) -> Verdict {
        self.evaluate_simulated_movement(client_id, position, velocity, now, 0.0)
    }

    /// Like [`Self::evaluate_movement`], for a sample produced by `simulated`
    /// seconds of applied input. Speed is measured over the longer of that and
    /// the wall time since the last sample, so inputs that arrive bunched into
    /// one tick are not mistaken for a speed hack.
    pub fn evaluate_simulated_movement(
        &mut self,
        client_id: u32,
        position: Vec3,
        velocity: Vec3,
        now: f64,
        simulated: f64,
    ) -> Verdict {
        if !self.config.enabled {
            return Verdict::Clean;
        }
        let Some(profile) = self.profiles.get_mut(&client_id) else {
            return Verdict::Clean;
        };

        let dt = (now - profile.last_update_time).max(simulated);
        if dt <= 0.0 {
            return Verdict::Clean;
        }

        let displacement = position.distance(profile.last_position);
        let mut flag = None;

        if displacement > self.config.max_teleport_distance {
            let near_allowed = self
                .allowlist
                .iter()
                .any(|p| p.distance(position) <= self.config.teleport_tolerance_radius);
            let in_grace = profile
                .last_respawn_time
                .map_or(false, |t| now - t < self.config.respawn_grace_period);

            if near_allowed || in_grace {
                debug!("Allowed relocation of client {} by {:.1}", client_id, displacement);
            } else {
                flag = Some((
                    ViolationKind::Teleport,
                    format!("moved {:.2} in one sample", displacement),
                ));
            }
        } else {
            let speed = displacement / dt as f32;
            if speed > self.config.max_movement_speed {
                flag = Some((ViolationKind::Speed, format!("speed {:.2}", speed)));
            }
        }

        profile.last_position = position;
        profile.last_velocity = velocity;
        profile.last_update_time = now;

        match flag {
            Some((kind, detail)) => self.flag(client_id, kind, detail, now),
            None => {
                self.decay(client_id, now);
                Verdict::Clean
            }
        }
    }

    /// Records a violation detected elsewhere (e.g. cast spam)
    pub fn report_violation(&mut self, client_id: u32, kind: ViolationKind, detail: &str, now: f64) -> Verdict {
        if !self.config.enabled || !self.profiles.contains_key(&client_id) {
            return Verdict::Clean;
        }
        self.flag(client_id, kind, detail.to_string(), now)
    }

    fn flag(&mut self, client_id: u32, kind: ViolationKind, detail: String, now: f64) -> Verdict {
        let history_len = self.config.violation_history_len;
        let threshold = self.config.max_suspicion_before_kick;
        let Some(profile) = self.profiles.get_mut(&client_id) else {
            return Verdict::Clean;
        };

        *profile.counters.entry(kind).or_insert(0) += 1;
        profile.total_suspicion += 1;
        profile.last_suspicion_time = now;
        profile.is_flagged = true;

        warn!(
            "Client {} flagged for {} ({}), suspicion {}/{}",
            client_id, kind, detail, profile.total_suspicion, threshold
        );

        profile.violations.push_back(Violation { kind, time: now, detail });
        while profile.violations.len() > history_len {
            profile.violations.pop_front();
        }

        let suspicion = profile.total_suspicion;
        if suspicion >= threshold {
            self.profiles.remove(&client_id);
            return Verdict::Kick(Enforcement {
                client_id,
                reason: format!("Anti-cheat: suspicion {} after {} violation", suspicion, kind),
            });
        }
        Verdict::Flagged { kind, suspicion }
    }

    fn decay(&mut self, client_id: u32, now: f64) {
        let interval = self.config.suspicion_decay_interval;
        if let Some(profile) = self.profiles.get_mut(&client_id) {
            if profile.total_suspicion > 0 && now - profile.last_suspicion_time >= interval {
                profile.total_suspicion -= 1;
                profile.last_suspicion_time = now;
                profile.is_flagged = profile.total_suspicion > 0;
                debug!(
                    "Client {} suspicion decayed to {}",
                    client_id, profile.total_suspicion
                );
            }
        }
    }
}
