//! Per-entity history of authoritative states for lag compensation
//!
//! The tick loop is the only writer ([`SnapshotHistory::record`] takes
//! `&mut self`); validation and lag compensation only read through `&self`.
//! Each entity owns its own ring buffer so entities never contend with each
//! other.
//!
//! Two eviction rules apply to every buffer and whichever fires first wins:
//! - count: at most `capacity` snapshots per entity
//! - age: nothing older than `max_age` seconds behind the newest snapshot

use glam::{Quat, Vec3};
use std::collections::{HashMap, VecDeque};

/// One entity's authoritative state at the end of a server tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySnapshot {
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub grounded: bool,
    pub health: f32,
    pub server_time: f64,
    pub frame: u32,
}

/// Answer to "where was this entity at time T"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub grounded: bool,
    pub health: f32,
}

impl From<&EntitySnapshot> for HistoricalState {
    fn from(snapshot: &EntitySnapshot) -> Self {
        Self {
            position: snapshot.position,
            velocity: snapshot.velocity,
            rotation: snapshot.rotation,
            grounded: snapshot.grounded,
            health: snapshot.health,
        }
    }
}

#[derive(Debug, Default)]
pub struct EntityHistory {
    snapshots: VecDeque<EntitySnapshot>,
}

impl EntityHistory {
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn oldest(&self) -> Option<&EntitySnapshot> {
        self.snapshots.front()
    }

    pub fn latest(&self) -> Option<&EntitySnapshot> {
        self.snapshots.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.snapshots.iter()
    }

    fn evict_older_than(&mut self, cutoff: f64) {
        while self
            .snapshots
            .front()
            .map_or(false, |s| s.server_time < cutoff)
        {
            self.snapshots.pop_front();
        }
    }

    /// Exact match, interpolation between the bracketing pair, or the
    /// nearest endpoint when `time` is outside the stored range
    pub fn sample(&self, time: f64) -> Option<HistoricalState> {
        let first = self.snapshots.front()?;
        let last = self.snapshots.back()?;

        if time <= first.server_time {
            return Some(first.into());
        }
        if time >= last.server_time {
            return Some(last.into());
        }

        // First snapshot strictly after `time`; bounded to 1..len by the checks above
        let upper = self.snapshots.partition_point(|s| s.server_time <= time);
        let before = &self.snapshots[upper - 1];
        let after = &self.snapshots[upper];

        if before.server_time == time {
            return Some(before.into());
        }

        let span = after.server_time - before.server_time;
        let t = ((time - before.server_time) / span) as f32;
        let nearer = if t < 0.5 { before } else { after };

        Some(HistoricalState {
            position: before.position.lerp(after.position, t),
            velocity: before.velocity.lerp(after.velocity, t),
            rotation: before.rotation.slerp(after.rotation, t),
            grounded: nearer.grounded,
            health: nearer.health,
        })
    }
}

pub struct SnapshotHistory {
    entities: HashMap<u32, EntityHistory>,
    capacity: usize,
    max_age: f64,
}

impl SnapshotHistory {
    pub fn new(capacity: usize, max_age: f64) -> Self {
        Self {
            entities: HashMap::new(),
            capacity: capacity.max(1),
            max_age,
        }
    }

    /// Appends a snapshot; returns false if it is older than the entity's latest
    pub fn record(&mut self, entity_id: u32, snapshot: EntitySnapshot) -> bool {
        let history = self.entities.entry(entity_id).or_default();

        if let Some(latest) = history.latest() {
            if snapshot.server_time < latest.server_time {
                return false;
            }
        }

        history.snapshots.push_back(snapshot);
        while history.snapshots.len() > self.capacity {
            history.snapshots.pop_front();
        }
        history.evict_older_than(snapshot.server_time - self.max_age);
        true
    }

    pub fn query(&self, entity_id: u32, time: f64) -> Option<HistoricalState> {
        self.entities.get(&entity_id)?.sample(time)
    }

    /// Like [`Self::query`], falling back to the caller's live state
    pub fn query_or(&self, entity_id: u32, time: f64, live: HistoricalState) -> HistoricalState {
        self.query(entity_id, time).unwrap_or(live)
    }

    pub fn remove_entity(&mut self, entity_id: u32) -> bool {
        self.entities.remove(&entity_id).is_some()
    }

    pub fn history(&self, entity_id: u32) -> Option<&EntityHistory> {
        self.entities.get(&entity_id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_age(&self) -> f64 {
        self.max_age
    }
}
