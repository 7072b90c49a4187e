//! Authoritative world state: every player and training dummy on the map

use glam::{Quat, Vec3};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::config::WorldConfig;
use shared::movement::{MovementModel, MovementState};
use shared::protocol::{EntityState, HitResult, MovementInput};
use std::collections::BTreeMap;

use crate::abilities::CasterState;
use crate::snapshot_history::{EntitySnapshot, HistoricalState};

/// Dummy ids start here so they never collide with client ids
pub const DUMMY_ID_BASE: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player { client_id: u32 },
    Dummy,
}

#[derive(Debug, Clone)]
pub struct ServerEntity {
    pub id: u32,
    pub kind: EntityKind,
    pub movement: MovementState,
    pub rotation: Quat,
    pub health: f32,
    pub max_health: f32,
    pub caster: CasterState,
    pub alive: bool,
    pub last_respawn: Option<f64>,
    /// Where dummies return to on respawn
    home: Option<Vec3>,
}

impl ServerEntity {
    pub fn is_owned_by(&self, client_id: u32) -> bool {
        self.kind == EntityKind::Player { client_id }
    }

    pub fn position(&self) -> Vec3 {
        self.movement.position
    }

    pub fn live_state(&self) -> HistoricalState {
        HistoricalState {
            position: self.movement.position,
            velocity: self.movement.velocity,
            rotation: self.rotation,
            grounded: self.movement.grounded,
            health: self.health,
        }
    }

    pub fn snapshot(&self, server_time: f64, frame: u32) -> EntitySnapshot {
        EntitySnapshot {
            position: self.movement.position,
            velocity: self.movement.velocity,
            rotation: self.rotation,
            grounded: self.movement.grounded,
            health: self.health,
            server_time,
            frame,
        }
    }

    pub fn to_entity_state(&self) -> EntityState {
        EntityState {
            id: self.id,
            position: self.movement.position,
            velocity: self.movement.velocity,
            rotation: self.rotation,
            grounded: self.movement.grounded,
            health: self.health,
        }
    }
}

pub struct World {
    entities: BTreeMap<u32, ServerEntity>,
    model: MovementModel,
    config: WorldConfig,
    ability_count: usize,
    rng: StdRng,
    next_dummy_id: u32,
}

impl World {
    pub fn new(config: WorldConfig, model: MovementModel, ability_count: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            entities: BTreeMap::new(),
            model,
            config,
            ability_count,
            rng,
            next_dummy_id: DUMMY_ID_BASE,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn model(&self) -> &MovementModel {
        &self.model
    }

    fn pick_spawn_point(&mut self) -> Vec3 {
        if self.config.spawn_points.is_empty() {
            return Vec3::ZERO;
        }
        let index = self.rng.gen_range(0..self.config.spawn_points.len());
        self.config.spawn_points[index]
    }

    fn new_entity(&self, id: u32, kind: EntityKind, position: Vec3, home: Option<Vec3>) -> ServerEntity {
        ServerEntity {
            id,
            kind,
            movement: MovementState::at(self.config.bounds.clamp(position)),
            rotation: Quat::IDENTITY,
            health: self.config.max_health,
            max_health: self.config.max_health,
            caster: CasterState::new(self.config.max_resource, self.ability_count),
            alive: true,
            last_respawn: None,
            home,
        }
    }

    /// Player entities share their owner's client id
    pub fn add_player(&mut self, client_id: u32) -> Vec3 {
        let spawn = self.pick_spawn_point();
        let entity = self.new_entity(client_id, EntityKind::Player { client_id }, spawn, None);
        let position = entity.position();
        info!(
            "Added player {} at ({:.1}, {:.1}, {:.1})",
            client_id, position.x, position.y, position.z
        );
        self.entities.insert(client_id, entity);
        position
    }

    pub fn spawn_dummy(&mut self, position: Vec3) -> u32 {
        let id = self.next_dummy_id;
        self.next_dummy_id += 1;
        let entity = self.new_entity(id, EntityKind::Dummy, position, Some(position));
        info!("Spawned training dummy {} at {:?}", id, entity.position());
        self.entities.insert(id, entity);
        id
    }

    pub fn remove(&mut self, id: u32) -> Option<ServerEntity> {
        let removed = self.entities.remove(&id);
        if removed.is_some() {
            info!("Removed entity {}", id);
        }
        removed
    }

    pub fn get(&self, id: u32) -> Option<&ServerEntity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut ServerEntity> {
        self.entities.get_mut(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &ServerEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Steps a living entity by one input; dead entities keep their state
    pub fn apply_input(&mut self, id: u32, input: &MovementInput, dt: f32) -> Option<MovementState> {
        let entity = self.entities.get_mut(&id)?;
        if entity.alive {
            entity.movement = self.model.step(&entity.movement, input, dt);
            let v = entity.movement.velocity;
            if v.x != 0.0 || v.z != 0.0 {
                entity.rotation = Quat::from_rotation_y(v.x.atan2(v.z));
            }
        }
        Some(entity.movement)
    }

    /// Applies damage to a living target; `is_dead` is true only for the killing blow
    pub fn apply_damage(&mut self, target_id: u32, amount: f32) -> Option<HitResult> {
        let target = self.entities.get_mut(&target_id)?;
        if !target.alive {
            return None;
        }

        let applied = amount.max(0.0).min(target.health);
        target.health -= applied;
        if target.health <= 0.0 {
            target.health = 0.0;
            target.alive = false;
            target.movement.velocity = Vec3::ZERO;
        }

        Some(HitResult {
            target_id,
            applied_damage: applied,
            remaining_health: target.health,
            is_dead: !target.alive,
        })
    }

    /// Restores a dead entity at a spawn point (dummies at their home)
    pub fn respawn(&mut self, id: u32, now: f64) -> Option<Vec3> {
        let home = self.entities.get(&id)?.home;
        let position = match home {
            Some(home) => home,
            None => self.pick_spawn_point(),
        };
        let position = self.config.bounds.clamp(position);

        let entity = self.entities.get_mut(&id)?;
        entity.movement = MovementState::at(position);
        entity.rotation = Quat::IDENTITY;
        entity.health = entity.max_health;
        entity.alive = true;
        entity.last_respawn = Some(now);
        entity.caster.refill();
        entity.caster.reset_cooldowns();
        info!("Entity {} respawned at {:?}", id, position);
        Some(position)
    }

    pub fn regenerate(&mut self, dt: f32) {
        let amount = self.config.resource_regen_per_second * dt;
        for entity in self.entities.values_mut().filter(|e| e.alive) {
            entity.caster.regenerate(amount);
        }
    }

    pub fn entity_states(&self) -> Vec<EntityState> {
        self.entities.values().map(ServerEntity::to_entity_state).collect()
    }
}
