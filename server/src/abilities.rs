//! Ability definitions plus per-caster cooldown and resource tracking

use shared::config::AbilityDefinition;

/// Read-only table of castable abilities, indexed by the wire `ability_index`
#[derive(Debug, Clone)]
pub struct AbilityBook {
    abilities: Vec<AbilityDefinition>,
}

impl AbilityBook {
    pub fn new(abilities: Vec<AbilityDefinition>) -> Self {
        Self { abilities }
    }

    pub fn get(&self, index: u16) -> Option<&AbilityDefinition> {
        self.abilities.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.abilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AbilityDefinition> {
        self.abilities.iter()
    }
}

/// Cooldowns and resource pool of one entity
///
/// Cooldowns are stored as absolute server times at which the ability
/// becomes ready again, so nothing needs ticking down.
#[derive(Debug, Clone, PartialEq)]
pub struct CasterState {
    resource: f32,
    max_resource: f32,
    global_ready_at: f64,
    ready_at: Vec<f64>,
}

impl CasterState {
    pub fn new(max_resource: f32, ability_count: usize) -> Self {
        Self {
            resource: max_resource,
            max_resource,
            global_ready_at: 0.0,
            ready_at: vec![0.0; ability_count],
        }
    }

    pub fn resource(&self) -> f32 {
        self.resource
    }

    pub fn max_resource(&self) -> f32 {
        self.max_resource
    }

    pub fn global_cooldown_remaining(&self, now: f64) -> f32 {
        (self.global_ready_at - now).max(0.0) as f32
    }

    pub fn cooldown_remaining(&self, index: u16, now: f64) -> f32 {
        self.ready_at
            .get(index as usize)
            .map_or(0.0, |ready| (ready - now).max(0.0) as f32)
    }

    pub fn can_afford(&self, cost: f32) -> bool {
        self.resource >= cost
    }

    /// Spends the resource and starts both cooldowns
    pub fn commit(&mut self, index: u16, ability: &AbilityDefinition, global_cooldown: f64, now: f64) {
        self.resource = (self.resource - ability.resource_cost).max(0.0);
        self.global_ready_at = now + global_cooldown;
        if let Some(ready) = self.ready_at.get_mut(index as usize) {
            *ready = now + ability.cooldown;
        }
    }

    pub fn regenerate(&mut self, amount: f32) {
        self.resource = (self.resource + amount).min(self.max_resource);
    }

    pub fn refill(&mut self) {
        self.resource = self.max_resource;
    }

    pub fn reset_cooldowns(&mut self) {
        self.global_ready_at = 0.0;
        self.ready_at.iter_mut().for_each(|ready| *ready = 0.0);
    }
}
