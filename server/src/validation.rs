//! Server-side gate for every ability cast and targeted attack
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. the sender owns the casting entity (or is the server itself)
//! 2. the caster is alive
//! 3. sliding-window rate limit, then the minimum inter-cast interval
//! 4. the ability exists
//! 5. global cooldown, then the ability's own cooldown
//! 6. enough resource
//! 7. target validity: map bounds, range from the lag-compensated caster,
//!    line of sight (attacks validate the reported hit against the rewound
//!    target instead)
//!
//! An ownership failure produces no result at all so a client cannot fish
//! for other players' entities. Every other failure produces a denied
//! result carrying its code and mutates nothing except the rate-limit
//! counters. Rate-limit violations are also reported to anti-cheat.

use glam::Vec3;
use log::debug;
use shared::config::{AbilityDefinition, HitShape, NetcodeConfig};
use shared::geometry::has_line_of_sight;
use shared::protocol::{AbilityCastRequest, AbilityCastResult, AttackRequest, CastFailure, HitResult};
use shared::MAX_HIT_RESULTS;

use crate::abilities::AbilityBook;
use crate::anti_cheat::{AntiCheatEngine, Enforcement, Verdict, ViolationKind};
use crate::lag_compensation::{HitRejection, LagCompensator, LatencySource};
use crate::rate_limit::RateLimiter;
use crate::snapshot_history::SnapshotHistory;
use crate::world::World;

/// Height above an entity's feet used for line-of-sight rays
const SIGHT_HEIGHT: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastSender {
    /// Server-driven casts skip ownership and rate limiting
    Server,
    Client(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CastOutcome {
    /// Sender does not own the caster; nothing is sent back
    Ignored,
    Resolved {
        result: AbilityCastResult,
        enforcement: Option<Enforcement>,
    },
}

impl CastOutcome {
    pub fn result(&self) -> Option<&AbilityCastResult> {
        match self {
            CastOutcome::Ignored => None,
            CastOutcome::Resolved { result, .. } => Some(result),
        }
    }
}

enum Gate {
    Ignore,
    Deny(CastFailure, Option<Enforcement>),
}

impl From<CastFailure> for Gate {
    fn from(failure: CastFailure) -> Self {
        Gate::Deny(failure, None)
    }
}

/// One validation pass over borrowed server subsystems
pub struct CastValidator<'a> {
    pub config: &'a NetcodeConfig,
    pub abilities: &'a AbilityBook,
    pub world: &'a mut World,
    pub history: &'a SnapshotHistory,
    pub lag: &'a LagCompensator,
    pub rate_limiter: &'a mut RateLimiter,
    pub anti_cheat: &'a mut AntiCheatEngine,
    pub latency: &'a dyn LatencySource,
}

impl<'a> CastValidator<'a> {
    pub fn validate_cast(
        &mut self,
        sender: CastSender,
        caster_id: u32,
        request: &AbilityCastRequest,
        now: f64,
    ) -> CastOutcome {
        let ability = match self.common_checks(sender, caster_id, request.ability_index, now) {
            Ok(ability) => ability,
            Err(gate) => return self.close(gate, request.request_id, caster_id, request.ability_index, now),
        };

        if let Err(failure) = self.check_cast_target(sender, caster_id, &ability, request, now) {
            return self.close(failure.into(), request.request_id, caster_id, request.ability_index, now);
        }

        self.commit(caster_id, request.ability_index, &ability, now);
        let hits = self.resolve_hits(sender, caster_id, &ability, request, now);
        self.approve(request.request_id, caster_id, request.ability_index, hits, now)
    }

    pub fn validate_attack(
        &mut self,
        sender: CastSender,
        caster_id: u32,
        request: &AttackRequest,
        now: f64,
    ) -> CastOutcome {
        let ability = match self.common_checks(sender, caster_id, request.ability_index, now) {
            Ok(ability) => ability,
            Err(gate) => return self.close(gate, request.request_id, caster_id, request.ability_index, now),
        };

        if let Err(failure) = self.check_attack_target(sender, caster_id, &ability, request, now) {
            return self.close(failure.into(), request.request_id, caster_id, request.ability_index, now);
        }

        self.commit(caster_id, request.ability_index, &ability, now);
        let hits = self
            .world
            .apply_damage(request.target_id, ability.damage)
            .into_iter()
            .collect();
        self.approve(request.request_id, caster_id, request.ability_index, hits, now)
    }

    /// Steps 1 through 6, shared by casts and attacks
    fn common_checks(
        &mut self,
        sender: CastSender,
        caster_id: u32,
        ability_index: u16,
        now: f64,
    ) -> Result<AbilityDefinition, Gate> {
        let caster = self.world.get(caster_id).ok_or(Gate::Ignore)?;
        if let CastSender::Client(client_id) = sender {
            if !caster.is_owned_by(client_id) {
                return Err(Gate::Ignore);
            }
        }

        if !caster.alive {
            return Err(CastFailure::CasterDead.into());
        }

        if let CastSender::Client(client_id) = sender {
            if let Err(failure) = self.rate_limiter.check_and_record(caster_id, now) {
                let detail = format!("{} on ability {}", failure, ability_index);
                let enforcement =
                    match self
                        .anti_cheat
                        .report_violation(client_id, ViolationKind::RapidFire, &detail, now)
                    {
                        Verdict::Kick(enforcement) => Some(enforcement),
                        _ => None,
                    };
                return Err(Gate::Deny(failure, enforcement));
            }
        }

        let ability = self
            .abilities
            .get(ability_index)
            .cloned()
            .ok_or(CastFailure::InvalidAbility)?;

        let caster = self.world.get(caster_id).ok_or(Gate::Ignore)?;
        if caster.caster.global_cooldown_remaining(now) > 0.0 {
            return Err(CastFailure::GlobalCooldown.into());
        }
        if caster.caster.cooldown_remaining(ability_index, now) > 0.0 {
            return Err(CastFailure::AbilityCooldown.into());
        }
        if !caster.caster.can_afford(ability.resource_cost) {
            return Err(CastFailure::InsufficientResource.into());
        }

        Ok(ability)
    }

    fn rtt_for(&self, sender: CastSender) -> Option<f64> {
        match sender {
            CastSender::Server => Some(0.0),
            CastSender::Client(client_id) => self.latency.rtt(client_id),
        }
    }

    /// Live caster position plus, when history exists, where it was at the rewound time
    fn caster_positions(&self, sender: CastSender, caster_id: u32, client_timestamp: f64, now: f64) -> Option<(Vec3, Vec3)> {
        let caster = self.world.get(caster_id)?;
        let live = caster.position();
        let rewind = self.lag.rewind_time(now, client_timestamp, self.rtt_for(sender));
        let rewound = self
            .history
            .query(caster_id, rewind)
            .map_or(live, |state| state.position);
        Some((live, rewound))
    }

    fn check_cast_target(
        &self,
        sender: CastSender,
        caster_id: u32,
        ability: &AbilityDefinition,
        request: &AbilityCastRequest,
        now: f64,
    ) -> Result<(), CastFailure> {
        let target = request.target_position;
        if !target.is_finite() || !self.world.config().bounds.contains(target) {
            return Err(CastFailure::OutOfBounds);
        }

        let (live, rewound) = self
            .caster_positions(sender, caster_id, request.client_timestamp, now)
            .ok_or(CastFailure::InvalidTarget)?;

        let in_range = live.distance(target) <= ability.range || rewound.distance(target) <= ability.range;
        if !in_range {
            return Err(CastFailure::OutOfRange);
        }

        if !has_line_of_sight(
            &self.world.config().obstacles,
            live + Vec3::Y * SIGHT_HEIGHT,
            target + Vec3::Y * SIGHT_HEIGHT,
        ) {
            return Err(CastFailure::NoLineOfSight);
        }
        Ok(())
    }

    fn check_attack_target(
        &self,
        sender: CastSender,
        caster_id: u32,
        ability: &AbilityDefinition,
        request: &AttackRequest,
        now: f64,
    ) -> Result<(), CastFailure> {
        if !request.hit_point.is_finite() || !self.world.config().bounds.contains(request.hit_point) {
            return Err(CastFailure::OutOfBounds);
        }

        let target = match self.world.get(request.target_id) {
            Some(target) if target.alive && target.id != caster_id => target,
            _ => return Err(CastFailure::InvalidTarget),
        };
        let shooter = self.world.get(caster_id).ok_or(CastFailure::InvalidTarget)?;

        let rewound = self.lag.compensated_state(
            self.history,
            target.id,
            now,
            request.client_timestamp,
            self.rtt_for(sender),
            target.live_state(),
        );

        self.lag
            .validate_hit(shooter.position(), rewound.position, request.hit_point, ability.range)
            .map_err(|rejection| match rejection {
                HitRejection::OutsideTolerance { .. } => CastFailure::HitRejected,
                HitRejection::OutOfRange { .. } => CastFailure::OutOfRange,
            })?;

        if !has_line_of_sight(
            &self.world.config().obstacles,
            shooter.position() + Vec3::Y * SIGHT_HEIGHT,
            rewound.position + Vec3::Y * SIGHT_HEIGHT,
        ) {
            return Err(CastFailure::NoLineOfSight);
        }
        Ok(())
    }

    fn commit(&mut self, caster_id: u32, ability_index: u16, ability: &AbilityDefinition, now: f64) {
        let global_cooldown = self.config.world.global_cooldown;
        if let Some(caster) = self.world.get_mut(caster_id) {
            caster.caster.commit(ability_index, ability, global_cooldown, now);
        }
    }

    /// Finds targets at their rewound positions and applies damage
    fn resolve_hits(
        &mut self,
        sender: CastSender,
        caster_id: u32,
        ability: &AbilityDefinition,
        request: &AbilityCastRequest,
        now: f64,
    ) -> Vec<HitResult> {
        let Some(origin) = self.world.get(caster_id).map(|c| c.position()) else {
            return Vec::new();
        };
        let rewind = self.lag.rewind_time(now, request.client_timestamp, self.rtt_for(sender));
        let hit_radius = self.world.config().hit_radius;
        let obstacles = &self.world.config().obstacles;

        let candidates: Vec<(u32, Vec3)> = self
            .world
            .entities()
            .filter(|e| e.alive && e.id != caster_id)
            .map(|e| (e.id, self.history.query_or(e.id, rewind, e.live_state()).position))
            .collect();

        let mut targets: Vec<(u32, f32)> = match ability.shape {
            HitShape::Sphere { radius } => candidates
                .iter()
                .filter_map(|(id, position)| {
                    let distance = position.distance(request.target_position);
                    (distance <= radius + hit_radius).then_some((*id, distance))
                })
                .collect(),
            HitShape::Ray { width } => {
                let direction = ray_direction(origin, request);
                match direction {
                    Some(direction) => candidates
                        .iter()
                        .filter_map(|(id, position)| {
                            let offset = *position - origin;
                            let along = offset.dot(direction);
                            if along < 0.0 || along > ability.range {
                                return None;
                            }
                            let lateral = (offset - direction * along).length();
                            let clear = has_line_of_sight(
                                obstacles,
                                origin + Vec3::Y * SIGHT_HEIGHT,
                                *position + Vec3::Y * SIGHT_HEIGHT,
                            );
                            (lateral <= width * 0.5 + hit_radius && clear).then_some((*id, along))
                        })
                        .min_by(|a, b| a.1.total_cmp(&b.1))
                        .into_iter()
                        .collect(),
                    None => Vec::new(),
                }
            }
        };

        targets.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        targets.truncate(MAX_HIT_RESULTS);

        targets
            .into_iter()
            .filter_map(|(id, _)| self.world.apply_damage(id, ability.damage))
            .collect()
    }

    fn approve(&self, request_id: u32, caster_id: u32, ability_index: u16, hits: Vec<HitResult>, now: f64) -> CastOutcome {
        let (resource, cooldown, global) = self.caster_status(caster_id, ability_index, now);
        CastOutcome::Resolved {
            result: AbilityCastResult::approved(
                request_id,
                caster_id,
                ability_index,
                resource,
                cooldown,
                global,
                hits,
            ),
            enforcement: None,
        }
    }

    fn close(&self, gate: Gate, request_id: u32, caster_id: u32, ability_index: u16, now: f64) -> CastOutcome {
        match gate {
            Gate::Ignore => {
                debug!("Ignoring cast {} for entity {} from non-owner", request_id, caster_id);
                CastOutcome::Ignored
            }
            Gate::Deny(failure, enforcement) => {
                debug!(
                    "Denied cast {} (ability {}) for entity {}: {}",
                    request_id, ability_index, caster_id, failure
                );
                let (resource, cooldown, global) = self.caster_status(caster_id, ability_index, now);
                CastOutcome::Resolved {
                    result: AbilityCastResult::denied(
                        request_id,
                        caster_id,
                        ability_index,
                        failure,
                        resource,
                        cooldown,
                        global,
                    ),
                    enforcement,
                }
            }
        }
    }

    fn caster_status(&self, caster_id: u32, ability_index: u16, now: f64) -> (f32, f32, f32) {
        self.world.get(caster_id).map_or((0.0, 0.0, 0.0), |caster| {
            (
                caster.caster.resource(),
                caster.caster.cooldown_remaining(ability_index, now),
                caster.caster.global_cooldown_remaining(now),
            )
        })
    }
}

/// Normalized ground-plane direction of a ray ability; falls back to aiming at the target point
fn ray_direction(origin: Vec3, request: &AbilityCastRequest) -> Option<Vec3> {
    let flatten = |v: Vec3| Vec3::new(v.x, 0.0, v.z).try_normalize();
    if request.target_direction.is_finite() {
        if let Some(direction) = flatten(request.target_direction) {
            return Some(direction);
        }
    }
    flatten(request.target_position - origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot_history::EntitySnapshot;
    use glam::Quat;
    use shared::config::{AntiCheatConfig, RateLimitConfig};
    use shared::geometry::Obstacle;
    use shared::movement::MovementModel;
    use std::collections::HashMap;

    const STRIKE: u16 = 0;
    const FIREBALL: u16 = 1;
    const LANCE: u16 = 2;

    struct Latency(HashMap<u32, f64>);

    impl LatencySource for Latency {
        fn rtt(&self, client_id: u32) -> Option<f64> {
            self.0.get(&client_id).copied()
        }
    }

    struct Fixture {
        config: NetcodeConfig,
        abilities: AbilityBook,
        world: World,
        history: SnapshotHistory,
        lag: LagCompensator,
        rate_limiter: RateLimiter,
        anti_cheat: AntiCheatEngine,
        latency: Latency,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(NetcodeConfig::default())
        }

        fn with_config(config: NetcodeConfig) -> Self {
            let model = MovementModel::new(config.movement.clone(), config.world.bounds);
            let mut world = World::new(config.world.clone(), model, config.abilities.len(), Some(3));
            world.add_player(1);
            place(&mut world, 1, Vec3::ZERO);

            let mut anti_cheat = AntiCheatEngine::new(
                config.anti_cheat.clone(),
                &config.world.spawn_points,
                &config.world.teleport_zones,
            );
            anti_cheat.register(1, Vec3::ZERO, 0.0);

            Self {
                abilities: AbilityBook::new(config.abilities.clone()),
                world,
                history: SnapshotHistory::new(config.max_snapshot_history, config.history_max_age),
                lag: LagCompensator::new(config.lag_compensation.clone()),
                rate_limiter: RateLimiter::new(config.rate_limit.clone()),
                anti_cheat,
                latency: Latency(HashMap::from([(1, 0.1)])),
                config,
            }
        }

        fn validator(&mut self) -> CastValidator<'_> {
            CastValidator {
                config: &self.config,
                abilities: &self.abilities,
                world: &mut self.world,
                history: &self.history,
                lag: &self.lag,
                rate_limiter: &mut self.rate_limiter,
                anti_cheat: &mut self.anti_cheat,
                latency: &self.latency,
            }
        }

        fn cast(&mut self, request: AbilityCastRequest, now: f64) -> CastOutcome {
            self.validator().validate_cast(CastSender::Client(1), 1, &request, now)
        }
    }

    fn place(world: &mut World, id: u32, position: Vec3) {
        world.get_mut(id).unwrap().movement.position = position;
    }

    fn request(request_id: u32, ability_index: u16, target: Vec3, now: f64) -> AbilityCastRequest {
        AbilityCastRequest {
            request_id,
            ability_index,
            target_position: target,
            target_direction: target.normalize_or_zero(),
            client_timestamp: now,
        }
    }

    fn denied(outcome: &CastOutcome) -> Option<CastFailure> {
        outcome.result().and_then(|r| r.failure)
    }

    #[test]
    fn test_non_owner_is_ignored() {
        let mut f = Fixture::new();
        let outcome = f
            .validator()
            .validate_cast(CastSender::Client(2), 1, &request(1, FIREBALL, Vec3::X, 1.0), 1.0);
        assert_eq!(outcome, CastOutcome::Ignored);
    }

    #[test]
    fn test_server_may_cast_for_any_entity() {
        let mut f = Fixture::new();
        let dummy = f.world.spawn_dummy(Vec3::new(5.0, 0.0, 0.0));
        let outcome = f
            .validator()
            .validate_cast(CastSender::Server, dummy, &request(1, FIREBALL, Vec3::ZERO, 1.0), 1.0);
        assert!(outcome.result().unwrap().approved);
    }

    #[test]
    fn test_approved_cast_spends_resource_and_hits() {
        let mut f = Fixture::new();
        let dummy = f.world.spawn_dummy(Vec3::new(8.0, 0.0, 0.0));

        let outcome = f.cast(request(1, FIREBALL, Vec3::new(8.0, 0.0, 0.0), 1.0), 1.0);
        let result = outcome.result().unwrap();

        assert!(result.approved);
        assert!(result.is_well_formed());
        assert_eq!(result.current_resource, 70.0);
        assert_eq!(result.cooldown_remaining, 4.0);
        assert_eq!(result.global_cooldown_remaining, 0.5);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].target_id, dummy);
        assert_eq!(result.hits[0].remaining_health, 65.0);
    }

    #[test]
    fn test_dead_caster_denied() {
        let mut f = Fixture::new();
        f.world.apply_damage(1, 1000.0);
        let outcome = f.cast(request(1, FIREBALL, Vec3::X, 1.0), 1.0);
        assert_eq!(denied(&outcome), Some(CastFailure::CasterDead));
    }

    #[test]
    fn test_invalid_ability_denied() {
        let mut f = Fixture::new();
        let outcome = f.cast(request(1, 42, Vec3::X, 1.0), 1.0);
        assert_eq!(denied(&outcome), Some(CastFailure::InvalidAbility));
    }

    #[test]
    fn test_cooldowns_checked_in_order() {
        let mut f = Fixture::new();
        assert!(f.cast(request(1, FIREBALL, Vec3::X, 1.0), 1.0).result().unwrap().approved);

        let outcome = f.cast(request(2, LANCE, Vec3::X, 1.2), 1.2);
        assert_eq!(denied(&outcome), Some(CastFailure::GlobalCooldown));

        let outcome = f.cast(request(3, FIREBALL, Vec3::X, 2.0), 2.0);
        assert_eq!(denied(&outcome), Some(CastFailure::AbilityCooldown));

        let outcome = f.cast(request(4, LANCE, Vec3::X, 2.5), 2.5);
        assert!(outcome.result().unwrap().approved);
    }

    #[test]
    fn test_insufficient_resource_mutates_nothing() {
        let mut config = NetcodeConfig::default();
        config.world.max_resource = 10.0;
        let mut f = Fixture::with_config(config);

        let before = f.world.get(1).unwrap().caster.clone();
        let outcome = f.cast(request(1, FIREBALL, Vec3::X, 1.0), 1.0);

        assert_eq!(denied(&outcome), Some(CastFailure::InsufficientResource));
        assert_eq!(f.world.get(1).unwrap().caster, before);
    }

    #[test]
    fn test_target_checks() {
        let mut f = Fixture::new();

        let outcome = f.cast(request(1, FIREBALL, Vec3::new(500.0, 0.0, 0.0), 1.0), 1.0);
        assert_eq!(denied(&outcome), Some(CastFailure::OutOfBounds));

        let outcome = f.cast(request(2, FIREBALL, Vec3::new(30.0, 0.0, 0.0), 2.0), 2.0);
        assert_eq!(denied(&outcome), Some(CastFailure::OutOfRange));
    }

    #[test]
    fn test_obstacle_blocks_line_of_sight() {
        let mut config = NetcodeConfig::default();
        config.world.obstacles = vec![Obstacle::new(
            Vec3::new(4.0, 0.0, -5.0),
            Vec3::new(5.0, 5.0, 5.0),
        )];
        let mut f = Fixture::with_config(config);

        let outcome = f.cast(request(1, FIREBALL, Vec3::new(8.0, 0.0, 0.0), 1.0), 1.0);
        assert_eq!(denied(&outcome), Some(CastFailure::NoLineOfSight));
    }

    #[test]
    fn test_range_uses_lag_compensated_caster() {
        let mut f = Fixture::new();
        // Caster was at x=0 when the client fired and has since moved away
        for (x, t) in [(0.0, 0.8), (0.0, 0.9), (20.0, 1.0)] {
            f.history.record(
                1,
                EntitySnapshot {
                    position: Vec3::new(x, 0.0, 0.0),
                    velocity: Vec3::ZERO,
                    rotation: Quat::IDENTITY,
                    grounded: true,
                    health: 100.0,
                    server_time: t,
                    frame: 0,
                },
            );
        }
        place(&mut f.world, 1, Vec3::new(20.0, 0.0, 0.0));

        let outcome = f.cast(request(1, FIREBALL, Vec3::new(-10.0, 0.0, 0.0), 0.9), 1.0);
        assert!(outcome.result().unwrap().approved);
    }

    #[test]
    fn test_rate_limit_feeds_anti_cheat() {
        let mut config = NetcodeConfig::default();
        config.rate_limit = RateLimitConfig {
            window: 1.0,
            max_casts_per_window: 2,
            min_cast_interval: 0.0,
            max_consecutive_rapid_casts: 100,
        };
        config.anti_cheat = AntiCheatConfig {
            max_suspicion_before_kick: 2,
            ..AntiCheatConfig::default()
        };
        let mut f = Fixture::with_config(config);

        f.cast(request(1, 42, Vec3::X, 0.0), 0.0);
        f.cast(request(2, 42, Vec3::X, 0.1), 0.1);

        let outcome = f.cast(request(3, 42, Vec3::X, 0.2), 0.2);
        assert_eq!(denied(&outcome), Some(CastFailure::RateLimited));
        assert_eq!(f.anti_cheat.suspicion(1), Some(1));

        match f.cast(request(4, 42, Vec3::X, 0.3), 0.3) {
            CastOutcome::Resolved {
                enforcement: Some(enforcement),
                ..
            } => assert!(enforcement.reason.contains("Anti-cheat")),
            other => panic!("expected a kick, got {:?}", other),
        }
    }

    #[test]
    fn test_sphere_hits_sorted_and_capped() {
        let mut f = Fixture::new();
        for i in 0..20 {
            let angle = i as f32 * 0.3;
            let r = 0.1 * i as f32;
            f.world.spawn_dummy(Vec3::new(6.0 + r * angle.cos(), 0.0, r * angle.sin()));
        }

        let result = f
            .cast(request(1, FIREBALL, Vec3::new(6.0, 0.0, 0.0), 1.0), 1.0)
            .result()
            .cloned()
            .unwrap();

        assert_eq!(result.hits.len(), MAX_HIT_RESULTS);
        let first = f.world.get(result.hits[0].target_id).unwrap().position();
        assert!(first.distance(Vec3::new(6.0, 0.0, 0.0)) < 0.05);
    }

    #[test]
    fn test_ray_hits_nearest_only() {
        let mut f = Fixture::new();
        let near = f.world.spawn_dummy(Vec3::new(5.0, 0.0, 0.2));
        let far = f.world.spawn_dummy(Vec3::new(10.0, 0.0, 0.0));
        let off_line = f.world.spawn_dummy(Vec3::new(3.0, 0.0, 6.0));

        let result = f
            .cast(request(1, LANCE, Vec3::new(15.0, 0.0, 0.0), 1.0), 1.0)
            .result()
            .cloned()
            .unwrap();

        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].target_id, near);
        assert_eq!(f.world.get(far).unwrap().health, 100.0);
        assert_eq!(f.world.get(off_line).unwrap().health, 100.0);
    }

    #[test]
    fn test_attack_validates_reported_hit() {
        let mut f = Fixture::new();
        let dummy = f.world.spawn_dummy(Vec3::new(2.0, 0.0, 0.0));

        let good = AttackRequest {
            request_id: 1,
            ability_index: STRIKE,
            target_id: dummy,
            hit_point: Vec3::new(2.3, 0.0, 0.0),
            client_timestamp: 1.0,
        };
        let outcome = f.validator().validate_attack(CastSender::Client(1), 1, &good, 1.0);
        let result = outcome.result().unwrap();
        assert!(result.approved);
        assert_eq!(result.hits[0].applied_damage, 12.0);

        let bad = AttackRequest {
            request_id: 2,
            hit_point: Vec3::new(2.0, 0.0, 3.0),
            ..good
        };
        let outcome = f.validator().validate_attack(CastSender::Client(1), 1, &bad, 5.0);
        assert_eq!(denied(&outcome), Some(CastFailure::HitRejected));

        let self_target = AttackRequest {
            request_id: 3,
            target_id: 1,
            hit_point: Vec3::ZERO,
            ..good
        };
        let outcome = f.validator().validate_attack(CastSender::Client(1), 1, &self_target, 9.0);
        assert_eq!(denied(&outcome), Some(CastFailure::InvalidTarget));
    }
}
