use glam::Vec3;
use log::{debug, info};
use shared::config::NetcodeConfig;
use shared::movement::{MovementModel, MovementState};
use shared::next_sequence;
use shared::protocol::{AbilityCastRequest, AbilityCastResult, EntityState, InputAck, MovementInput};
use std::collections::{HashMap, VecDeque};

use crate::input::InputSample;
use crate::prediction::{ClientPredictor, PredictionStats, ReconcileOutcome};

/// Cast results kept for display
const RECENT_RESULTS: usize = 32;

/// Seconds a cast request waits for its result before it is presumed lost
const PENDING_CAST_TIMEOUT: f64 = 5.0;

/// One server broadcast of every entity
#[derive(Debug, Clone)]
pub struct WorldFrame {
    pub server_time: f64,
    pub frame: u32,
    pub entities: Vec<EntityState>,
}

/// Buffer of world broadcasts used to draw remote entities slightly in the past
#[derive(Debug, Clone)]
pub struct RemoteWorld {
    frames: VecDeque<WorldFrame>,
    max_age: f64,
}

impl RemoteWorld {
    pub fn new(max_age: f64) -> Self {
        Self {
            frames: VecDeque::new(),
            max_age,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn latest(&self) -> Option<&WorldFrame> {
        self.frames.back()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Frames arriving out of order are dropped
    pub fn push(&mut self, frame: WorldFrame) -> bool {
        if let Some(latest) = self.frames.back() {
            if frame.server_time <= latest.server_time {
                return false;
            }
        }

        let cutoff = frame.server_time - self.max_age;
        self.frames.push_back(frame);
        while self.frames.len() > 2 && self.frames.front().map_or(false, |f| f.server_time < cutoff) {
            self.frames.pop_front();
        }
        true
    }

    /// Entity states at `render_time`, interpolated between the bracketing
    /// broadcasts and clamped to the oldest/newest outside the buffer
    pub fn sample(&self, render_time: f64) -> Vec<EntityState> {
        let Some(first) = self.frames.front() else {
            return Vec::new();
        };
        if render_time <= first.server_time || self.frames.len() == 1 {
            return first_or_last(&self.frames, render_time);
        }

        let after_index = self
            .frames
            .iter()
            .position(|frame| frame.server_time > render_time);
        let Some(after_index) = after_index else {
            return self.frames.back().map(|f| f.entities.clone()).unwrap_or_default();
        };

        let before = &self.frames[after_index - 1];
        let after = &self.frames[after_index];
        let span = after.server_time - before.server_time;
        let alpha = if span > 0.0 {
            ((render_time - before.server_time) / span).clamp(0.0, 1.0) as f32
        } else {
            0.0
        };

        let mut result: Vec<EntityState> = before
            .entities
            .iter()
            .map(|b| match after.entities.iter().find(|a| a.id == b.id) {
                Some(a) => interpolate(b, a, alpha),
                None => *b,
            })
            .collect();

        for a in &after.entities {
            if !before.entities.iter().any(|b| b.id == a.id) {
                result.push(*a);
            }
        }
        result
    }
}

fn first_or_last(frames: &VecDeque<WorldFrame>, render_time: f64) -> Vec<EntityState> {
    let frame = match frames.front() {
        Some(first) if render_time <= first.server_time => Some(first),
        _ => frames.back(),
    };
    frame.map(|f| f.entities.clone()).unwrap_or_default()
}

fn interpolate(a: &EntityState, b: &EntityState, alpha: f32) -> EntityState {
    let nearer = if alpha < 0.5 { a } else { b };
    EntityState {
        id: a.id,
        position: a.position.lerp(b.position, alpha),
        velocity: a.velocity.lerp(b.velocity, alpha),
        rotation: a.rotation.slerp(b.rotation, alpha),
        grounded: nearer.grounded,
        health: nearer.health,
    }
}

/// Everything the client knows about the match: its own predicted entity,
/// interpolated remote entities and outstanding casts
pub struct ClientGameState {
    local_entity_id: Option<u32>,
    predictor: ClientPredictor,
    predictor_ready: bool,
    local_alive: bool,
    local_health: Option<f32>,
    local_resource: Option<f32>,
    remote: RemoteWorld,
    interpolation_delay: f64,
    last_request_id: u32,
    pending_casts: HashMap<u32, f64>,
    recent_results: VecDeque<AbilityCastResult>,
}

impl ClientGameState {
    pub fn new(config: &NetcodeConfig) -> Self {
        let model = MovementModel::new(config.movement.clone(), config.world.bounds);
        let predictor = ClientPredictor::new(
            model,
            config.prediction.clone(),
            config.tick_dt(),
            MovementState::default(),
        );

        Self {
            local_entity_id: None,
            predictor,
            predictor_ready: false,
            local_alive: false,
            local_health: None,
            local_resource: None,
            remote: RemoteWorld::new(1.0),
            interpolation_delay: config.snapshot_interval * 2.0,
            last_request_id: 0,
            pending_casts: HashMap::new(),
            recent_results: VecDeque::new(),
        }
    }

    pub fn local_entity_id(&self) -> Option<u32> {
        self.local_entity_id
    }

    pub fn is_local_alive(&self) -> bool {
        self.local_alive
    }

    pub fn local_health(&self) -> Option<f32> {
        self.local_health
    }

    pub fn local_resource(&self) -> Option<f32> {
        self.local_resource
    }

    pub fn predicted_state(&self) -> Option<&MovementState> {
        self.predictor_ready.then(|| self.predictor.state())
    }

    pub fn prediction_stats(&self) -> PredictionStats {
        self.predictor.stats()
    }

    pub fn pending_cast_count(&self) -> usize {
        self.pending_casts.len()
    }

    pub fn recent_results(&self) -> impl Iterator<Item = &AbilityCastResult> {
        self.recent_results.iter()
    }

    pub fn on_connected(&mut self, entity_id: u32) {
        self.reset();
        self.local_entity_id = Some(entity_id);
    }

    /// Drops session state; request ids and input sequences keep counting up
    pub fn reset(&mut self) {
        self.local_entity_id = None;
        self.predictor_ready = false;
        self.local_alive = false;
        self.local_health = None;
        self.local_resource = None;
        self.remote.clear();
        self.pending_casts.clear();
    }

    pub fn apply_world_state(&mut self, server_time: f64, frame: u32, entities: Vec<EntityState>) {
        let local = self
            .local_entity_id
            .and_then(|id| entities.iter().find(|e| e.id == id).copied());

        if let Some(local) = local {
            let alive = local.health > 0.0;
            let respawned = alive && !self.local_alive && self.predictor_ready;

            if !self.predictor_ready || respawned {
                if respawned {
                    info!("Respawned at {:?}", local.position);
                }
                self.predictor.reset(MovementState {
                    position: local.position,
                    velocity: local.velocity,
                    grounded: local.grounded,
                });
                self.predictor_ready = true;
            }

            if !alive && self.local_alive {
                info!("Local entity died");
            }
            self.local_alive = alive;
            self.local_health = Some(local.health);
        }

        self.remote.push(WorldFrame {
            server_time,
            frame,
            entities,
        });
    }

    /// Predicts one tick; nothing is sent while dead or before the first
    /// world state places the local entity
    pub fn predict(&mut self, sample: &InputSample, server_time: f64) -> Option<MovementInput> {
        if !self.predictor_ready || !self.local_alive {
            return None;
        }
        Some(
            self.predictor
                .predict(sample.move_vector, sample.jump, sample.dash, server_time),
        )
    }

    pub fn apply_ack(&mut self, ack: &InputAck, now: f64) -> Option<ReconcileOutcome> {
        if !self.predictor_ready {
            return None;
        }
        Some(self.predictor.reconcile(ack, now))
    }

    /// Builds a cast request with a fresh id and remembers it until answered
    pub fn create_cast(
        &mut self,
        ability_index: u16,
        target_position: Vec3,
        target_direction: Vec3,
        client_timestamp: f64,
    ) -> AbilityCastRequest {
        self.expire_pending_casts(client_timestamp);
        self.last_request_id = next_sequence(self.last_request_id);
        self.pending_casts.insert(self.last_request_id, client_timestamp);
        AbilityCastRequest {
            request_id: self.last_request_id,
            ability_index,
            target_position,
            target_direction,
            client_timestamp,
        }
    }

    /// Forgets requests whose result never arrived; returns how many
    pub fn expire_pending_casts(&mut self, now: f64) -> usize {
        let before = self.pending_casts.len();
        self.pending_casts
            .retain(|_, sent| now - *sent < PENDING_CAST_TIMEOUT);
        let expired = before - self.pending_casts.len();
        if expired > 0 {
            debug!("{} cast requests went unanswered", expired);
        }
        expired
    }

    /// Returns true when the result answers one of our own requests
    pub fn apply_cast_result(&mut self, result: AbilityCastResult) -> bool {
        let ours = Some(result.caster_id) == self.local_entity_id;
        if ours {
            self.pending_casts.remove(&result.request_id);
            self.local_resource = Some(result.current_resource);
            if !result.approved {
                debug!(
                    "Cast {} denied: {:?}",
                    result.request_id, result.failure
                );
            }
        }

        self.recent_results.push_back(result);
        while self.recent_results.len() > RECENT_RESULTS {
            self.recent_results.pop_front();
        }
        ours
    }

    /// Entities to draw: remote ones interpolated behind the estimated
    /// server time, the local one at its predicted position
    pub fn render_entities(&self, server_time: f64, local_now: f64) -> Vec<EntityState> {
        let mut entities = self.remote.sample(server_time - self.interpolation_delay);

        if let (Some(id), true) = (self.local_entity_id, self.predictor_ready) {
            let state = self.predictor.state();
            let position = self.predictor.render_position(local_now);
            match entities.iter_mut().find(|e| e.id == id) {
                Some(entity) => {
                    entity.position = position;
                    entity.velocity = state.velocity;
                    entity.grounded = state.grounded;
                }
                None => {
                    if let Some(latest) = self
                        .remote
                        .latest()
                        .and_then(|frame| frame.entities.iter().find(|e| e.id == id))
                    {
                        entities.push(EntityState {
                            position,
                            velocity: state.velocity,
                            grounded: state.grounded,
                            ..*latest
                        });
                    }
                }
            }
        }

        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use glam::{Quat, Vec2};

    fn entity(id: u32, x: f32, health: f32) -> EntityState {
        EntityState {
            id,
            position: Vec3::new(x, 0.0, 0.0),
            velocity: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            grounded: true,
            health,
        }
    }

    fn frame(server_time: f64, entities: Vec<EntityState>) -> WorldFrame {
        WorldFrame {
            server_time,
            frame: 0,
            entities,
        }
    }

    #[test]
    fn test_remote_interpolates_between_frames() {
        let mut remote = RemoteWorld::new(1.0);
        remote.push(frame(1.0, vec![entity(2, 0.0, 100.0)]));
        remote.push(frame(1.1, vec![entity(2, 10.0, 90.0)]));

        let states = remote.sample(1.025);
        assert_eq!(states.len(), 1);
        assert_approx_eq!(states[0].position.x, 2.5, 1e-4);
        assert_eq!(states[0].health, 100.0);

        let states = remote.sample(1.08);
        assert_eq!(states[0].health, 90.0);
    }

    #[test]
    fn test_remote_clamps_outside_buffer() {
        let mut remote = RemoteWorld::new(1.0);
        remote.push(frame(1.0, vec![entity(2, 0.0, 100.0)]));
        remote.push(frame(1.1, vec![entity(2, 10.0, 100.0)]));

        assert_eq!(remote.sample(0.5)[0].position.x, 0.0);
        assert_eq!(remote.sample(5.0)[0].position.x, 10.0);
    }

    #[test]
    fn test_remote_drops_out_of_order_and_old_frames() {
        let mut remote = RemoteWorld::new(0.5);
        assert!(remote.push(frame(1.0, vec![])));
        assert!(!remote.push(frame(0.9, vec![])));
        assert!(remote.push(frame(1.2, vec![])));
        assert!(remote.push(frame(2.0, vec![])));
        assert_eq!(remote.len(), 2);
    }

    #[test]
    fn test_new_entities_appear_from_later_frame() {
        let mut remote = RemoteWorld::new(1.0);
        remote.push(frame(1.0, vec![entity(2, 0.0, 100.0)]));
        remote.push(frame(1.1, vec![entity(2, 1.0, 100.0), entity(3, 4.0, 100.0)]));

        let states = remote.sample(1.05);
        assert_eq!(states.len(), 2);
        assert!(states.iter().any(|e| e.id == 3 && e.position.x == 4.0));
    }

    #[test]
    fn test_prediction_waits_for_local_entity() {
        let config = NetcodeConfig::default();
        let mut game = ClientGameState::new(&config);
        let sample = InputSample {
            move_vector: Vec2::X,
            ..InputSample::default()
        };

        game.on_connected(1);
        assert!(game.predict(&sample, 0.0).is_none());

        game.apply_world_state(0.0, 1, vec![entity(1, 40.0, 100.0)]);
        let input = game.predict(&sample, 0.0).expect("prediction should start");
        assert_eq!(input.sequence, 1);
        assert!(game.predicted_state().unwrap().position.x > 40.0);
    }

    #[test]
    fn test_dead_entity_stops_predicting_and_respawn_resets() {
        let config = NetcodeConfig::default();
        let mut game = ClientGameState::new(&config);
        let sample = InputSample::default();

        game.on_connected(1);
        game.apply_world_state(0.0, 1, vec![entity(1, 0.0, 100.0)]);
        game.apply_world_state(0.1, 2, vec![entity(1, 0.0, 0.0)]);
        assert!(!game.is_local_alive());
        assert!(game.predict(&sample, 0.1).is_none());

        game.apply_world_state(3.2, 3, vec![entity(1, 40.0, 100.0)]);
        assert!(game.is_local_alive());
        assert_eq!(game.predicted_state().unwrap().position.x, 40.0);
    }

    #[test]
    fn test_cast_results_match_pending_requests() {
        let config = NetcodeConfig::default();
        let mut game = ClientGameState::new(&config);
        game.on_connected(1);

        let request = game.create_cast(0, Vec3::X, Vec3::X, 1.0);
        assert_eq!(request.request_id, 1);
        assert_eq!(game.pending_cast_count(), 1);

        let result = AbilityCastResult::approved(request.request_id, 1, 0, 80.0, 0.8, 0.5, vec![]);
        assert!(game.apply_cast_result(result));
        assert_eq!(game.pending_cast_count(), 0);
        assert_eq!(game.local_resource(), Some(80.0));

        let other = AbilityCastResult::approved(1, 7, 0, 50.0, 0.8, 0.5, vec![]);
        assert!(!game.apply_cast_result(other));
        assert_eq!(game.recent_results().count(), 2);
    }

    #[test]
    fn test_lost_cast_results_expire() {
        let config = NetcodeConfig::default();
        let mut game = ClientGameState::new(&config);
        game.on_connected(1);

        game.create_cast(0, Vec3::X, Vec3::X, 1.0);
        game.create_cast(0, Vec3::X, Vec3::X, 4.0);
        assert_eq!(game.pending_cast_count(), 2);

        assert_eq!(game.expire_pending_casts(5.5), 0);
        assert_eq!(game.expire_pending_casts(6.0), 1);
        assert_eq!(game.pending_cast_count(), 1);

        game.create_cast(0, Vec3::X, Vec3::X, 9.5);
        assert_eq!(game.pending_cast_count(), 1);
    }

    #[test]
    fn test_render_uses_predicted_local_position() {
        let config = NetcodeConfig::default();
        let mut game = ClientGameState::new(&config);
        game.on_connected(1);
        game.apply_world_state(1.0, 1, vec![entity(1, 0.0, 100.0), entity(2, 5.0, 100.0)]);

        let sample = InputSample {
            move_vector: Vec2::X,
            ..InputSample::default()
        };
        game.predict(&sample, 1.0);

        let entities = game.render_entities(1.0, 0.0);
        let local = entities.iter().find(|e| e.id == 1).unwrap();
        let remote = entities.iter().find(|e| e.id == 2).unwrap();
        assert!(local.position.x > 0.0);
        assert_eq!(remote.position.x, 5.0);
    }
}
