//! Client-side prediction and server reconciliation for the locally owned entity
//!
//! Every local tick the sampled input is applied immediately with the shared
//! [`MovementModel`] and remembered together with the state it produced. When
//! the server acknowledges an input, the authoritative result is compared
//! with what was predicted for that same input:
//!
//! - within `reconciliation_threshold`: the prediction was right, nothing to do
//! - beyond it, with rollback enabled: snap to the server state and replay
//!   every newer buffered input
//! - beyond it, with rollback disabled or the predicted frame already evicted:
//!   move the simulation onto the corrected path but blend the rendered
//!   position over `smoothing_duration`
//!
//! Each acknowledgment is processed at most once; stale or duplicate acks are
//! ignored.

use glam::{Vec2, Vec3};
use log::debug;
use shared::config::PredictionConfig;
use shared::movement::{MovementModel, MovementState};
use shared::next_sequence;
use shared::protocol::{InputAck, MovementInput};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedFrame {
    pub input: MovementInput,
    /// State right after applying `input`
    pub state: MovementState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// Ack older than or equal to one already processed
    Stale,
    Confirmed { error: f32 },
    Rollback { error: f32, replayed: usize },
    Smoothed { error: f32 },
}

impl ReconcileOutcome {
    pub fn is_correction(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Rollback { .. } | ReconcileOutcome::Smoothed { .. }
        )
    }
}

/// Render-only offset that shrinks linearly to zero
#[derive(Debug, Clone, Copy)]
struct VisualCorrection {
    offset: Vec3,
    started: f64,
    duration: f64,
}

impl VisualCorrection {
    fn offset_at(&self, now: f64) -> Vec3 {
        if self.duration <= 0.0 {
            return Vec3::ZERO;
        }
        let remaining = 1.0 - ((now - self.started) / self.duration).clamp(0.0, 1.0);
        self.offset * remaining as f32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictionStats {
    pub confirmed: u64,
    pub rollbacks: u64,
    pub smoothed: u64,
    pub replayed_inputs: u64,
}

pub struct ClientPredictor {
    model: MovementModel,
    config: PredictionConfig,
    dt: f32,
    state: MovementState,
    history: VecDeque<PredictedFrame>,
    last_sequence: u32,
    frame: u32,
    last_acknowledged: u32,
    correction: Option<VisualCorrection>,
    stats: PredictionStats,
}

impl ClientPredictor {
    pub fn new(model: MovementModel, config: PredictionConfig, dt: f32, start: MovementState) -> Self {
        Self {
            model,
            config,
            dt,
            state: start,
            history: VecDeque::new(),
            last_sequence: 0,
            frame: 0,
            last_acknowledged: 0,
            correction: None,
            stats: PredictionStats::default(),
        }
    }

    /// Forgets all buffered predictions and restarts from `state`; sequence
    /// numbers keep increasing
    pub fn reset(&mut self, state: MovementState) {
        self.state = state;
        self.history.clear();
        self.correction = None;
    }

    pub fn state(&self) -> &MovementState {
        &self.state
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn last_acknowledged(&self) -> u32 {
        self.last_acknowledged
    }

    pub fn pending_count(&self) -> usize {
        self.history.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PredictedFrame> {
        self.history.iter()
    }

    pub fn stats(&self) -> PredictionStats {
        self.stats
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    /// Applies one tick of input locally and returns the sealed input to send
    pub fn predict(&mut self, move_vector: Vec2, jump: bool, dash: bool, timestamp: f64) -> MovementInput {
        self.last_sequence = next_sequence(self.last_sequence);
        self.frame = self.frame.wrapping_add(1);

        let input = MovementInput::new(move_vector, jump, dash, self.frame, timestamp, self.last_sequence);
        self.state = self.model.step(&self.state, &input, self.dt);

        self.history.push_back(PredictedFrame {
            input,
            state: self.state,
        });
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }

        input
    }

    /// Compares an authoritative ack with the matching prediction
    pub fn reconcile(&mut self, ack: &InputAck, now: f64) -> ReconcileOutcome {
        if ack.sequence <= self.last_acknowledged {
            return ReconcileOutcome::Stale;
        }
        self.last_acknowledged = ack.sequence;

        let predicted = self
            .history
            .iter()
            .find(|frame| frame.input.sequence == ack.sequence)
            .map(|frame| frame.state);
        self.history.retain(|frame| frame.input.sequence > ack.sequence);

        let authoritative = MovementState {
            position: ack.position,
            velocity: ack.velocity,
            grounded: ack.grounded,
        };

        match predicted {
            Some(predicted) => {
                let error = predicted.position.distance(ack.position);
                if error <= self.config.reconciliation_threshold {
                    self.stats.confirmed += 1;
                    return ReconcileOutcome::Confirmed { error };
                }

                if self.config.rollback_enabled {
                    let replayed = self.replay_from(authoritative);
                    self.stats.rollbacks += 1;
                    self.stats.replayed_inputs += replayed as u64;
                    debug!(
                        "Rollback after ack {}: error {:.3}, replayed {} inputs",
                        ack.sequence, error, replayed
                    );
                    ReconcileOutcome::Rollback { error, replayed }
                } else {
                    // Shift the whole predicted path by the observed error
                    let delta = ack.position - predicted.position;
                    let before = self.state.position;
                    self.state.position = self.model.bounds.clamp(self.state.position + delta);
                    for frame in self.history.iter_mut() {
                        frame.state.position = self.model.bounds.clamp(frame.state.position + delta);
                    }
                    self.begin_smoothing(before, now);
                    self.stats.smoothed += 1;
                    debug!("Smoothing correction after ack {}: error {:.3}", ack.sequence, error);
                    ReconcileOutcome::Smoothed { error }
                }
            }
            None => {
                // Predicted frame already evicted; rebuild from the server state
                let before = self.state.position;
                self.replay_from(authoritative);
                let error = before.distance(self.state.position);
                if error <= self.config.reconciliation_threshold {
                    self.stats.confirmed += 1;
                    return ReconcileOutcome::Confirmed { error };
                }
                self.begin_smoothing(before, now);
                self.stats.smoothed += 1;
                debug!(
                    "No prediction buffered for ack {}, smoothing error {:.3}",
                    ack.sequence, error
                );
                ReconcileOutcome::Smoothed { error }
            }
        }
    }

    /// Snaps to `authoritative` and re-simulates every buffered input
    fn replay_from(&mut self, authoritative: MovementState) -> usize {
        self.state = authoritative;
        for frame in self.history.iter_mut() {
            self.state = self.model.step(&self.state, &frame.input, self.dt);
            frame.state = self.state;
        }
        self.history.len()
    }

    fn begin_smoothing(&mut self, rendered_before: Vec3, now: f64) {
        let carried = self
            .correction
            .map_or(Vec3::ZERO, |correction| correction.offset_at(now));
        self.correction = Some(VisualCorrection {
            offset: rendered_before + carried - self.state.position,
            started: now,
            duration: self.config.smoothing_duration as f64,
        });
    }

    /// Where the local entity should be drawn at `now`
    pub fn render_position(&self, now: f64) -> Vec3 {
        let offset = self
            .correction
            .map_or(Vec3::ZERO, |correction| correction.offset_at(now));
        self.state.position + offset
    }
}
