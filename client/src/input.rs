//! Client input sampling for headless play
//!
//! There is no window to read keys from, so input comes from a scripted
//! [`BotDriver`]. The [`InputManager`] wraps it with the cast cadence so the
//! network loop only asks "what does the player do this tick".

use clap::ValueEnum;
use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Movement intent for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputSample {
    pub move_vector: Vec2,
    pub jump: bool,
    pub dash: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BotPattern {
    /// Stand still
    Idle,
    /// Walk a circle with a period of a few seconds
    Circle,
    /// Pick a new random heading every second or so, occasionally jumping or dashing
    RandomWalk,
}

/// Seconds for one lap of the circle pattern
const CIRCLE_PERIOD: f64 = 6.0;

pub struct BotDriver {
    pattern: BotPattern,
    rng: StdRng,
    heading: Vec2,
    next_turn: f64,
    dash: bool,
}

impl BotDriver {
    pub fn new(pattern: BotPattern, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            pattern,
            rng,
            heading: Vec2::X,
            next_turn: 0.0,
            dash: false,
        }
    }

    pub fn pattern(&self) -> BotPattern {
        self.pattern
    }

    pub fn sample(&mut self, now: f64) -> InputSample {
        match self.pattern {
            BotPattern::Idle => InputSample::default(),
            BotPattern::Circle => {
                let angle = (now / CIRCLE_PERIOD * std::f64::consts::TAU) as f32;
                self.heading = Vec2::new(angle.cos(), angle.sin());
                InputSample {
                    move_vector: self.heading,
                    ..InputSample::default()
                }
            }
            BotPattern::RandomWalk => {
                let mut jump = false;
                if now >= self.next_turn {
                    let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
                    self.heading = Vec2::new(angle.cos(), angle.sin());
                    self.next_turn = now + self.rng.gen_range(0.5..1.5);
                    self.dash = self.rng.gen_bool(0.2);
                    jump = self.rng.gen_bool(0.25);
                }
                InputSample {
                    move_vector: self.heading,
                    jump,
                    dash: self.dash,
                }
            }
        }
    }

    /// Current facing on the ground plane
    pub fn facing(&self) -> Vec3 {
        Vec3::new(self.heading.x, 0.0, self.heading.y)
    }
}

/// A cast the player wants to issue this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CastIntent {
    pub ability_index: u16,
    pub target_position: Vec3,
    pub target_direction: Vec3,
}

pub struct InputManager {
    driver: BotDriver,
    current_input: InputSample,
    cast_interval: Option<f64>,
    last_cast: Option<f64>,
    next_ability: u16,
    ability_count: u16,
}

impl InputManager {
    /// `cast_interval` of `None` never casts
    pub fn new(driver: BotDriver, cast_interval: Option<f64>, ability_count: u16) -> Self {
        Self {
            driver,
            current_input: InputSample::default(),
            cast_interval,
            last_cast: None,
            next_ability: 0,
            ability_count,
        }
    }

    pub fn update(&mut self, now: f64) -> InputSample {
        self.current_input = self.driver.sample(now);
        self.current_input
    }

    pub fn get_current_input(&self) -> &InputSample {
        &self.current_input
    }

    /// Cycles through the ability table, aiming a few units ahead of `origin`
    pub fn cast_intent(&mut self, now: f64, origin: Vec3) -> Option<CastIntent> {
        let interval = self.cast_interval?;
        if self.ability_count == 0 {
            return None;
        }
        if self.last_cast.map_or(false, |last| now - last < interval) {
            return None;
        }
        self.last_cast = Some(now);

        let ability_index = self.next_ability;
        self.next_ability = (self.next_ability + 1) % self.ability_count;

        let direction = self.driver.facing();
        Some(CastIntent {
            ability_index,
            target_position: origin + direction * 2.5,
            target_direction: direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_idle_bot_stands_still() {
        let mut driver = BotDriver::new(BotPattern::Idle, Some(1));
        assert_eq!(driver.sample(3.0), InputSample::default());
    }

    #[test]
    fn test_circle_bot_rotates_heading() {
        let mut driver = BotDriver::new(BotPattern::Circle, Some(1));
        let start = driver.sample(0.0);
        let quarter = driver.sample(CIRCLE_PERIOD / 4.0);

        assert_approx_eq!(start.move_vector.x, 1.0, 1e-5);
        assert_approx_eq!(quarter.move_vector.y, 1.0, 1e-5);
        assert_approx_eq!(quarter.move_vector.length(), 1.0, 1e-5);
    }

    #[test]
    fn test_random_walk_is_seeded_and_unit_length() {
        let mut a = BotDriver::new(BotPattern::RandomWalk, Some(42));
        let mut b = BotDriver::new(BotPattern::RandomWalk, Some(42));
        for i in 0..50 {
            let t = i as f64 * 0.1;
            let sample = a.sample(t);
            assert_eq!(sample, b.sample(t));
            assert!(sample.move_vector.length() <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn test_casts_follow_interval_and_cycle_abilities() {
        let driver = BotDriver::new(BotPattern::Idle, Some(1));
        let mut input = InputManager::new(driver, Some(1.0), 3);

        let first = input.cast_intent(0.0, Vec3::ZERO).unwrap();
        assert_eq!(first.ability_index, 0);
        assert_eq!(first.target_position, Vec3::new(2.5, 0.0, 0.0));
        assert!(input.cast_intent(0.5, Vec3::ZERO).is_none());
        assert_eq!(input.cast_intent(1.0, Vec3::ZERO).unwrap().ability_index, 1);
        assert_eq!(input.cast_intent(2.0, Vec3::ZERO).unwrap().ability_index, 2);
        assert_eq!(input.cast_intent(3.0, Vec3::ZERO).unwrap().ability_index, 0);
    }

    #[test]
    fn test_no_casts_without_interval() {
        let driver = BotDriver::new(BotPattern::Circle, Some(1));
        let mut input = InputManager::new(driver, None, 3);
        assert!(input.cast_intent(10.0, Vec3::ZERO).is_none());
    }
}
