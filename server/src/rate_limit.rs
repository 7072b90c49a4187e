//! Per-connection cast frequency limits
//!
//! Every cast attempt that gets past the ownership and liveness checks is
//! counted, whether or not it is later approved, so spamming denied casts is
//! throttled as well.

use shared::config::RateLimitConfig;
use shared::protocol::CastFailure;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitState {
    pub window_start: f64,
    pub casts_in_window: u32,
    pub last_cast_time: Option<f64>,
    pub consecutive_rapid_casts: u32,
}

impl RateLimitState {
    fn new(now: f64) -> Self {
        Self {
            window_start: now,
            casts_in_window: 0,
            last_cast_time: None,
            consecutive_rapid_casts: 0,
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    states: HashMap<u32, RateLimitState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Counts one attempt and fails with `RateLimited` or `CastTooFrequent`
    /// when the client is over its budget
    pub fn check_and_record(&mut self, client_id: u32, now: f64) -> Result<(), CastFailure> {
        let config = &self.config;
        let state = self
            .states
            .entry(client_id)
            .or_insert_with(|| RateLimitState::new(now));

        if now - state.window_start >= config.window {
            state.window_start = now;
            state.casts_in_window = 0;
        }

        if state.casts_in_window >= config.max_casts_per_window {
            return Err(CastFailure::RateLimited);
        }

        if let Some(last) = state.last_cast_time {
            if now - last < config.min_cast_interval {
                state.consecutive_rapid_casts += 1;
                if state.consecutive_rapid_casts > config.max_consecutive_rapid_casts {
                    return Err(CastFailure::CastTooFrequent);
                }
            } else {
                state.consecutive_rapid_casts = 0;
            }
        }

        state.casts_in_window += 1;
        state.last_cast_time = Some(now);
        Ok(())
    }

    pub fn state(&self, client_id: u32) -> Option<&RateLimitState> {
        self.states.get(&client_id)
    }

    pub fn remove(&mut self, client_id: u32) {
        self.states.remove(&client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_casts: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window: 1.0,
            max_casts_per_window: max_casts,
            min_cast_interval: 0.1,
            max_consecutive_rapid_casts: 3,
        })
    }

    #[test]
    fn test_window_cap_and_reset() {
        let mut limiter = limiter(3);

        assert!(limiter.check_and_record(1, 0.0).is_ok());
        assert!(limiter.check_and_record(1, 0.1).is_ok());
        assert!(limiter.check_and_record(1, 0.2).is_ok());
        assert_eq!(
            limiter.check_and_record(1, 0.3),
            Err(CastFailure::RateLimited)
        );
        assert!(limiter.check_and_record(1, 1.1).is_ok());
    }

    #[test]
    fn test_rapid_casts_tolerated_up_to_limit() {
        let mut limiter = limiter(100);

        assert!(limiter.check_and_record(1, 0.00).is_ok());
        assert!(limiter.check_and_record(1, 0.01).is_ok());
        assert!(limiter.check_and_record(1, 0.02).is_ok());
        assert!(limiter.check_and_record(1, 0.03).is_ok());
        assert_eq!(
            limiter.check_and_record(1, 0.04),
            Err(CastFailure::CastTooFrequent)
        );
    }

    #[test]
    fn test_spaced_cast_resets_rapid_counter() {
        let mut limiter = limiter(100);

        limiter.check_and_record(1, 0.00).unwrap();
        limiter.check_and_record(1, 0.01).unwrap();
        limiter.check_and_record(1, 0.02).unwrap();
        limiter.check_and_record(1, 0.50).unwrap();

        assert_eq!(limiter.state(1).unwrap().consecutive_rapid_casts, 0);
    }

    #[test]
    fn test_clients_are_independent() {
        let mut limiter = limiter(1);

        assert!(limiter.check_and_record(1, 0.0).is_ok());
        assert!(limiter.check_and_record(2, 0.0).is_ok());
        assert_eq!(
            limiter.check_and_record(1, 0.5),
            Err(CastFailure::RateLimited)
        );
    }

    #[test]
    fn test_remove_clears_state() {
        let mut limiter = limiter(1);
        limiter.check_and_record(1, 0.0).unwrap();
        limiter.remove(1);
        assert!(limiter.state(1).is_none());
        assert!(limiter.check_and_record(1, 0.1).is_ok());
    }
}
