//! Monotonic time in seconds
//!
//! Gameplay code reads time through [`Clock`] rather than calling
//! `Instant::now()` so tests can drive the simulation deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Seconds since this clock's origin
    fn now(&self) -> f64;
}

/// Wall clock anchored at construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Test clock advanced by hand; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    pub fn set(&self, seconds: f64) {
        let micros = (seconds.max(0.0) * 1_000_000.0).round() as u64;
        self.micros.store(micros, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        let delta = (seconds.max(0.0) * 1_000_000.0).round() as u64;
        self.micros.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1.5);
        assert_approx_eq!(clock.now(), 1.5, 1e-9);

        clock.advance(0.25);
        assert_approx_eq!(clock.now(), 1.75, 1e-9);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(0.0);
        let other = clock.clone();
        clock.advance(2.0);
        assert_approx_eq!(other.now(), 2.0, 1e-9);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
