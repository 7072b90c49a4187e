//! Gate for client movement inputs before they reach the simulation
//!
//! A rejected input is logged and dropped. It is never applied and never
//! acknowledged; the client's prediction for it is corrected by the next
//! acknowledgment it does receive.

use shared::config::InputValidationConfig;
use shared::protocol::MovementInput;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum InputRejection {
    #[error("sequence number 0 is reserved")]
    ZeroSequence,
    #[error("checksum mismatch (got {got:#06x}, expected {expected:#06x})")]
    BadChecksum { got: u16, expected: u16 },
    #[error("non-finite input values")]
    NonFinite,
    #[error("move vector magnitude {magnitude:.3} exceeds limit")]
    ExcessiveMagnitude { magnitude: f32 },
    #[error("timestamp {delta:.3}s away from server time")]
    StaleTimestamp { delta: f64 },
    #[error("sequence {sequence} not after last accepted {last}")]
    OutOfOrder { sequence: u32, last: u32 },
    #[error("frame {frame} too far ahead of {last}")]
    FrameTooFarAhead { frame: u32, last: u32 },
    #[error("pending input queue is full")]
    QueueFull,
}

#[derive(Debug, Clone)]
pub struct InputValidator {
    config: InputValidationConfig,
}

impl InputValidator {
    pub fn new(config: InputValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InputValidationConfig {
        &self.config
    }

    /// `last_sequence` is the newest sequence already accepted from this
    /// client (0 if none) and `last_frame` that input's frame
    pub fn validate(
        &self,
        input: &MovementInput,
        last_sequence: u32,
        last_frame: Option<u32>,
        server_time: f64,
    ) -> Result<(), InputRejection> {
        if input.sequence == 0 {
            return Err(InputRejection::ZeroSequence);
        }

        let expected = input.compute_checksum();
        if input.checksum != expected {
            return Err(InputRejection::BadChecksum {
                got: input.checksum,
                expected,
            });
        }

        if !input.move_vector.is_finite() || !input.timestamp.is_finite() {
            return Err(InputRejection::NonFinite);
        }

        let magnitude = input.move_vector.length();
        if magnitude > 1.0 + self.config.magnitude_epsilon {
            return Err(InputRejection::ExcessiveMagnitude { magnitude });
        }

        let delta = input.timestamp - server_time;
        if delta.abs() > self.config.timestamp_tolerance {
            return Err(InputRejection::StaleTimestamp { delta });
        }

        if input.sequence <= last_sequence {
            return Err(InputRejection::OutOfOrder {
                sequence: input.sequence,
                last: last_sequence,
            });
        }

        if let Some(last) = last_frame {
            if input.frame > last.saturating_add(self.config.max_frame_lead) {
                return Err(InputRejection::FrameTooFarAhead {
                    frame: input.frame,
                    last,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn validator() -> InputValidator {
        InputValidator::new(InputValidationConfig::default())
    }

    fn input(sequence: u32, frame: u32, timestamp: f64) -> MovementInput {
        MovementInput::new(Vec2::new(0.6, 0.8), false, false, frame, timestamp, sequence)
    }

    #[test]
    fn test_valid_input_accepted() {
        assert!(validator().validate(&input(1, 1, 10.0), 0, None, 10.05).is_ok());
    }

    #[test]
    fn test_zero_sequence_rejected() {
        assert_eq!(
            validator().validate(&input(0, 1, 10.0), 0, None, 10.0),
            Err(InputRejection::ZeroSequence)
        );
    }

    #[test]
    fn test_tampered_input_rejected() {
        let mut tampered = input(1, 1, 10.0);
        tampered.move_vector = Vec2::new(1.0, 0.0);
        assert!(matches!(
            validator().validate(&tampered, 0, None, 10.0),
            Err(InputRejection::BadChecksum { .. })
        ));
    }

    #[test]
    fn test_magnitude_epsilon() {
        let v = validator();
        let slightly_over = MovementInput::new(Vec2::new(1.005, 0.0), false, false, 1, 10.0, 1);
        assert!(v.validate(&slightly_over, 0, None, 10.0).is_ok());

        let way_over = MovementInput::new(Vec2::new(3.0, 0.0), false, false, 1, 10.0, 1);
        assert!(matches!(
            v.validate(&way_over, 0, None, 10.0),
            Err(InputRejection::ExcessiveMagnitude { .. })
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let nan = MovementInput::new(Vec2::new(f32::NAN, 0.0), false, false, 1, 10.0, 1);
        assert_eq!(
            validator().validate(&nan, 0, None, 10.0),
            Err(InputRejection::NonFinite)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        assert!(matches!(
            validator().validate(&input(1, 1, 5.0), 0, None, 10.0),
            Err(InputRejection::StaleTimestamp { .. })
        ));
        assert!(matches!(
            validator().validate(&input(1, 1, 15.0), 0, None, 10.0),
            Err(InputRejection::StaleTimestamp { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_old_sequences_rejected() {
        let v = validator();
        assert!(matches!(
            v.validate(&input(5, 5, 10.0), 5, Some(5), 10.0),
            Err(InputRejection::OutOfOrder { .. })
        ));
        assert!(matches!(
            v.validate(&input(4, 4, 10.0), 5, Some(5), 10.0),
            Err(InputRejection::OutOfOrder { .. })
        ));
        assert!(v.validate(&input(9, 9, 10.0), 5, Some(5), 10.0).is_ok());
    }

    #[test]
    fn test_frame_lead_limit() {
        let v = validator();
        assert!(v.validate(&input(2, 120, 10.0), 1, Some(0), 10.0).is_ok());
        assert!(matches!(
            v.validate(&input(2, 121, 10.0), 1, Some(0), 10.0),
            Err(InputRejection::FrameTooFarAhead { .. })
        ));
    }
}
