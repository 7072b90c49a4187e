//! Wire protocol shared by client and server
//!
//! Every message travels as a single [`Packet`] serialized with `bincode`.
//! Numeric fields are fixed width and the only variable-length payloads are
//! bounded (hit lists are capped at [`MAX_HIT_RESULTS`], world states carry one
//! entry per live entity).

use glam::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MAX_HIT_RESULTS;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
    },
    Input(MovementInput),
    CastAbility(AbilityCastRequest),
    Attack(AttackRequest),
    Pong {
        server_time: f64,
    },
    Disconnect,

    // Server -> client
    Connected {
        client_id: u32,
        entity_id: u32,
        server_time: f64,
        server_frame: u32,
    },
    ConnectionRejected {
        code: u16,
        reason: String,
    },
    InputAck(InputAck),
    CastResult(AbilityCastResult),
    WorldState {
        server_time: f64,
        frame: u32,
        entities: Vec<EntityState>,
    },
    Ping {
        server_time: f64,
        rtt: f64,
    },
    Disconnected {
        reason: String,
    },
    Kicked {
        reason: String,
    },
}

/// One tick of player movement intent, produced by the owning client
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct MovementInput {
    /// Ground-plane direction (x -> world x, y -> world z), magnitude <= 1
    pub move_vector: Vec2,
    pub jump_pressed: bool,
    pub dash_pressed: bool,
    /// Client simulation frame this input was sampled on
    pub frame: u32,
    /// Client estimate of server time when the input was sampled (seconds)
    pub timestamp: f64,
    /// Monotonic per-client sequence number, never 0
    pub sequence: u32,
    pub checksum: u16,
}

impl MovementInput {
    /// Builds an input and seals it with its checksum
    pub fn new(
        move_vector: Vec2,
        jump_pressed: bool,
        dash_pressed: bool,
        frame: u32,
        timestamp: f64,
        sequence: u32,
    ) -> Self {
        let mut input = Self {
            move_vector,
            jump_pressed,
            dash_pressed,
            frame,
            timestamp,
            sequence,
            checksum: 0,
        };
        input.checksum = input.compute_checksum();
        input
    }

    /// FNV-1a over every field except the checksum, folded to 16 bits
    pub fn compute_checksum(&self) -> u16 {
        const OFFSET: u32 = 0x811c_9dc5;
        const PRIME: u32 = 0x0100_0193;

        let flags = (self.jump_pressed as u8) | ((self.dash_pressed as u8) << 1);

        let mut hash = OFFSET;
        let mut feed = |bytes: &[u8]| {
            for byte in bytes {
                hash ^= *byte as u32;
                hash = hash.wrapping_mul(PRIME);
            }
        };

        feed(&self.move_vector.x.to_bits().to_le_bytes());
        feed(&self.move_vector.y.to_bits().to_le_bytes());
        feed(&[flags]);
        feed(&self.frame.to_le_bytes());
        feed(&self.timestamp.to_bits().to_le_bytes());
        feed(&self.sequence.to_le_bytes());

        ((hash >> 16) ^ (hash & 0xffff)) as u16
    }

    pub fn has_valid_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/// Authoritative result of applying one client input on the server
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct InputAck {
    pub sequence: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub grounded: bool,
    pub server_frame: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct AbilityCastRequest {
    /// Monotonic per-client request id, never 0
    pub request_id: u32,
    pub ability_index: u16,
    pub target_position: Vec3,
    pub target_direction: Vec3,
    /// Client estimate of server time when the cast was issued
    pub client_timestamp: f64,
}

/// Targeted basic attack carrying the hit point the client observed
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct AttackRequest {
    pub request_id: u32,
    pub ability_index: u16,
    pub target_id: u32,
    pub hit_point: Vec3,
    pub client_timestamp: f64,
}

/// Why the server refused a cast or attack
#[derive(Debug, Error, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CastFailure {
    #[error("unknown ability")]
    InvalidAbility = 1,
    #[error("caster is dead")]
    CasterDead = 2,
    #[error("too many casts in the rate-limit window")]
    RateLimited = 3,
    #[error("casting too frequently")]
    CastTooFrequent = 4,
    #[error("global cooldown active")]
    GlobalCooldown = 5,
    #[error("ability on cooldown")]
    AbilityCooldown = 6,
    #[error("not enough resource")]
    InsufficientResource = 7,
    #[error("target outside map bounds")]
    OutOfBounds = 8,
    #[error("target out of range")]
    OutOfRange = 9,
    #[error("no line of sight to target")]
    NoLineOfSight = 10,
    #[error("invalid target")]
    InvalidTarget = 11,
    #[error("reported hit does not match target position")]
    HitRejected = 12,
}

impl CastFailure {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct HitResult {
    pub target_id: u32,
    pub applied_damage: f32,
    pub remaining_health: f32,
    pub is_dead: bool,
}

/// Server verdict for one cast or attack request, broadcast to interested clients
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AbilityCastResult {
    pub request_id: u32,
    pub caster_id: u32,
    pub ability_index: u16,
    pub approved: bool,
    pub failure: Option<CastFailure>,
    pub current_resource: f32,
    pub cooldown_remaining: f32,
    pub global_cooldown_remaining: f32,
    pub hits: Vec<HitResult>,
}

impl AbilityCastResult {
    pub fn approved(
        request_id: u32,
        caster_id: u32,
        ability_index: u16,
        current_resource: f32,
        cooldown_remaining: f32,
        global_cooldown_remaining: f32,
        mut hits: Vec<HitResult>,
    ) -> Self {
        hits.truncate(MAX_HIT_RESULTS);
        Self {
            request_id,
            caster_id,
            ability_index,
            approved: true,
            failure: None,
            current_resource,
            cooldown_remaining,
            global_cooldown_remaining,
            hits,
        }
    }

    pub fn denied(
        request_id: u32,
        caster_id: u32,
        ability_index: u16,
        failure: CastFailure,
        current_resource: f32,
        cooldown_remaining: f32,
        global_cooldown_remaining: f32,
    ) -> Self {
        Self {
            request_id,
            caster_id,
            ability_index,
            approved: false,
            failure: Some(failure),
            current_resource,
            cooldown_remaining,
            global_cooldown_remaining,
            hits: Vec::new(),
        }
    }

    /// Approved results never carry a failure and vice versa; hit lists are bounded
    pub fn is_well_formed(&self) -> bool {
        self.approved == self.failure.is_none()
            && self.hits.len() <= MAX_HIT_RESULTS
            && (self.approved || self.hits.is_empty())
    }
}

/// Replicated view of one entity inside a world-state broadcast
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct EntityState {
    pub id: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub grounded: bool,
    pub health: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::{deserialize, serialize};

    fn sample_input() -> MovementInput {
        MovementInput::new(Vec2::new(0.6, -0.8), true, false, 42, 12.5, 7)
    }

    #[test]
    fn test_checksum_sealed_on_creation() {
        let input = sample_input();
        assert!(input.has_valid_checksum());
    }

    #[test]
    fn test_checksum_detects_tampering() {
        let mut input = sample_input();
        input.move_vector.x = 1.0;
        assert!(!input.has_valid_checksum());

        let mut input = sample_input();
        input.dash_pressed = true;
        assert!(!input.has_valid_checksum());

        let mut input = sample_input();
        input.sequence += 1;
        assert!(!input.has_valid_checksum());
    }

    #[test]
    fn test_checksum_is_deterministic() {
        assert_eq!(sample_input().checksum, sample_input().checksum);
    }

    #[test]
    fn test_input_survives_wire() {
        let packet = Packet::Input(sample_input());
        let bytes = serialize(&packet).unwrap();
        let decoded: Packet = deserialize(&bytes).unwrap();

        match decoded {
            Packet::Input(input) => {
                assert_eq!(input, sample_input());
                assert!(input.has_valid_checksum());
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_cast_result_survives_wire() {
        let hits = vec![HitResult {
            target_id: 9,
            applied_damage: 25.0,
            remaining_health: 0.0,
            is_dead: true,
        }];
        let result = AbilityCastResult::approved(3, 1, 2, 40.0, 4.0, 0.5, hits);
        let bytes = serialize(&Packet::CastResult(result.clone())).unwrap();

        match deserialize::<Packet>(&bytes).unwrap() {
            Packet::CastResult(decoded) => {
                assert_eq!(decoded, result);
                assert!(decoded.is_well_formed());
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_approved_result_is_bounded() {
        let hits = (0..40)
            .map(|i| HitResult {
                target_id: i,
                applied_damage: 1.0,
                remaining_health: 10.0,
                is_dead: false,
            })
            .collect();
        let result = AbilityCastResult::approved(1, 1, 0, 0.0, 0.0, 0.0, hits);
        assert_eq!(result.hits.len(), MAX_HIT_RESULTS);
        assert!(result.is_well_formed());
    }

    #[test]
    fn test_denied_result_carries_failure() {
        let result =
            AbilityCastResult::denied(5, 2, 1, CastFailure::AbilityCooldown, 10.0, 2.5, 0.0);
        assert!(!result.approved);
        assert_eq!(result.failure, Some(CastFailure::AbilityCooldown));
        assert!(result.hits.is_empty());
        assert!(result.is_well_formed());
    }

    #[test]
    fn test_failure_codes_are_distinct() {
        let codes = [
            CastFailure::InvalidAbility,
            CastFailure::CasterDead,
            CastFailure::RateLimited,
            CastFailure::CastTooFrequent,
            CastFailure::GlobalCooldown,
            CastFailure::AbilityCooldown,
            CastFailure::InsufficientResource,
            CastFailure::OutOfBounds,
            CastFailure::OutOfRange,
            CastFailure::NoLineOfSight,
            CastFailure::InvalidTarget,
            CastFailure::HitRejected,
        ]
        .map(CastFailure::code);

        let mut unique = codes.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
    }
}
