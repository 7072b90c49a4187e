//! # Shared Netcode Core
//!
//! Types and simulation code used by both the authoritative server and the
//! predicting client. Anything that must produce identical results on both
//! ends of the wire lives here.
//!
//! ## Contents
//!
//! ### Wire Protocol (`protocol`)
//! A single [`protocol::Packet`] enum serialized with `bincode` carries every
//! message: connection handshake, movement inputs and their acknowledgments,
//! ability casts and targeted attacks with their results, world-state
//! broadcasts and RTT pings. Movement inputs carry a checksum over their
//! fields so the server can reject corrupted or hand-edited packets.
//!
//! ### Movement Simulation (`movement`)
//! Deterministic fixed-timestep movement. The client runs it to predict its own
//! entity, the server runs it to produce the authoritative state, and the client
//! replays it during reconciliation. Same inputs, same order, same result.
//!
//! ### Connection Lifecycle (`connection`)
//! The session state machine (disconnected, connecting, connected,
//! reconnecting, error) with cooldown-gated reconnection, a capped attempt
//! count and typed error codes. It never touches a socket directly; it emits
//! actions for the surrounding transport to carry out.
//!
//! ### Infrastructure
//! - `clock`: monotonic time source with a manual clock for tests
//! - `config`: TOML-backed configuration with defaults and validation
//! - `events`: typed publish/subscribe over tokio channels
//! - `timers`: cancellable deadline queue drained once per tick
//! - `geometry`: map bounds and line-of-sight obstacles

pub mod clock;
pub mod config;
pub mod connection;
pub mod events;
pub mod geometry;
pub mod movement;
pub mod protocol;
pub mod timers;

pub use glam::{Quat, Vec2, Vec3};

/// Bumped whenever the wire format changes incompatibly
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on hit entries carried by one cast result
pub const MAX_HIT_RESULTS: usize = 16;

/// Largest datagram either side will send or accept
pub const MAX_PACKET_SIZE: usize = 2048;

/// Sequence numbers and request ids start at 1; 0 is reserved as "none"
pub fn next_sequence(current: u32) -> u32 {
    match current.wrapping_add(1) {
        0 => 1,
        n => n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_sequence_skips_zero() {
        assert_eq!(next_sequence(0), 1);
        assert_eq!(next_sequence(41), 42);
        assert_eq!(next_sequence(u32::MAX), 1);
    }
}
