//! # Arena Server Library
//!
//! This library provides the authoritative server for the arena netcode core.
//! It owns the canonical world, applies validated client inputs at a fixed
//! tick rate, resolves ability casts against lag-compensated history, and
//! broadcasts snapshots so clients can reconcile and interpolate.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Movement is stepped with the same deterministic model the client uses for
//! prediction. Each applied input is acknowledged with the resulting state so
//! the owning client can detect and correct mispredictions.
//!
//! ### Lag Compensation
//! Every tick the server records a snapshot of each entity. When a cast or
//! attack arrives, targets are rewound to where the shooter saw them, using
//! the client timestamp and half of the measured round trip, bounded by a
//! configured maximum.
//!
//! ### Cast Validation
//! Ability requests pass through a fixed sequence of checks (ownership, life,
//! rate limit, ability, cooldowns, resource, targeting) before anything is
//! committed. Every non-ignored request produces exactly one result.
//!
//! ### Anti-Cheat
//! Authoritative positions are compared tick over tick for impossible speed
//! or teleports. Violations accumulate suspicion that decays over time; too
//! much gets the client kicked.
//!
//! ## Module Organization
//!
//! - `client_manager`: session registry, per-client input queues and RTT
//! - `world`: players and training dummies, damage and respawn
//! - `snapshot_history`: per-entity ring buffer with interpolated queries
//! - `lag_compensation`: rewind time and hit tolerance checks
//! - `input_validation`: gate for movement inputs
//! - `rate_limit`: sliding-window cast limiter
//! - `abilities`: ability table and per-caster cooldown/resource state
//! - `validation`: the cast and attack validation pipeline
//! - `anti_cheat`: movement checks and suspicion bookkeeping
//! - `context`: composition root wiring all of the above together
//! - `network`: UDP transport and the tick loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::context::ServerContext;
//! use server::network::Server;
//! use shared::clock::SystemClock;
//! use shared::config::NetcodeConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let context = ServerContext::new(NetcodeConfig::default(), 16, None);
//!     let mut server = Server::new("127.0.0.1:8080", context, Arc::new(SystemClock::new())).await?;
//!
//!     // Runs until a Shutdown message arrives on `server.command_sender()`
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The server uses an event-driven architecture with internal async tasks:
//! - **Network Receiver**: continuously listens for incoming packets
//! - **Network Sender**: drains the outgoing packet queue
//! - **Main Game Loop**: feeds packets to the context and ticks it

pub mod abilities;
pub mod anti_cheat;
pub mod client_manager;
pub mod context;
pub mod input_validation;
pub mod lag_compensation;
pub mod network;
pub mod rate_limit;
pub mod snapshot_history;
pub mod validation;
pub mod world;
