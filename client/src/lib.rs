//! # Arena Client Library
//!
//! This library provides the client side of the arena netcode core: predicting
//! the locally owned entity, reconciling with server acknowledgments,
//! interpolating everyone else, and keeping a session alive through the shared
//! connection state machine. It runs headless; input comes from scripted bots.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Each tick the sampled input is applied immediately with the same movement
//! model the server uses, then sent with a sequence number and checksum. The
//! predicted state is kept next to the input until the server acknowledges it.
//!
//! ### Server Reconciliation
//! An acknowledgment carries the authoritative state after that input. If it
//! matches the prediction within a small threshold nothing happens. Otherwise
//! the client snaps to the server state and replays every newer input, or,
//! with rollback disabled, shifts onto the corrected path and blends the
//! rendered position over a short window.
//!
//! ### Interpolation
//! World broadcasts are buffered and remote entities are drawn slightly in the
//! past, between the two broadcasts that bracket the render time.
//!
//! ### Clock Synchronisation
//! Inputs and casts are stamped with an estimate of server time so the server
//! can validate them and rewind targets for lag compensation.
//!
//! ## Module Organization
//!
//! - `prediction`: input buffer, replay and visual smoothing
//! - `clock_sync`: server time estimate from handshake and pings
//! - `game`: remote interpolation buffer and the client's view of the match
//! - `input`: headless bot drivers and cast cadence
//! - `network`: UDP loop, connection lifecycle and host mode
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ClientOptions {
//!         address: "127.0.0.1".to_string(),
//!         port: 8080,
//!         ..ClientOptions::default()
//!     };
//!     let mut client = Client::new(options).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod clock_sync;
pub mod game;
pub mod input;
pub mod network;
pub mod prediction;
