//! Performance benchmarks for the hot paths of the netcode core

use client::prediction::ClientPredictor;
use glam::{Quat, Vec2, Vec3};
use server::context::ServerContext;
use server::snapshot_history::{EntitySnapshot, SnapshotHistory};
use shared::config::NetcodeConfig;
use shared::movement::{MovementModel, MovementState};
use shared::protocol::{AbilityCastRequest, EntityState, InputAck, Packet};
use shared::MAX_PACKET_SIZE;
use std::time::Instant;

/// Benchmarks interpolated history lookups, the core of lag compensation
#[test]
fn benchmark_snapshot_history_queries() {
    let config = NetcodeConfig::default();
    let mut history = SnapshotHistory::new(config.max_snapshot_history, config.history_max_age);

    let entities = 32u32;
    for frame in 0..128u32 {
        let time = frame as f64 / 128.0;
        for id in 0..entities {
            history.record(
                id,
                EntitySnapshot {
                    position: Vec3::new(frame as f32 * 0.1, 0.0, id as f32),
                    velocity: Vec3::X * 6.0,
                    rotation: Quat::IDENTITY,
                    grounded: true,
                    health: 100.0,
                    server_time: time,
                    frame,
                },
            );
        }
    }

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let id = i as u32 % entities;
        let time = (i % 1000) as f64 / 1000.0;
        let _ = history.query(id, time);
    }

    let duration = start.elapsed();
    println!(
        "History queries: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks a worst-case rollback: the oldest pending input is corrected
/// and every newer one is replayed
#[test]
fn benchmark_prediction_rollback() {
    let config = NetcodeConfig::default();
    let model = MovementModel::new(config.movement.clone(), config.world.bounds);
    let dt = config.tick_dt();

    let iterations = 1_000;
    let pending = 100;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut predictor = ClientPredictor::new(
            model.clone(),
            config.prediction.clone(),
            dt,
            MovementState::at(Vec3::ZERO),
        );
        for k in 0..pending {
            let angle = k as f32 * 0.1;
            predictor.predict(Vec2::new(angle.cos(), angle.sin()), false, false, k as f64 * 0.016);
        }

        let ack = InputAck {
            sequence: 1,
            position: Vec3::new(1.0, 0.0, 1.0),
            velocity: Vec3::ZERO,
            grounded: true,
            server_frame: 1,
        };
        let outcome = predictor.reconcile(&ack, 2.0);
        assert!(outcome.is_correction());
    }

    let duration = start.elapsed();
    println!(
        "Rollback with {} replays: {} iterations in {:?} ({:.2} μs/iter)",
        pending - 1,
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks the full cast pipeline against a crowd of targets
#[test]
fn benchmark_cast_validation() {
    let mut ctx = ServerContext::new(NetcodeConfig::default(), 4, Some(1));
    let caster = ctx.spawn_dummy(Vec3::ZERO);
    for i in 0..16 {
        let angle = i as f32 * std::f32::consts::TAU / 16.0;
        ctx.spawn_dummy(Vec3::new(angle.cos() * 2.0, 0.0, angle.sin() * 2.0));
    }
    ctx.tick(0.0);

    let iterations = 5_000;
    let start = Instant::now();

    for i in 0..iterations {
        let now = 1.0 + i as f64;
        let request = AbilityCastRequest {
            request_id: i as u32 + 1,
            ability_index: 0,
            target_position: Vec3::X * 2.0,
            target_direction: Vec3::X,
            client_timestamp: now,
        };
        let _ = ctx.cast_as_server(caster, &request, now);
    }

    let duration = start.elapsed();
    println!(
        "Cast validation: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks world-state encoding and checks a full lobby fits in a datagram
#[test]
fn benchmark_world_state_serialization() {
    let entities: Vec<EntityState> = (0..16)
        .map(|id| EntityState {
            id,
            position: Vec3::new(id as f32, 0.0, -(id as f32)),
            velocity: Vec3::new(1.0, 0.0, 2.0),
            rotation: Quat::from_rotation_y(id as f32),
            grounded: true,
            health: 75.0,
        })
        .collect();
    let packet = Packet::WorldState {
        server_time: 12.5,
        frame: 750,
        entities,
    };

    let iterations = 10_000;
    let start = Instant::now();

    let mut size = 0;
    for _ in 0..iterations {
        let data = bincode::serialize(&packet).unwrap();
        size = data.len();
    }

    let duration = start.elapsed();
    println!(
        "World state serialization: {} iterations in {:?} ({:.2} μs/iter, {} bytes)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64,
        size
    );

    assert!(size <= MAX_PACKET_SIZE);
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}
