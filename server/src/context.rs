//! Composition root for the authoritative server
//!
//! [`ServerContext`] owns every server subsystem and wires them together
//! explicitly. It is transport-agnostic: packets go in through
//! [`ServerContext::handle_packet`], time advances through
//! [`ServerContext::tick`], and everything that should go out on the wire
//! accumulates in an outbox drained with [`ServerContext::drain_outbound`].
//! The UDP loop in `network` and the integration tests drive it the same way.

use glam::Vec3;
use log::{debug, info, warn};
use shared::config::NetcodeConfig;
use shared::events::{EventBus, Subscription, SubscriptionId};
use shared::movement::MovementModel;
use shared::protocol::{AbilityCastRequest, AbilityCastResult, InputAck, Packet};
use shared::timers::TimerQueue;
use shared::PROTOCOL_VERSION;
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::abilities::AbilityBook;
use crate::anti_cheat::{AntiCheatEngine, Verdict, ViolationKind};
use crate::client_manager::{ClientManager, ConnectionRejection};
use crate::input_validation::{InputRejection, InputValidator};
use crate::lag_compensation::LagCompensator;
use crate::rate_limit::RateLimiter;
use crate::snapshot_history::SnapshotHistory;
use crate::validation::{CastOutcome, CastSender, CastValidator};
use crate::world::{EntityKind, World};

/// Seconds between RTT pings
pub const PING_INTERVAL: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub addr: SocketAddr,
    pub packet: Packet,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PlayerConnected { client_id: u32, entity_id: u32 },
    PlayerDisconnected { client_id: u32, reason: String },
    PlayerKicked { client_id: u32, reason: String },
    InputRejected { client_id: u32, reason: InputRejection },
    CastResolved(AbilityCastResult),
    ViolationFlagged { client_id: u32, kind: ViolationKind, suspicion: u32 },
    EntityDied { entity_id: u32, killer_id: u32 },
    EntityRespawned { entity_id: u32, position: Vec3 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ServerTimer {
    Respawn(u32),
}

pub struct ServerContext {
    config: NetcodeConfig,
    clients: ClientManager,
    world: World,
    history: SnapshotHistory,
    lag: LagCompensator,
    input_validator: InputValidator,
    rate_limiter: RateLimiter,
    anti_cheat: AntiCheatEngine,
    abilities: AbilityBook,
    timers: TimerQueue<ServerTimer>,
    events: EventBus<ServerEvent>,
    outbound: Vec<Outbound>,
    frame: u32,
    last_broadcast: Option<f64>,
    last_ping: Option<f64>,
}

impl ServerContext {
    /// `seed` fixes spawn point selection, for tests
    pub fn new(config: NetcodeConfig, max_clients: usize, seed: Option<u64>) -> Self {
        let model = MovementModel::new(config.movement.clone(), config.world.bounds);
        let world = World::new(config.world.clone(), model, config.abilities.len(), seed);
        let anti_cheat = AntiCheatEngine::new(
            config.anti_cheat.clone(),
            &config.world.spawn_points,
            &config.world.teleport_zones,
        );

        Self {
            clients: ClientManager::new(max_clients),
            world,
            history: SnapshotHistory::new(config.max_snapshot_history, config.history_max_age),
            lag: LagCompensator::new(config.lag_compensation.clone()),
            input_validator: InputValidator::new(config.input.clone()),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            anti_cheat,
            abilities: AbilityBook::new(config.abilities.clone()),
            timers: TimerQueue::new(),
            events: EventBus::new(),
            outbound: Vec::new(),
            frame: 0,
            last_broadcast: None,
            last_ping: None,
            config,
        }
    }

    pub fn config(&self) -> &NetcodeConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn anti_cheat(&self) -> &AntiCheatEngine {
        &self.anti_cheat
    }

    pub fn lag_compensator(&self) -> &LagCompensator {
        &self.lag
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn subscribe(&mut self) -> Subscription<ServerEvent> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    pub fn spawn_dummy(&mut self, position: Vec3) -> u32 {
        self.world.spawn_dummy(position)
    }

    fn send(&mut self, addr: SocketAddr, packet: Packet) {
        self.outbound.push(Outbound { addr, packet });
    }

    fn broadcast(&mut self, packet: Packet) {
        for (_, addr) in self.clients.get_client_addrs() {
            self.send(addr, packet.clone());
        }
    }

    pub fn handle_packet(&mut self, packet: Packet, addr: SocketAddr, now: f64) {
        if let Packet::Connect { client_version } = packet {
            self.handle_connect(client_version, addr, now);
            return;
        }

        let Some(client_id) = self.clients.find_client_by_addr(addr) else {
            debug!("Ignoring packet from unknown address {}", addr);
            return;
        };
        self.clients.touch(client_id, now);

        match packet {
            Packet::Input(input) => self.handle_input(client_id, input, now),
            Packet::CastAbility(request) => {
                if !self.accept_request(client_id, request.request_id) {
                    return;
                }
                let outcome = self.validator().validate_cast(
                    CastSender::Client(client_id),
                    client_id,
                    &request,
                    now,
                );
                self.finish_cast(client_id, outcome, now);
            }
            Packet::Attack(request) => {
                if !self.accept_request(client_id, request.request_id) {
                    return;
                }
                let outcome = self.validator().validate_attack(
                    CastSender::Client(client_id),
                    client_id,
                    &request,
                    now,
                );
                self.finish_cast(client_id, outcome, now);
            }
            Packet::Pong { server_time } => {
                self.clients.record_rtt_sample(client_id, now - server_time);
            }
            Packet::Disconnect => {
                self.remove_client(client_id, "Client disconnected");
            }
            _ => {
                warn!("Unexpected packet type from client {} at {}", client_id, addr);
            }
        }
    }

    fn accept_request(&mut self, client_id: u32, request_id: u32) -> bool {
        let accepted = self.clients.accept_request_id(client_id, request_id);
        if !accepted {
            debug!("Ignoring request {} from client {}: id not newer than the last", request_id, client_id);
        }
        accepted
    }

    fn handle_connect(&mut self, client_version: u32, addr: SocketAddr, now: f64) {
        info!("Client connecting from {} (version: {})", addr, client_version);

        let result = if client_version != PROTOCOL_VERSION {
            Err(ConnectionRejection::VersionMismatch {
                client: client_version,
                server: PROTOCOL_VERSION,
            })
        } else {
            self.clients.add_client(addr, now)
        };

        match result {
            Ok(client_id) => {
                let position = self.world.add_player(client_id);
                self.anti_cheat.register(client_id, position, now);
                self.send(
                    addr,
                    Packet::Connected {
                        client_id,
                        entity_id: client_id,
                        server_time: now,
                        server_frame: self.frame,
                    },
                );
                self.events.publish(ServerEvent::PlayerConnected {
                    client_id,
                    entity_id: client_id,
                });
            }
            Err(rejection) => {
                warn!("Rejected connection from {}: {}", addr, rejection);
                self.send(
                    addr,
                    Packet::ConnectionRejected {
                        code: rejection.code(),
                        reason: rejection.to_string(),
                    },
                );
            }
        }
    }

    fn handle_input(&mut self, client_id: u32, input: shared::protocol::MovementInput, now: f64) {
        let Some(client) = self.clients.get(client_id) else {
            return;
        };
        let checked = self.input_validator.validate(
            &input,
            client.last_accepted_sequence,
            client.last_input_frame,
            now,
        );
        let max_pending = self.config.input.max_pending_inputs;
        let queued = checked.and_then(|_| self.clients.add_input(client_id, input, max_pending));

        if let Err(reason) = queued {
            debug!(
                "Dropped input {} from client {}: {}",
                input.sequence, client_id, reason
            );
            self.events
                .publish(ServerEvent::InputRejected { client_id, reason });
        }
    }

    fn validator(&mut self) -> CastValidator<'_> {
        CastValidator {
            config: &self.config,
            abilities: &self.abilities,
            world: &mut self.world,
            history: &self.history,
            lag: &self.lag,
            rate_limiter: &mut self.rate_limiter,
            anti_cheat: &mut self.anti_cheat,
            latency: &self.clients,
        }
    }

    /// Casts on behalf of any entity without ownership or rate checks
    pub fn cast_as_server(&mut self, caster_id: u32, request: &AbilityCastRequest, now: f64) -> Option<AbilityCastResult> {
        let outcome = self
            .validator()
            .validate_cast(CastSender::Server, caster_id, request, now);
        let result = outcome.result().cloned();
        self.finish_cast(caster_id, outcome, now);
        result
    }

    fn finish_cast(&mut self, caster_id: u32, outcome: CastOutcome, now: f64) {
        let CastOutcome::Resolved { result, enforcement } = outcome else {
            return;
        };

        for hit in result.hits.iter().filter(|hit| hit.is_dead) {
            info!("Entity {} killed by {}", hit.target_id, caster_id);
            self.timers.schedule(
                now + self.config.world.respawn_delay,
                ServerTimer::Respawn(hit.target_id),
            );
            self.events.publish(ServerEvent::EntityDied {
                entity_id: hit.target_id,
                killer_id: caster_id,
            });
        }

        self.broadcast(Packet::CastResult(result.clone()));
        self.events.publish(ServerEvent::CastResolved(result));

        if let Some(enforcement) = enforcement {
            self.kick(enforcement.client_id, &enforcement.reason);
        }
    }

    /// Sends the reason and drops every trace of the client
    pub fn kick(&mut self, client_id: u32, reason: &str) -> bool {
        let Some(addr) = self.clients.get(client_id).map(|c| c.addr) else {
            return false;
        };
        warn!("Kicking client {}: {}", client_id, reason);
        self.send(
            addr,
            Packet::Kicked {
                reason: reason.to_string(),
            },
        );
        self.cleanup_client(client_id);
        self.events.publish(ServerEvent::PlayerKicked {
            client_id,
            reason: reason.to_string(),
        });
        true
    }

    fn remove_client(&mut self, client_id: u32, reason: &str) {
        if self.clients.get(client_id).is_none() {
            return;
        }
        self.cleanup_client(client_id);
        self.events.publish(ServerEvent::PlayerDisconnected {
            client_id,
            reason: reason.to_string(),
        });
    }

    fn cleanup_client(&mut self, client_id: u32) {
        self.clients.remove_client(client_id);
        self.world.remove(client_id);
        self.history.remove_entity(client_id);
        self.anti_cheat.unregister(client_id);
        self.rate_limiter.remove(client_id);
    }

    /// One fixed simulation step at server time `now`
    pub fn tick(&mut self, now: f64) {
        let dt = self.config.tick_dt();

        self.run_timers(now);
        let applied = self.apply_inputs(dt);
        self.check_movement(now, dt, &applied);
        self.world.regenerate(dt);
        self.record_history(now);
        self.frame = self.frame.wrapping_add(1);

        if self
            .last_broadcast
            .map_or(true, |last| now - last >= self.config.snapshot_interval)
        {
            self.last_broadcast = Some(now);
            self.broadcast(Packet::WorldState {
                server_time: now,
                frame: self.frame,
                entities: self.world.entity_states(),
            });
        }

        if self.last_ping.map_or(true, |last| now - last >= PING_INTERVAL) {
            self.last_ping = Some(now);
            self.send_pings(now);
        }

        for client_id in self
            .clients
            .check_timeouts(now, self.config.world.client_timeout)
        {
            info!("Client {} timed out", client_id);
            self.cleanup_client(client_id);
            self.events.publish(ServerEvent::PlayerDisconnected {
                client_id,
                reason: "Timed out".to_string(),
            });
        }
    }

    fn run_timers(&mut self, now: f64) {
        for timer in self.timers.pop_due(now) {
            match timer {
                ServerTimer::Respawn(entity_id) => {
                    let Some(position) = self.world.respawn(entity_id, now) else {
                        continue;
                    };
                    if let Some(EntityKind::Player { client_id }) = self.world.get(entity_id).map(|e| e.kind) {
                        self.anti_cheat.note_respawn(client_id, position, now);
                    }
                    self.events.publish(ServerEvent::EntityRespawned { entity_id, position });
                }
            }
        }
    }

    /// Applies up to `max_inputs_per_tick` queued inputs per client, in
    /// sequence order, acknowledging each one. Returns how many movement
    /// steps each client took.
    fn apply_inputs(&mut self, dt: f32) -> HashMap<u32, u32> {
        let max_per_tick = self.config.input.max_inputs_per_tick;
        let mut applied = HashMap::new();
        for client_id in self.clients.client_ids() {
            let inputs = self.clients.take_inputs(client_id, max_per_tick);
            let Some(addr) = self.clients.get(client_id).map(|c| c.addr) else {
                continue;
            };

            for input in inputs {
                let Some(state) = self.world.apply_input(client_id, &input, dt) else {
                    continue;
                };
                self.clients.mark_input_processed(client_id, input.sequence);
                *applied.entry(client_id).or_insert(0) += 1;
                self.send(
                    addr,
                    Packet::InputAck(InputAck {
                        sequence: input.sequence,
                        position: state.position,
                        velocity: state.velocity,
                        grounded: state.grounded,
                        server_frame: self.frame,
                    }),
                );
            }
        }
        applied
    }

    /// Speed is judged over the simulated time of the steps applied this tick
    fn check_movement(&mut self, now: f64, dt: f32, applied: &HashMap<u32, u32>) {
        let samples: Vec<(u32, Vec3, Vec3)> = self
            .world
            .entities()
            .filter(|e| e.alive)
            .filter_map(|e| match e.kind {
                EntityKind::Player { client_id } => {
                    Some((client_id, e.movement.position, e.movement.velocity))
                }
                EntityKind::Dummy => None,
            })
            .collect();

        for (client_id, position, velocity) in samples {
            let steps = applied.get(&client_id).copied().unwrap_or(0);
            let simulated = steps as f64 * dt as f64;
            match self
                .anti_cheat
                .evaluate_simulated_movement(client_id, position, velocity, now, simulated)
            {
                Verdict::Clean => {}
                Verdict::Flagged { kind, suspicion } => {
                    self.events.publish(ServerEvent::ViolationFlagged {
                        client_id,
                        kind,
                        suspicion,
                    });
                }
                Verdict::Kick(enforcement) => {
                    self.kick(enforcement.client_id, &enforcement.reason);
                }
            }
        }
    }

    fn record_history(&mut self, now: f64) {
        for entity in self.world.entities() {
            self.history.record(entity.id, entity.snapshot(now, self.frame));
        }
    }

    fn send_pings(&mut self, now: f64) {
        let default_rtt = self.config.lag_compensation.default_rtt;
        let pings: Vec<(SocketAddr, f64)> = self
            .clients
            .client_ids()
            .into_iter()
            .filter_map(|id| self.clients.get(id))
            .map(|c| (c.addr, c.rtt.unwrap_or(default_rtt)))
            .collect();

        for (addr, rtt) in pings {
            self.send(
                addr,
                Packet::Ping {
                    server_time: now,
                    rtt,
                },
            );
        }
    }
}
