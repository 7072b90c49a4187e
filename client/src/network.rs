use crate::clock_sync::ServerClock;
use crate::game::ClientGameState;
use crate::input::{BotDriver, BotPattern, InputManager};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use server::context::ServerContext;
use server::network::{spawn_server, ServerHandle};
use shared::clock::{Clock, SystemClock};
use shared::config::NetcodeConfig;
use shared::connection::{
    ConnectionAction, ConnectionError, ConnectionEvent, ConnectionManager, ConnectionRole,
    ConnectionState,
};
use shared::events::Subscription;
use shared::protocol::Packet;
use shared::{MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

/// How the client was asked to start
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub address: String,
    pub port: u16,
    /// Run an in-process server on `port` and connect to it
    pub host: bool,
    /// Simulated round trip in milliseconds, split evenly between directions
    pub fake_ping_ms: u64,
    pub bot: BotPattern,
    /// Seconds between bot casts; `None` disables casting
    pub cast_interval: Option<f64>,
    /// Capacity of the in-process server in host mode
    pub max_clients: usize,
    pub config: NetcodeConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            host: false,
            fake_ping_ms: 0,
            bot: BotPattern::Circle,
            cast_interval: Some(2.0),
            max_clients: 16,
            config: NetcodeConfig::default(),
        }
    }
}

pub struct Client {
    socket: Arc<UdpSocket>,
    options: ClientOptions,
    clock: Arc<dyn Clock>,
    connection: ConnectionManager,
    connection_events: Subscription<ConnectionEvent>,
    server_clock: ServerClock,
    game_state: ClientGameState,
    input_manager: InputManager,
    host_server: Option<ServerHandle>,
    last_server_packet: f64,

    packet_tx: mpsc::UnboundedSender<(Packet, SocketAddr)>,
    packet_rx: mpsc::UnboundedReceiver<(Packet, SocketAddr)>,
}

impl Client {
    pub async fn new(options: ClientOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();

        let mut connection = ConnectionManager::new(options.config.reconnect.clone());
        let connection_events = connection.subscribe();
        let input_manager = InputManager::new(
            BotDriver::new(options.bot, None),
            options.cast_interval,
            options.config.abilities.len() as u16,
        );

        Ok(Client {
            socket,
            clock: Arc::new(SystemClock::new()),
            connection,
            connection_events,
            server_clock: ServerClock::new(options.config.lag_compensation.default_rtt),
            game_state: ClientGameState::new(&options.config),
            input_manager,
            host_server: None,
            last_server_packet: 0.0,
            packet_tx,
            packet_rx,
            options,
        })
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    /// Issues the start request for the configured role
    pub async fn start(&mut self) -> Result<(), ConnectionError> {
        let now = self.clock.now();
        let actions = if self.options.host {
            self.connection.start_host(self.options.port, now)?
        } else {
            self.connection
                .start_client(&self.options.address, self.options.port, now)?
        };
        self.execute(actions).await;
        Ok(())
    }

    /// Only valid while hosting; routes to the in-process server
    pub async fn kick(&mut self, client_id: u32, reason: &str) -> Result<(), ConnectionError> {
        let action = self.connection.kick(client_id, reason)?;
        self.execute(vec![action]).await;
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        let actions = self.connection.disconnect();
        self.execute(actions).await;
        if let Some(server) = self.host_server.take() {
            server.shutdown().await;
        }
    }

    async fn execute(&mut self, actions: Vec<ConnectionAction>) {
        let mut queue: VecDeque<ConnectionAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                ConnectionAction::StartServer { port } => {
                    let context = ServerContext::new(
                        self.options.config.clone(),
                        self.options.max_clients,
                        None,
                    );
                    let address = format!("127.0.0.1:{}", port);
                    match spawn_server(&address, context, Arc::clone(&self.clock)).await {
                        Ok(handle) => {
                            info!("Hosting on {}", handle.local_addr);
                            self.host_server = Some(handle);
                            self.connection.on_transport_started();
                        }
                        Err(e) => {
                            error!("Failed to start host server on {}: {}", address, e);
                            let now = self.clock.now();
                            queue = self.connection.on_start_failed(&e.to_string(), now).into();
                        }
                    }
                }
                ConnectionAction::Connect { addr } => {
                    info!("Connecting to server at {}...", addr);
                    self.last_server_packet = self.clock.now();
                    let packet = Packet::Connect {
                        client_version: PROTOCOL_VERSION,
                    };
                    if let Err(e) = self.send_packet(&packet, addr).await {
                        let now = self.clock.now();
                        queue = self.connection.on_start_failed(&e.to_string(), now).into();
                    }
                }
                ConnectionAction::CloseTransport => {
                    if let Some(addr) = self.connection.target() {
                        if let Err(e) = self.send_packet(&Packet::Disconnect, addr).await {
                            warn!("Failed to send disconnect to {}: {}", addr, e);
                        }
                    }
                    self.game_state.reset();
                    self.server_clock.reset();
                }
                ConnectionAction::Kick { client_id, reason } => match &self.host_server {
                    Some(server) => {
                        if !server.kick(client_id, &reason) {
                            warn!("Host server is not running; kick of {} dropped", client_id);
                        }
                    }
                    None => warn!("No local server to kick client {} from", client_id),
                },
            }
        }
    }

    async fn send_packet(
        &self,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        let delay = self.options.fake_ping_ms / 2;

        if delay > 0 {
            let socket = Arc::clone(&self.socket);
            tokio::spawn(async move {
                sleep(Duration::from_millis(delay)).await;
                if let Err(e) = socket.send_to(&data, addr).await {
                    error!("Delayed send to {} failed: {}", addr, e);
                }
            });
        } else {
            self.socket.send_to(&data, addr).await?;
        }
        Ok(())
    }

    /// Spawns task that reads datagrams and forwards them, delayed when
    /// simulating latency
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let packet_tx = self.packet_tx.clone();
        let delay = Duration::from_millis(self.options.fake_ping_ms / 2);

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];
            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) else {
                            warn!("Failed to deserialize packet from {}", addr);
                            continue;
                        };
                        if delay.is_zero() {
                            if packet_tx.send((packet, addr)).is_err() {
                                break;
                            }
                        } else {
                            let packet_tx = packet_tx.clone();
                            tokio::spawn(async move {
                                sleep(delay).await;
                                let _ = packet_tx.send((packet, addr));
                            });
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if self.connection.target() != Some(addr) {
            debug!("Ignoring packet from {}", addr);
            return;
        }
        let now = self.clock.now();
        self.last_server_packet = now;

        match packet {
            Packet::Connected {
                client_id,
                entity_id,
                server_time,
                server_frame,
            } => {
                info!(
                    "Connected! Client ID: {} (entity {}, server frame {})",
                    client_id, entity_id, server_frame
                );
                self.connection.on_connected(client_id);
                self.server_clock.on_connected(server_time, now);
                self.game_state.on_connected(entity_id);
            }

            Packet::ConnectionRejected { code, reason } => {
                let actions = self.connection.on_rejected(code, &reason);
                self.execute(actions).await;
            }

            Packet::InputAck(ack) => {
                if let Some(outcome) = self.game_state.apply_ack(&ack, now) {
                    if outcome.is_correction() {
                        debug!("Input {} corrected: {:?}", ack.sequence, outcome);
                    }
                }
            }

            Packet::CastResult(result) => {
                let hits = result.hits.len();
                let request_id = result.request_id;
                let approved = result.approved;
                if self.game_state.apply_cast_result(result) {
                    if approved {
                        info!("Cast {} approved, {} hits", request_id, hits);
                    } else {
                        info!("Cast {} denied", request_id);
                    }
                }
            }

            Packet::WorldState {
                server_time,
                frame,
                entities,
            } => {
                self.game_state
                    .apply_world_state(server_time, frame, entities);
            }

            Packet::Ping { server_time, rtt } => {
                self.server_clock.on_ping(server_time, rtt, now);
                self.connection.report_rtt(rtt);
                if let Err(e) = self.send_packet(&Packet::Pong { server_time }, addr).await {
                    error!("Failed to answer ping: {}", e);
                }
            }

            Packet::Disconnected { reason } => {
                let actions = self.connection.on_connection_lost(&reason, now);
                self.execute(actions).await;
            }

            Packet::Kicked { reason } => {
                warn!("Kicked by server: {}", reason);
                let actions = self.connection.on_kicked(&reason);
                self.execute(actions).await;
            }

            _ => {
                warn!("Unexpected packet type from server");
            }
        }
    }

    /// One local simulation step: sample, predict, send
    async fn tick(&mut self) {
        let now = self.clock.now();

        let actions = self.connection.poll(now);
        self.execute(actions).await;

        if self.connection.state() == ConnectionState::Connected
            && now - self.last_server_packet > self.options.config.world.client_timeout
        {
            let actions = self
                .connection
                .on_connection_lost("server stopped responding", now);
            self.execute(actions).await;
        }

        let Some(addr) = self.connection.target() else {
            return;
        };
        if self.connection.state() != ConnectionState::Connected {
            return;
        }

        let server_time = self.server_clock.server_time(now);
        self.game_state.expire_pending_casts(server_time);
        let sample = self.input_manager.update(now);
        if let Some(input) = self.game_state.predict(&sample, server_time) {
            if let Err(e) = self.send_packet(&Packet::Input(input), addr).await {
                error!("Error sending input: {}", e);
            }
        }

        if !self.game_state.is_local_alive() {
            return;
        }
        let Some(origin) = self.game_state.predicted_state().map(|s| s.position) else {
            return;
        };
        if let Some(intent) = self.input_manager.cast_intent(now, origin) {
            let request = self.game_state.create_cast(
                intent.ability_index,
                intent.target_position,
                intent.target_direction,
                server_time,
            );
            if let Err(e) = self.send_packet(&Packet::CastAbility(request), addr).await {
                error!("Error sending cast: {}", e);
            }
        }
    }

    fn log_connection_events(&mut self) {
        for event in self.connection_events.drain() {
            match event {
                ConnectionEvent::Error(err) => {
                    warn!("Connection error {}: {}", err.code(), err)
                }
                ConnectionEvent::ReconnectScheduled { attempt, at } => {
                    info!("Reconnection attempt {} scheduled at {:.1}s", attempt, at)
                }
                ConnectionEvent::StateChanged { .. } => {}
            }
        }
    }

    fn log_status(&self) {
        let Some(state) = self.game_state.predicted_state() else {
            return;
        };
        let stats = self.game_state.prediction_stats();
        let now = self.clock.now();
        let visible = self
            .game_state
            .render_entities(self.server_clock.server_time(now), now)
            .len();
        info!(
            "pos ({:.1}, {:.1}, {:.1}) hp {:.0} rtt {:.0}ms | confirmed {} rollbacks {} smoothed {} | entities {} pending casts {}",
            state.position.x,
            state.position.y,
            state.position.z,
            self.game_state.local_health().unwrap_or(0.0),
            self.server_clock.rtt() * 1000.0,
            stats.confirmed,
            stats.rollbacks,
            stats.smoothed,
            visible,
            self.game_state.pending_cast_count(),
        );
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_loop(None).await
    }

    /// Runs for at most `duration`, then disconnects
    pub async fn run_for(&mut self, duration: Duration) -> Result<(), Box<dyn std::error::Error>> {
        self.run_loop(Some(Instant::now() + duration)).await
    }

    async fn run_loop(&mut self, deadline: Option<Instant>) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        if self.connection.state() == ConnectionState::Disconnected {
            self.start().await?;
        }

        let tick_duration = Duration::from_secs_f32(self.options.config.tick_dt());
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status_interval = interval(Duration::from_secs(2));
        let stop = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(stop);

        loop {
            tokio::select! {
                received = self.packet_rx.recv() => {
                    if let Some((packet, addr)) = received {
                        self.handle_packet(packet, addr).await;
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick().await;
                },

                _ = status_interval.tick() => {
                    self.log_status();
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received");
                    break;
                },

                _ = &mut stop => {
                    break;
                },
            }

            self.log_connection_events();

            if self.connection.state() == ConnectionState::Error {
                if let Some(err) = self.connection.last_error() {
                    error!("Stopping after connection error {}: {}", err.code(), err);
                }
                break;
            }
        }

        if self.connection.role() == Some(ConnectionRole::Host) {
            info!("Shutting down hosted server");
        }
        self.disconnect().await;
        self.log_connection_events();
        Ok(())
    }
}
