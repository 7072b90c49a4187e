//! Server network layer handling UDP communications and game loop coordination

use crate::context::{ServerContext, ServerEvent};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::clock::Clock;
use shared::events::Subscription;
use shared::protocol::Packet;
use shared::MAX_PACKET_SIZE;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks (or an embedding host) to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    Kick { client_id: u32, reason: String },
    Shutdown,
}

/// Messages sent from the game loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    context: ServerContext,
    clock: Arc<dyn Clock>,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        context: ServerContext,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let tick_duration = Duration::from_secs_f32(context.config().tick_dt());
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            context,
            clock,
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    /// Bound address; useful when binding to port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for kicking clients or shutting the loop down from another task
    pub fn command_sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn subscribe(&mut self) -> Subscription<ServerEvent> {
        self.context.subscribe()
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                }
            }
        });
    }

    /// Hands everything the context queued to the sender task
    fn flush_outbound(&mut self) {
        for outbound in self.context.drain_outbound() {
            if let Err(e) = self.game_tx.send(GameMessage::SendPacket {
                packet: outbound.packet,
                addr: outbound.addr,
            }) {
                error!("Failed to queue packet for sending: {}", e);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Server started successfully ({} Hz)",
            self.context.config().tick_rate
        );

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            let now = self.clock.now();
                            self.context.handle_packet(packet, addr, now);
                        },
                        Some(ServerMessage::Kick { client_id, reason }) => {
                            if !self.context.kick(client_id, &reason) {
                                warn!("Kick requested for unknown client {}", client_id);
                            }
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            self.flush_outbound();
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = self.clock.now();
                    self.context.tick(now);

                    let frame = self.context.frame();
                    if frame % 600 == 0 && !self.context.clients().is_empty() {
                        debug!(
                            "Frame {}: {} clients, {} entities",
                            frame,
                            self.context.clients().len(),
                            self.context.world().len()
                        );
                    }
                },
            }

            self.flush_outbound();
        }

        Ok(())
    }
}

/// A server running on a background task
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    commands: mpsc::UnboundedSender<ServerMessage>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn command_sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.commands.clone()
    }

    pub fn kick(&self, client_id: u32, reason: &str) -> bool {
        self.commands
            .send(ServerMessage::Kick {
                client_id,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    /// Asks the loop to stop and waits for it
    pub async fn shutdown(self) {
        let _ = self.commands.send(ServerMessage::Shutdown);
        if let Err(e) = self.task.await {
            error!("Server task panicked: {}", e);
        }
    }
}

/// Binds `addr` and runs the server loop on a spawned task
pub async fn spawn_server(
    addr: &str,
    context: ServerContext,
    clock: Arc<dyn Clock>,
) -> Result<ServerHandle, Box<dyn std::error::Error>> {
    let mut server = Server::new(addr, context, clock).await?;
    let local_addr = server.local_addr()?;
    let commands = server.command_sender();

    let task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server loop failed: {}", e);
        }
    });

    Ok(ServerHandle {
        local_addr,
        commands,
        task,
    })
}

async fn send_packet_impl(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(packet)?;
    if data.len() > MAX_PACKET_SIZE {
        warn!("Outgoing packet of {} bytes exceeds datagram limit", data.len());
    }
    socket.send_to(&data, addr).await?;
    Ok(())
}
