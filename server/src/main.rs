use clap::Parser;
use glam::Vec3;
use log::{error, info};
use server::context::ServerContext;
use server::network::{Server, ServerMessage};
use shared::clock::{Clock, SystemClock};
use shared::config::NetcodeConfig;
use shared::connection::{ConnectionAction, ConnectionManager};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Simulation ticks per second (overrides the config file)
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// TOML file with netcode settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Training dummies to place around the map center
    #[arg(short, long, default_value = "0")]
    dummies: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NetcodeConfig::load(path)?,
        None => NetcodeConfig::default(),
    };
    if let Some(tick_rate) = args.tick_rate {
        config.tick_rate = tick_rate;
    }
    config.validate()?;

    let clock = Arc::new(SystemClock::new());
    let mut connection = ConnectionManager::new(config.reconnect.clone());
    let mut context = ServerContext::new(config, args.max_clients, None);

    for i in 0..args.dummies {
        let angle = i as f32 / args.dummies as f32 * std::f32::consts::TAU;
        let position = Vec3::new(angle.cos() * 10.0, 0.0, angle.sin() * 10.0);
        let id = context.spawn_dummy(position);
        info!("Spawned dummy {} at {:?}", id, position);
    }

    let mut server = None;
    for action in connection.start_server(args.port, clock.now())? {
        if let ConnectionAction::StartServer { port } = action {
            let address = format!("{}:{}", args.host, port);
            match Server::new(&address, context, clock.clone()).await {
                Ok(bound) => {
                    connection.on_transport_started();
                    server = Some(bound);
                }
                Err(e) => {
                    connection.on_start_failed(&e.to_string(), clock.now());
                    error!("Failed to start server on {}: {}", address, e);
                    return Err(e);
                }
            }
            break;
        }
    }

    let Some(mut server) = server else {
        return Err("server start produced no transport".into());
    };
    info!("Connection state: {}", connection.state());

    let commands = server.command_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = commands.send(ServerMessage::Shutdown);
        }
    });

    server.run().await?;
    connection.disconnect();

    Ok(())
}
