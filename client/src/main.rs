use clap::Parser;
use client::input::BotPattern;
use client::network::{Client, ClientOptions};
use log::info;
use shared::config::NetcodeConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to connect to
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    address: String,

    /// Server port (or the port to host on)
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Run an in-process server and connect to it
    #[arg(long)]
    host: bool,

    /// Scripted movement for the headless client
    #[arg(short = 'b', long, value_enum, default_value = "circle")]
    bot: BotPattern,

    /// Seconds between bot ability casts (0 disables casting)
    #[arg(long, default_value = "2.0")]
    cast_interval: f64,

    /// Maximum clients when hosting
    #[arg(long, default_value = "16")]
    max_clients: usize,

    /// TOML file with netcode settings
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds (runs until Ctrl-C if omitted)
    #[arg(short = 'd', long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => NetcodeConfig::load(path)?,
        None => NetcodeConfig::default(),
    };

    info!("Starting client...");
    if args.host {
        info!("Hosting on port {}", args.port);
    } else {
        info!("Connecting to: {}:{}", args.address, args.port);
    }
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    info!("Bot pattern: {:?}", args.bot);

    let options = ClientOptions {
        address: args.address,
        port: args.port,
        host: args.host,
        fake_ping_ms: args.fake_ping,
        bot: args.bot,
        cast_interval: (args.cast_interval > 0.0).then_some(args.cast_interval),
        max_clients: args.max_clients,
        config,
    };

    let mut client = Client::new(options).await?;

    match args.duration {
        Some(seconds) => client.run_for(Duration::from_secs(seconds)).await?,
        None => client.run().await?,
    }

    if let Some(err) = client.connection().last_error() {
        eprintln!("Session ended with error {}: {}", err.code(), err);
    }

    Ok(())
}
