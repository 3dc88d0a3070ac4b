use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::{DEFAULT_PORT, DEFAULT_TICK_RATE};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Snapshot broadcasts per second
    #[arg(short, long, env = "TICK_RATE", default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Maximum number of connected players
    #[arg(long, env = "MAX_PLAYERS", default_value = "64")]
    max_players: usize,

    /// Seconds of silence before a connection is dropped; unset or 0 disables
    #[arg(long, env = "IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        tick_rate: args.tick_rate,
        max_players: args.max_players,
        idle_timeout: None,
    };
    if let Some(secs) = args.idle_timeout_secs {
        config = config.with_idle_timeout(Duration::from_secs(secs));
    }

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
