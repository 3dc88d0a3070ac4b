use crate::interpolation::DEFAULT_RENDER_DELAY_MS;
use crate::reconnect::BackoffConfig;
use clap::Args;
use shared::DEFAULT_PORT;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the server, e.g. `ws://127.0.0.1:3001`
    pub server_url: String,
    /// Display name; the server-assigned default is used when absent
    pub name: Option<String>,
    pub backoff: BackoffConfig,
    /// How far behind the newest snapshot remote players are rendered
    pub render_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("ws://127.0.0.1:{}", DEFAULT_PORT),
            name: None,
            backoff: BackoffConfig::default(),
            render_delay: Duration::from_millis(DEFAULT_RENDER_DELAY_MS),
        }
    }
}

/// Command line options shared by the windowed client and the bot
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Server to connect to, `host:port` or a `ws://` URL
    #[arg(short = 's', long, env = "SERVER_URL", default_value = "ws://127.0.0.1:3001")]
    pub server: String,

    /// Display name shown to other players
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// Consecutive failed connections before giving up
    #[arg(long, env = "MAX_RECONNECT_ATTEMPTS", default_value_t = 5)]
    pub max_reconnect_attempts: u32,

    /// First reconnect delay in milliseconds, doubled on each failure
    #[arg(long, env = "BACKOFF_BASE_MS", default_value_t = 1000)]
    pub backoff_base_ms: u64,

    /// Upper bound on the reconnect delay in milliseconds
    #[arg(long, env = "BACKOFF_CAP_MS", default_value_t = 10_000)]
    pub backoff_cap_ms: u64,

    /// How far behind the newest snapshot remote players are drawn
    #[arg(long, default_value_t = DEFAULT_RENDER_DELAY_MS)]
    pub render_delay_ms: u64,
}

impl From<ConnectionArgs> for ClientConfig {
    fn from(args: ConnectionArgs) -> Self {
        Self {
            server_url: normalize_server_url(&args.server),
            name: args.name,
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(args.backoff_base_ms),
                max_delay: Duration::from_millis(args.backoff_cap_ms),
                max_attempts: args.max_reconnect_attempts,
            },
            render_delay: Duration::from_millis(args.render_delay_ms),
        }
    }
}

/// Accepts `host:port` shorthand as well as full `ws://` / `wss://` URLs
pub fn normalize_server_url(server: &str) -> String {
    let server = server.trim();
    if server.starts_with("ws://") || server.starts_with("wss://") {
        server.to_string()
    } else {
        format!("ws://{}", server)
    }
}
