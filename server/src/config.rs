use shared::{DEFAULT_PORT, DEFAULT_TICK_RATE};
use std::time::Duration;

/// Runtime settings, read once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to, `host:port`
    pub bind_addr: String,
    /// Snapshot broadcasts per second
    pub tick_rate: u32,
    /// Connections beyond this are closed with "Server full"
    pub max_players: usize,
    /// Connections silent for longer than this are dropped; off when `None`
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            tick_rate: DEFAULT_TICK_RATE,
            max_players: 64,
            idle_timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }

    /// Enables the idle sweep; a zero timeout leaves it off
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:3001");
        assert_eq!(config.tick_rate, 20);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn test_with_bind_addr() {
        let config = ServerConfig::default().with_bind_addr("127.0.0.1:0");
        assert_eq!(config.bind_addr, "127.0.0.1:0");
    }

    #[test]
    fn test_with_idle_timeout() {
        let config = ServerConfig::default().with_idle_timeout(Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(10)));

        let config = config.with_idle_timeout(Duration::ZERO);
        assert_eq!(config.idle_timeout, None);
    }
}
