//! Connection attempt bookkeeping with exponential backoff
//!
//! The controller is a plain state machine with no timers of its own: the
//! network task reports what happened and the controller answers with how
//! long to wait before the next attempt, or that it is time to give up.

use log::{info, warn};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// `min(base * 2^attempts, max)`
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    GaveUp,
}

/// What the network task should do after a failed or lost connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Connection status as shown to the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting { attempt: u32 },
    Connected,
    Reconnecting { attempt: u32, retry_in: Duration },
    GaveUp { attempts: u32 },
}

impl ConnectionStatus {
    pub fn label(&self) -> String {
        match self {
            ConnectionStatus::Connecting { .. } => "Connecting...".to_string(),
            ConnectionStatus::Connected => "Connected".to_string(),
            ConnectionStatus::Reconnecting { retry_in, .. } => format!(
                "Disconnected - Trying to reconnect in {:.1}s...",
                retry_in.as_secs_f32()
            ),
            ConnectionStatus::GaveUp { .. } => "Disconnected - Reload to retry".to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

#[derive(Debug)]
pub struct ReconnectController {
    config: BackoffConfig,
    attempts: u32,
    state: ConnectionState,
}

impl ReconnectController {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Marks the start of a connection attempt; refused once given up
    pub fn begin_attempt(&mut self) -> bool {
        if self.state == ConnectionState::GaveUp {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    pub fn on_connected(&mut self) {
        if self.attempts > 0 {
            info!("Reconnected after {} failed attempts", self.attempts);
        }
        self.attempts = 0;
        self.state = ConnectionState::Connected;
    }

    /// Records a failed attempt or a dropped connection
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.state == ConnectionState::GaveUp {
            return RetryDecision::GiveUp;
        }

        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.config.max_attempts {
            warn!("Giving up after {} attempts", self.attempts);
            self.state = ConnectionState::GaveUp;
            return RetryDecision::GiveUp;
        }

        self.state = ConnectionState::Disconnected;
        let delay = self.config.delay_for(self.attempts);
        info!(
            "Retrying connection in {}ms (attempt {}/{})",
            delay.as_millis(),
            self.attempts,
            self.config.max_attempts
        );
        RetryDecision::Retry(delay)
    }
}
