//! Fixed-rate snapshot dissemination
//!
//! The tick loop only tracks timing and the run/idle decision; the server's
//! event loop owns the actual timer and calls [`TickLoop::run_tick`] when it
//! fires. Because the run/idle decision is re-evaluated on that same event
//! loop after every connect and disconnect, a connection arriving while the
//! loop goes idle always restarts it.

use crate::registry::{BroadcastReport, ConnectionRegistry};
use log::{debug, info};
use shared::ServerMessage;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickTransition {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub tick: u64,
    pub report: BroadcastReport,
}

#[derive(Debug)]
pub struct TickLoop {
    period: Duration,
    tick_rate: u32,
    running: bool,
    tick: u64,
    epoch: Instant,
}

impl TickLoop {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            period: Duration::from_nanos(1_000_000_000 / tick_rate as u64),
            tick_rate,
            running: false,
            tick: 0,
            epoch: Instant::now(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of ticks executed since the server started
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Milliseconds on the server's monotonic clock, used as snapshot time
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis().min(u64::MAX as u128) as u64
    }

    /// Runs while anyone is connected and idles otherwise
    pub fn sync(&mut self, player_count: usize) -> Option<TickTransition> {
        match (self.running, player_count > 0) {
            (false, true) => {
                self.running = true;
                info!("Tick loop started at {}Hz", self.tick_rate);
                Some(TickTransition::Started)
            }
            (true, false) => {
                self.running = false;
                info!("Tick loop idle after tick {}", self.tick);
                Some(TickTransition::Stopped)
            }
            _ => None,
        }
    }

    pub fn run_tick(&mut self, registry: &ConnectionRegistry) -> TickOutcome {
        let now = self.now_ms();
        self.run_tick_at(registry, now)
    }

    /// Broadcasts a snapshot of every player stamped with `time`
    ///
    /// With nobody connected nothing is built or sent. The tick counter
    /// advances either way.
    pub fn run_tick_at(&mut self, registry: &ConnectionRegistry, time: u64) -> TickOutcome {
        self.tick += 1;

        let report = if registry.is_empty() {
            BroadcastReport::default()
        } else {
            registry.broadcast(&ServerMessage::Snapshot(registry.snapshot(time)))
        };

        if self.tick % (self.tick_rate as u64 * 5) == 0 {
            debug!(
                "Tick {}: {} players, {} sent, {} failed",
                self.tick,
                registry.len(),
                report.sent,
                report.failed
            );
        }

        TickOutcome {
            tick: self.tick,
            report,
        }
    }
}
