//! Snapshot buffering and time-lagged interpolation of remote players
//!
//! Snapshots arrive stamped with the server's clock. The buffer keeps them
//! sorted by that time and renders the world `render_delay` in the past, so
//! there is normally a snapshot on either side of the render time to blend
//! between. Without such a pair nothing is produced; positions are never
//! extrapolated past the newest snapshot.

use log::trace;
use shared::{Position, Snapshot};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

pub const DEFAULT_RENDER_DELAY_MS: u64 = 100;
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// How far the server clock estimate moves toward each new sample
const CLOCK_CORRECTION_RATE: f64 = 0.1;

/// One remote entity as it should be drawn this frame
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEntity {
    pub id: String,
    pub position: Position,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderState {
    /// Server time the state was sampled at
    pub time: u64,
    pub entities: Vec<RenderedEntity>,
}

impl RenderState {
    pub fn get(&self, id: &str) -> Option<&RenderedEntity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[derive(Debug)]
pub struct SnapshotBuffer {
    snapshots: VecDeque<Snapshot>,
    render_delay: u64,
    capacity: usize,
}

impl SnapshotBuffer {
    pub fn new(render_delay: Duration) -> Self {
        Self::with_capacity(render_delay, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(render_delay: Duration, capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            render_delay: render_delay.as_millis().min(u64::MAX as u128) as u64,
            capacity: capacity.max(2),
        }
    }

    pub fn render_delay(&self) -> Duration {
        Duration::from_millis(self.render_delay)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn newest_time(&self) -> Option<u64> {
        self.snapshots.back().map(|snapshot| snapshot.time)
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    /// True when any buffered snapshot still lists `id`
    pub fn contains_entity(&self, id: &str) -> bool {
        self.snapshots
            .iter()
            .any(|snapshot| snapshot.state.iter().any(|entity| entity.id == id))
    }

    /// Inserts a snapshot in time order and drops what has aged out
    ///
    /// A snapshot carrying the same time as a buffered one replaces it.
    pub fn add_snapshot(&mut self, snapshot: Snapshot) {
        let index = self
            .snapshots
            .partition_point(|buffered| buffered.time < snapshot.time);

        match self.snapshots.get_mut(index) {
            Some(existing) if existing.time == snapshot.time => *existing = snapshot,
            _ => self.snapshots.insert(index, snapshot),
        }

        self.prune();
    }

    fn prune(&mut self) {
        let Some(newest) = self.newest_time() else {
            return;
        };
        let cutoff = newest.saturating_sub(self.render_delay.saturating_mul(3));

        while self
            .snapshots
            .front()
            .is_some_and(|oldest| oldest.time < cutoff)
        {
            self.snapshots.pop_front();
        }

        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    /// Interpolated world state at `now - render_delay`, `now` in server time
    pub fn interpolate(&self, now: u64) -> Option<RenderState> {
        if self.snapshots.len() < 2 {
            return None;
        }

        let render_time = now.saturating_sub(self.render_delay);
        let after_index = self
            .snapshots
            .partition_point(|snapshot| snapshot.time <= render_time);

        let (before, after) = if after_index == 0 {
            return None;
        } else if after_index == self.snapshots.len() {
            // Only an exact hit on the newest snapshot is still bracketed
            let last = self.snapshots.back()?;
            if last.time != render_time {
                return None;
            }
            (self.snapshots.get(after_index - 2)?, last)
        } else {
            (
                self.snapshots.get(after_index - 1)?,
                self.snapshots.get(after_index)?,
            )
        };

        let span = after.time.saturating_sub(before.time);
        let alpha = if span == 0 {
            1.0
        } else {
            (render_time.saturating_sub(before.time) as f64 / span as f64).clamp(0.0, 1.0) as f32
        };

        trace!(
            "Interpolating {} -> {} at {} (alpha {:.2})",
            before.time,
            after.time,
            render_time,
            alpha
        );

        Some(RenderState {
            time: render_time,
            entities: blend(before, after, alpha),
        })
    }
}

fn blend(before: &Snapshot, after: &Snapshot, alpha: f32) -> Vec<RenderedEntity> {
    let next: HashMap<&str, _> = after
        .state
        .iter()
        .map(|entity| (entity.id.as_str(), entity))
        .collect();
    let mut seen = HashSet::new();
    let mut entities = Vec::with_capacity(before.state.len().max(after.state.len()));

    for entity in &before.state {
        if !seen.insert(entity.id.as_str()) {
            continue;
        }

        let rendered = match next.get(entity.id.as_str()) {
            Some(later) => match (entity.position(), later.position()) {
                (Some(from), Some(to)) => Some(RenderedEntity {
                    id: entity.id.clone(),
                    position: from.lerp(to, alpha),
                    name: later.name.clone().or_else(|| entity.name.clone()),
                }),
                _ => None,
            },
            None => entity.position().map(|position| RenderedEntity {
                id: entity.id.clone(),
                position,
                name: entity.name.clone(),
            }),
        };

        match rendered {
            Some(rendered) => entities.push(rendered),
            None => trace!("Skipping entity {} with invalid coordinates", entity.id),
        }
    }

    for entity in &after.state {
        if !seen.insert(entity.id.as_str()) {
            continue;
        }
        if let Some(position) = entity.position() {
            entities.push(RenderedEntity {
                id: entity.id.clone(),
                position,
                name: entity.name.clone(),
            });
        }
    }

    entities
}

/// Smoothed estimate of `server_time - local_time`
#[derive(Debug, Default)]
pub struct ServerClock {
    offset: Option<f64>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, server_time: u64, local_time: u64) {
        let sample = server_time as f64 - local_time as f64;
        self.offset = Some(match self.offset {
            None => sample,
            Some(offset) => offset + (sample - offset) * CLOCK_CORRECTION_RATE,
        });
    }

    pub fn offset_ms(&self) -> Option<f64> {
        self.offset
    }

    /// Converts a local timestamp to server time once a sample has been seen
    pub fn to_server_time(&self, local_time: u64) -> Option<u64> {
        let server_time = local_time as f64 + self.offset?;
        Some(server_time.max(0.0).round() as u64)
    }

    pub fn reset(&mut self) {
        self.offset = None;
    }
}
