use serde::{Deserialize, Serialize};

pub mod protocol;

pub use protocol::{
    decode, encode, ClientMessage, Coordinate, EntityState, MovePayload, ProtocolError,
    ServerMessage, Snapshot,
};

pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const DEFAULT_HEALTH: i32 = 100;
pub const PLAYER_SPEED: f32 = 200.0;
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_TICK_RATE: u32 = 20;
pub const POSITION_UPDATE_INTERVAL_MS: u64 = 50;

/// Number of id characters used in a generated display name.
const NAME_ID_PREFIX: usize = 5;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn clamped_to_world(self) -> Self {
        Self {
            x: self.x.clamp(0.0, WORLD_WIDTH),
            y: self.y.clamp(0.0, WORLD_HEIGHT),
        }
    }

    pub fn lerp(self, other: Position, alpha: f32) -> Self {
        Self {
            x: self.x + (other.x - self.x) * alpha,
            y: self.y + (other.y - self.y) * alpha,
        }
    }
}

/// Authoritative player record, owned by the server for the lifetime of one connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub position: Position,
    pub health: i32,
}

impl Player {
    pub fn new(id: impl Into<String>, position: Position) -> Self {
        let id = id.into();
        Self {
            name: default_name(&id),
            id,
            position,
            health: DEFAULT_HEALTH,
        }
    }
}

/// Display name used until a player picks one: `"Player "` followed by the
/// first five characters of the connection id.
pub fn default_name(id: &str) -> String {
    let prefix: String = id.chars().take(NAME_ID_PREFIX).collect();
    format!("Player {}", prefix)
}

/// Trims a requested name, returning `None` when nothing is left.
pub fn sanitize_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
