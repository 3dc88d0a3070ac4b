//! Wire envelopes exchanged between the server and its clients
//!
//! Every frame is a JSON object `{"type": ..., "payload": ...}`. Server frames
//! use the upper-case type names (`PLAYER_JOIN`, `SNAPSHOT`, ...) while client
//! frames use the lower-camel names (`move`, `updateName`). Payloads are closed
//! enums, so anything that does not match a known shape is rejected when the
//! frame is decoded rather than inside game logic.

use crate::{Player, Position};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Messages sent from the server to clients
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// First frame on every accepted connection, carrying the id the server assigned
    Connected {
        #[serde(rename = "playerId")]
        player_id: String,
    },
    PlayerJoin(Player),
    PlayerLeave {
        #[serde(rename = "playerId")]
        player_id: String,
    },
    GameState {
        players: HashMap<String, Player>,
    },
    PlayerMove {
        #[serde(rename = "playerId")]
        player_id: String,
        position: Position,
    },
    Snapshot(Snapshot),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "CONNECTED",
            ServerMessage::PlayerJoin(_) => "PLAYER_JOIN",
            ServerMessage::PlayerLeave { .. } => "PLAYER_LEAVE",
            ServerMessage::GameState { .. } => "GAME_STATE",
            ServerMessage::PlayerMove { .. } => "PLAYER_MOVE",
            ServerMessage::Snapshot(_) => "SNAPSHOT",
        }
    }
}

/// Messages sent from a client to the server
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "move")]
    Move(MovePayload),
    #[serde(rename = "updateName")]
    UpdateName { name: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MovePayload {
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl MovePayload {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Complete capture of every player's position at one server tick
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    /// Milliseconds on the server's monotonic clock
    pub time: u64,
    pub state: Vec<EntityState>,
}

impl Snapshot {
    pub fn from_players<'a>(time: u64, players: impl IntoIterator<Item = &'a Player>) -> Self {
        Self {
            time,
            state: players.into_iter().map(EntityState::from).collect(),
        }
    }

    pub fn has_unique_ids(&self) -> bool {
        let mut seen = std::collections::HashSet::with_capacity(self.state.len());
        self.state.iter().all(|entity| seen.insert(entity.id.as_str()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntityState {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntityState {
    /// Returns the entity position when both coordinates coerce to finite numbers
    pub fn position(&self) -> Option<Position> {
        let x = self.x.as_ref()?.as_f32()?;
        let y = self.y.as_ref()?.as_f32()?;
        Some(Position::new(x, y))
    }
}

impl From<&Player> for EntityState {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            x: Some(Coordinate::Number(player.position.x as f64)),
            y: Some(Coordinate::Number(player.position.y as f64)),
            name: Some(player.name.clone()),
        }
    }
}

/// A snapshot coordinate as it appears on the wire.
///
/// Producers are expected to send plain numbers, but numeric strings are
/// accepted too. Any other JSON value decodes into `Other` so that one bad
/// entity does not invalidate the whole snapshot.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Coordinate {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl Coordinate {
    pub fn as_f32(&self) -> Option<f32> {
        let value = match self {
            Coordinate::Number(n) => *n as f32,
            Coordinate::Text(s) => s.trim().parse::<f32>().ok()?,
            Coordinate::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}
