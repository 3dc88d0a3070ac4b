//! Connection registry: the authoritative record of who is connected and where they are
//!
//! This module owns the server-side mapping from connection id to player state
//! and to the outbound channel used to reach that connection. It handles:
//! - Player creation on connect and removal on disconnect
//! - Movement and rename updates with input validation
//! - Immediate join/leave notifications and the initial game state
//! - Broadcasting encoded frames with per-destination failure isolation
//!
//! All methods run on the server's single event loop, so a broadcast always
//! sees every entry either fully present or fully absent.

use log::{debug, error, info, warn};
use rand::Rng;
use shared::{
    encode, sanitize_name, Player, Position, ServerMessage, Snapshot, WORLD_HEIGHT, WORLD_WIDTH,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// An encoded JSON envelope
    Text(String),
    /// Close the connection after flushing everything queued before it
    Close { reason: String },
}

/// Non-owning handle used only to address sends to one connection
pub type ChannelHandle = mpsc::UnboundedSender<Outbound>;

/// Outcome of sending one message to a set of connections
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// A live connection and the player it controls
#[derive(Debug)]
pub struct Connection {
    /// Player state owned by this connection
    pub player: Player,
    /// Outbound frame queue for the connection's writer task
    channel: ChannelHandle,
    /// Last time any message arrived from this connection
    pub last_seen: Instant,
}

impl Connection {
    fn new(player: Player, channel: ChannelHandle) -> Self {
        Self {
            player,
            channel,
            last_seen: Instant::now(),
        }
    }

    /// Checks whether the connection has been silent for longer than `timeout`
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    fn send(&self, frame: Outbound) -> bool {
        self.channel.send(frame).is_ok()
    }
}

/// Maps connection ids to players and channels, in order of connection
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Connection>,
    /// Connection ids in insertion order
    order: Vec<String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection at a random spawn point
    ///
    /// See [`ConnectionRegistry::on_connect_at`] for the side effects.
    pub fn on_connect(&mut self, connection_id: &str, channel: ChannelHandle) -> Player {
        let spawn = random_spawn(&mut rand::thread_rng());
        self.on_connect_at(connection_id, channel, spawn)
    }

    /// Registers a connection and announces it
    ///
    /// The newcomer receives `CONNECTED` with its id, every connection
    /// (newcomer included) receives `PLAYER_JOIN` with the full record, and the
    /// newcomer then receives `GAME_STATE` listing every other player. A
    /// duplicate connect for an id that is already registered overwrites the
    /// existing entry in place: fresh player record, new channel, same slot.
    pub fn on_connect_at(
        &mut self,
        connection_id: &str,
        channel: ChannelHandle,
        spawn: Position,
    ) -> Player {
        let player = Player::new(connection_id, spawn);
        let connection = Connection::new(player.clone(), channel);

        if self
            .connections
            .insert(connection_id.to_string(), connection)
            .is_some()
        {
            warn!(
                "Duplicate connect for {}, overwriting existing player",
                connection_id
            );
        } else {
            self.order.push(connection_id.to_string());
        }

        info!(
            "Player {} joined at ({}, {}), {} connected",
            connection_id,
            player.position.x,
            player.position.y,
            self.len()
        );

        self.send_to(
            connection_id,
            &ServerMessage::Connected {
                player_id: connection_id.to_string(),
            },
        );
        self.broadcast(&ServerMessage::PlayerJoin(player.clone()));
        self.send_to(
            connection_id,
            &ServerMessage::GameState {
                players: self.players_except(connection_id),
            },
        );

        player
    }

    /// Removes a connection and announces its departure
    ///
    /// Player and channel are removed together before `PLAYER_LEAVE` goes out,
    /// so the departing connection is not among the recipients. Unknown ids
    /// are a no-op and return `None`.
    pub fn on_disconnect(&mut self, connection_id: &str) -> Option<Player> {
        let connection = self.connections.remove(connection_id)?;
        self.order.retain(|id| id != connection_id);

        info!(
            "Player {} left, {} connected",
            connection_id,
            self.connections.len()
        );

        self.broadcast(&ServerMessage::PlayerLeave {
            player_id: connection_id.to_string(),
        });

        Some(connection.player)
    }

    /// Handles a transport disconnect reported for one specific channel
    ///
    /// When the id has since been overwritten by a newer connection, the entry
    /// belongs to that connection and is left alone.
    pub fn on_channel_closed(
        &mut self,
        connection_id: &str,
        channel: &ChannelHandle,
    ) -> Option<Player> {
        let owned = self
            .connections
            .get(connection_id)
            .is_some_and(|connection| connection.channel.same_channel(channel));
        if !owned {
            debug!("Ignoring disconnect from replaced connection {}", connection_id);
            return None;
        }
        self.on_disconnect(connection_id)
    }

    /// Closes a connection with a reason, then removes it like a disconnect
    pub fn disconnect_with_reason(&mut self, connection_id: &str, reason: &str) -> Option<Player> {
        if let Some(connection) = self.connections.get(connection_id) {
            connection.send(Outbound::Close {
                reason: reason.to_string(),
            });
        }
        self.on_disconnect(connection_id)
    }

    /// Overwrites a player's position, and name if one is given
    ///
    /// Returns false without touching anything when the connection is unknown
    /// or either coordinate is not finite. Names are trimmed; a name that is
    /// empty after trimming is ignored while the position still applies.
    pub fn apply_move(
        &mut self,
        connection_id: &str,
        position: Position,
        name: Option<&str>,
    ) -> bool {
        if !position.is_finite() {
            debug!("Rejected non-finite move from {}", connection_id);
            return false;
        }

        let Some(connection) = self.connections.get_mut(connection_id) else {
            return false;
        };

        connection.player.position = position;
        if let Some(name) = name.and_then(sanitize_name) {
            connection.player.name = name;
        }
        true
    }

    /// Renames a player; empty names and unknown ids are ignored
    pub fn update_name(&mut self, connection_id: &str, name: &str) -> bool {
        let Some(name) = sanitize_name(name) else {
            debug!("Rejected empty name from {}", connection_id);
            return false;
        };

        match self.connections.get_mut(connection_id) {
            Some(connection) => {
                info!("Player {} renamed to {}", connection_id, name);
                connection.player.name = name;
                true
            }
            None => false,
        }
    }

    /// Records activity from a connection for idle detection
    pub fn touch(&mut self, connection_id: &str) {
        if let Some(connection) = self.connections.get_mut(connection_id) {
            connection.last_seen = Instant::now();
        }
    }

    /// Lists connections that have been silent for longer than `timeout`
    pub fn idle_connections(&self, timeout: Duration) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.connections
                    .get(id.as_str())
                    .is_some_and(|connection| connection.is_idle(timeout))
            })
            .cloned()
            .collect()
    }

    /// Players in order of connection
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.order
            .iter()
            .filter_map(|id| self.connections.get(id))
            .map(|connection| &connection.player)
    }

    /// Read-only copy of every player, in order of connection
    pub fn snapshot_all(&self) -> Vec<Player> {
        self.players().cloned().collect()
    }

    /// Captures every player's position at `time`
    pub fn snapshot(&self, time: u64) -> Snapshot {
        Snapshot::from_players(time, self.players())
    }

    pub fn get(&self, connection_id: &str) -> Option<&Player> {
        self.connections
            .get(connection_id)
            .map(|connection| &connection.player)
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Sends one message to every connection
    ///
    /// The message is encoded once. A failed send only counts against that
    /// destination; the remaining connections are still served.
    pub fn broadcast(&self, message: &ServerMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        if self.connections.is_empty() {
            return report;
        }

        let text = match encode(message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {} broadcast: {}", message.kind(), e);
                report.failed = self.connections.len();
                return report;
            }
        };

        for id in &self.order {
            let Some(connection) = self.connections.get(id) else {
                continue;
            };
            if connection.send(Outbound::Text(text.clone())) {
                report.sent += 1;
            } else {
                debug!("Dropped {} for closed connection {}", message.kind(), id);
                report.failed += 1;
            }
        }

        report
    }

    /// Sends one message to a single connection, returning whether it was queued
    pub fn send_to(&self, connection_id: &str, message: &ServerMessage) -> bool {
        let Some(connection) = self.connections.get(connection_id) else {
            return false;
        };

        match encode(message) {
            Ok(text) => connection.send(Outbound::Text(text)),
            Err(e) => {
                error!("Failed to encode {} for {}: {}", message.kind(), connection_id, e);
                false
            }
        }
    }

    fn players_except(&self, connection_id: &str) -> HashMap<String, Player> {
        self.connections
            .iter()
            .filter(|(id, _)| id.as_str() != connection_id)
            .map(|(id, connection)| (id.clone(), connection.player.clone()))
            .collect()
    }
}

/// Picks a uniformly random whole-pixel spawn point inside the world bounds
pub fn random_spawn(rng: &mut impl Rng) -> Position {
    Position::new(
        rng.gen_range(0.0..WORLD_WIDTH).floor(),
        rng.gen_range(0.0..WORLD_HEIGHT).floor(),
    )
}
