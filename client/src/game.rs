use crate::interpolation::{RenderState, ServerClock, SnapshotBuffer};
use crate::reconnect::ConnectionStatus;
use log::{debug, info};
use shared::{
    default_name, sanitize_name, ClientMessage, MovePayload, Player, Position, ServerMessage,
    PLAYER_SPEED, POSITION_UPDATE_INTERVAL_MS, WORLD_HEIGHT, WORLD_WIDTH,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Display capabilities the scene drives
///
/// Implementations own whatever sprites and labels they draw; the scene only
/// tells them when a remote entity appears, moves or goes away.
pub trait RenderSurface {
    fn spawn_remote(&mut self, id: &str, name: &str, position: Position);
    fn update_remote(&mut self, id: &str, position: Position, name: Option<&str>);
    fn despawn_remote(&mut self, id: &str);
    fn set_status(&mut self, status: &ConnectionStatus);
}

/// Direction the local player wants to move, each axis in `-1.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveIntent {
    pub dx: f32,
    pub dy: f32,
}

impl MoveIntent {
    pub fn new(dx: f32, dy: f32) -> Self {
        let axis = |v: f32| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            dx: axis(dx),
            dy: axis(dy),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlayer {
    pub id: String,
    pub name: String,
    pub position: Position,
}

impl LocalPlayer {
    fn advance(&mut self, intent: MoveIntent, dt: f32) {
        let next = Position::new(
            self.position.x + intent.dx * PLAYER_SPEED * dt,
            self.position.y + intent.dy * PLAYER_SPEED * dt,
        );
        if next.is_finite() {
            self.position = next.clamped_to_world();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub name: String,
    pub position: Position,
}

/// Client-side view of the shared world
pub struct GameScene {
    local: Option<LocalPlayer>,
    identified: bool,
    custom_name: Option<String>,
    remotes: HashMap<String, RemoteEntity>,
    tombstones: HashSet<String>,
    /// Joined players not yet seen in a render state, with local join time
    pending_joins: HashMap<String, u64>,
    buffer: SnapshotBuffer,
    clock: ServerClock,
    status: ConnectionStatus,
    last_position_update: Option<u64>,
}

impl GameScene {
    pub fn new(render_delay: Duration, name: Option<String>) -> Self {
        Self {
            local: None,
            identified: false,
            custom_name: name.as_deref().and_then(sanitize_name),
            remotes: HashMap::new(),
            tombstones: HashSet::new(),
            pending_joins: HashMap::new(),
            buffer: SnapshotBuffer::new(render_delay),
            clock: ServerClock::new(),
            status: ConnectionStatus::Connecting { attempt: 1 },
            last_position_update: None,
        }
    }

    /// Id assigned by the server for the current connection
    pub fn player_id(&self) -> Option<&str> {
        if self.identified {
            self.local.as_ref().map(|local| local.id.as_str())
        } else {
            None
        }
    }

    pub fn local_player(&self) -> Option<&LocalPlayer> {
        self.local.as_ref()
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn remote(&self, id: &str) -> Option<&RemoteEntity> {
        self.remotes.get(id)
    }

    pub fn remotes(&self) -> impl Iterator<Item = (&String, &RemoteEntity)> {
        self.remotes.iter()
    }

    pub fn buffered_snapshots(&self) -> usize {
        self.buffer.len()
    }

    pub fn handle_status(&mut self, status: ConnectionStatus, surface: &mut impl RenderSurface) {
        if !status.is_connected() {
            self.identified = false;
        }
        surface.set_status(&status);
        self.status = status;
    }

    /// Applies one server message; `local_time` is this client's clock in ms
    pub fn handle_message(
        &mut self,
        message: ServerMessage,
        local_time: u64,
        surface: &mut impl RenderSurface,
    ) {
        match message {
            ServerMessage::Connected { player_id } => self.on_connected(player_id, surface),
            ServerMessage::PlayerJoin(player) => {
                self.on_player_join(player, local_time, surface)
            }
            ServerMessage::PlayerLeave { player_id } => self.on_player_leave(&player_id, surface),
            ServerMessage::GameState { players } => {
                for player in players.into_values() {
                    self.on_player_join(player, local_time, surface);
                }
            }
            ServerMessage::PlayerMove { player_id, .. } => {
                debug!("Ignoring PLAYER_MOVE for {}", player_id);
            }
            ServerMessage::Snapshot(snapshot) => {
                self.clock.observe(snapshot.time, local_time);
                self.buffer.add_snapshot(snapshot);
            }
        }
    }

    fn on_connected(&mut self, player_id: String, surface: &mut impl RenderSurface) {
        info!("Connected! Player ID: {}", player_id);

        let same_session = self
            .local
            .as_ref()
            .is_some_and(|local| local.id == player_id);
        if !same_session {
            self.reset_world(surface);
        }

        let name = self
            .custom_name
            .clone()
            .unwrap_or_else(|| default_name(&player_id));
        let position = self
            .local
            .as_ref()
            .map(|local| local.position)
            .unwrap_or(Position::new(WORLD_WIDTH / 2.0, WORLD_HEIGHT / 2.0));

        self.local = Some(LocalPlayer {
            id: player_id,
            name,
            position,
        });
        self.identified = true;
        self.last_position_update = None;
    }

    /// Drops everything learned from a previous connection
    fn reset_world(&mut self, surface: &mut impl RenderSurface) {
        for id in self.remotes.keys() {
            surface.despawn_remote(id);
        }
        self.remotes.clear();
        self.tombstones.clear();
        self.pending_joins.clear();
        self.buffer.clear();
        self.clock.reset();
    }

    fn on_player_join(
        &mut self,
        player: Player,
        local_time: u64,
        surface: &mut impl RenderSurface,
    ) {
        if let Some(local) = self.local.as_mut() {
            if local.id == player.id {
                // Our own join record carries the spawn point
                local.position = player.position;
                return;
            }
        }

        self.tombstones.remove(&player.id);
        if self.remotes.contains_key(&player.id) {
            return;
        }

        surface.spawn_remote(&player.id, &player.name, player.position);
        self.pending_joins.insert(player.id.clone(), local_time);
        self.remotes.insert(
            player.id,
            RemoteEntity {
                name: player.name,
                position: player.position,
            },
        );
    }

    fn on_player_leave(&mut self, player_id: &str, surface: &mut impl RenderSurface) {
        if self.player_id() == Some(player_id) {
            return;
        }
        if self.remotes.remove(player_id).is_some() {
            surface.despawn_remote(player_id);
        }
        self.pending_joins.remove(player_id);
        self.tombstones.insert(player_id.to_string());
    }

    /// Advances local prediction and reconciles remote entities for one frame
    pub fn update(
        &mut self,
        dt: f32,
        intent: MoveIntent,
        local_time: u64,
        surface: &mut impl RenderSurface,
    ) {
        if self.identified {
            if let Some(local) = self.local.as_mut() {
                local.advance(intent, dt);
            }
        }

        let buffer = &self.buffer;
        self.tombstones.retain(|id| buffer.contains_entity(id));

        // A join the snapshots never confirm is dropped after one retention window
        let grace = self.buffer.render_delay().as_millis() as u64 * 3;
        self.pending_joins
            .retain(|_, joined| local_time.saturating_sub(*joined) < grace);

        let Some(now) = self.clock.to_server_time(local_time) else {
            return;
        };
        if let Some(state) = self.buffer.interpolate(now) {
            self.reconcile(&state, surface);
        }
    }

    fn reconcile(&mut self, state: &RenderState, surface: &mut impl RenderSurface) {
        let own_id = self.local.as_ref().map(|local| local.id.as_str());
        let mut present = HashSet::with_capacity(state.len());

        for entity in &state.entities {
            if Some(entity.id.as_str()) == own_id || self.tombstones.contains(&entity.id) {
                continue;
            }
            present.insert(entity.id.as_str());
            self.pending_joins.remove(&entity.id);

            match self.remotes.get_mut(&entity.id) {
                Some(remote) => {
                    let renamed = entity
                        .name
                        .as_deref()
                        .filter(|name| *name != remote.name);
                    surface.update_remote(&entity.id, entity.position, renamed);
                    remote.position = entity.position;
                    if let Some(name) = renamed {
                        remote.name = name.to_string();
                    }
                }
                None => {
                    let name = entity
                        .name
                        .clone()
                        .unwrap_or_else(|| default_name(&entity.id));
                    surface.spawn_remote(&entity.id, &name, entity.position);
                    self.remotes.insert(
                        entity.id.clone(),
                        RemoteEntity {
                            name,
                            position: entity.position,
                        },
                    );
                }
            }
        }

        let stale: Vec<String> = self
            .remotes
            .keys()
            .filter(|id| {
                !present.contains(id.as_str()) && !self.pending_joins.contains_key(id.as_str())
            })
            .cloned()
            .collect();
        for id in stale {
            self.remotes.remove(&id);
            surface.despawn_remote(&id);
        }
    }

    /// Position report for the server, at most once per update interval
    pub fn position_update(&mut self, local_time: u64) -> Option<ClientMessage> {
        if !self.identified || !self.status.is_connected() {
            return None;
        }
        if let Some(last) = self.last_position_update {
            if local_time.saturating_sub(last) < POSITION_UPDATE_INTERVAL_MS {
                return None;
            }
        }

        let local = self.local.as_ref()?;
        self.last_position_update = Some(local_time);
        Some(ClientMessage::Move(MovePayload {
            x: local.position.x,
            y: local.position.y,
            name: Some(local.name.clone()),
        }))
    }

    /// Changes the local display name, returning the message announcing it
    pub fn set_name(&mut self, name: &str) -> Option<ClientMessage> {
        let name = sanitize_name(name)?;
        self.custom_name = Some(name.clone());

        let local = self.local.as_mut()?;
        if local.name == name {
            return None;
        }
        local.name = name.clone();

        if self.identified {
            Some(ClientMessage::UpdateName { name })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::Snapshot;

    #[derive(Debug, PartialEq)]
    enum Call {
        Spawn(String, String),
        Update(String, Option<String>),
        Despawn(String),
        Status(ConnectionStatus),
    }

    #[derive(Default)]
    struct RecordingSurface {
        calls: Vec<Call>,
    }

    impl RenderSurface for RecordingSurface {
        fn spawn_remote(&mut self, id: &str, name: &str, _position: Position) {
            self.calls.push(Call::Spawn(id.to_string(), name.to_string()));
        }

        fn update_remote(&mut self, id: &str, _position: Position, name: Option<&str>) {
            self.calls
                .push(Call::Update(id.to_string(), name.map(str::to_string)));
        }

        fn despawn_remote(&mut self, id: &str) {
            self.calls.push(Call::Despawn(id.to_string()));
        }

        fn set_status(&mut self, status: &ConnectionStatus) {
            self.calls.push(Call::Status(status.clone()));
        }
    }

    fn scene() -> GameScene {
        GameScene::new(Duration::from_millis(100), None)
    }

    fn connected_scene(id: &str, surface: &mut RecordingSurface) -> GameScene {
        let mut scene = scene();
        scene.handle_status(ConnectionStatus::Connected, surface);
        scene.handle_message(
            ServerMessage::Connected {
                player_id: id.to_string(),
            },
            0,
            surface,
        );
        surface.calls.clear();
        scene
    }

    fn snapshot(time: u64, players: &[(&str, f32, f32)]) -> ServerMessage {
        let players: Vec<Player> = players
            .iter()
            .map(|(id, x, y)| Player::new(*id, Position::new(*x, *y)))
            .collect();
        ServerMessage::Snapshot(Snapshot::from_players(time, &players))
    }

    #[test]
    fn test_connected_assigns_identity() {
        let mut surface = RecordingSurface::default();
        let scene = connected_scene("abcdefgh", &mut surface);

        assert_eq!(scene.player_id(), Some("abcdefgh"));
        let local = scene.local_player().unwrap();
        assert_eq!(local.name, "Player abcde");
        assert_eq!(local.position, Position::new(400.0, 300.0));
    }

    #[test]
    fn test_own_join_seeds_spawn() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);

        scene.handle_message(
            ServerMessage::PlayerJoin(Player::new("me", Position::new(12.0, 34.0))),
            0,
            &mut surface,
        );

        assert_eq!(scene.remote_count(), 0);
        assert_eq!(
            scene.local_player().unwrap().position,
            Position::new(12.0, 34.0)
        );
        assert!(surface.calls.is_empty());
    }

    #[test]
    fn test_join_and_leave() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);

        scene.handle_message(
            ServerMessage::PlayerJoin(Player::new("other", Position::new(1.0, 1.0))),
            0,
            &mut surface,
        );
        assert_eq!(scene.remote_count(), 1);
        assert_eq!(scene.remote("other").unwrap().name, "Player other");

        scene.handle_message(
            ServerMessage::PlayerLeave {
                player_id: "other".to_string(),
            },
            0,
            &mut surface,
        );
        assert_eq!(scene.remote_count(), 0);
        assert_eq!(
            surface.calls,
            vec![
                Call::Spawn("other".to_string(), "Player other".to_string()),
                Call::Despawn("other".to_string()),
            ]
        );
    }

    #[test]
    fn test_game_state_skips_self_and_known() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);
        scene.handle_message(
            ServerMessage::PlayerJoin(Player::new("a", Position::default())),
            0,
            &mut surface,
        );

        let players: HashMap<String, Player> = ["me", "a", "b"]
            .iter()
            .map(|id| (id.to_string(), Player::new(*id, Position::default())))
            .collect();
        scene.handle_message(ServerMessage::GameState { players }, 0, &mut surface);

        assert_eq!(scene.remote_count(), 2);
        assert!(scene.remote("me").is_none());
        let spawns = surface
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Spawn(..)))
            .count();
        assert_eq!(spawns, 2);
    }

    #[test]
    fn test_snapshots_drive_remote_positions() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);

        scene.handle_message(snapshot(1_000, &[("me", 0.0, 0.0), ("a", 0.0, 0.0)]), 0, &mut surface);
        scene.handle_message(snapshot(1_050, &[("me", 0.0, 0.0), ("a", 10.0, 0.0)]), 50, &mut surface);

        // Server clock runs ~1000ms ahead, so local 115 renders server 1015
        scene.update(0.0, MoveIntent::default(), 115, &mut surface);

        assert_eq!(scene.remote_count(), 1);
        let a = scene.remote("a").unwrap();
        assert_approx_eq!(a.position.x, 3.0, 1e-3);
        assert!(scene.remote("me").is_none());
    }

    #[test]
    fn test_entities_missing_from_render_state_are_removed() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);
        scene.handle_message(
            ServerMessage::PlayerJoin(Player::new("lurker", Position::default())),
            0,
            &mut surface,
        );

        scene.handle_message(snapshot(1_000, &[("a", 0.0, 0.0)]), 0, &mut surface);
        scene.handle_message(snapshot(1_050, &[("a", 1.0, 0.0)]), 50, &mut surface);
        scene.update(0.0, MoveIntent::default(), 125, &mut surface);
        assert!(scene.remote("lurker").is_some());

        // Still absent once the join is older than the retention window
        scene.handle_message(snapshot(1_300, &[("a", 2.0, 0.0)]), 300, &mut surface);
        scene.handle_message(snapshot(1_350, &[("a", 3.0, 0.0)]), 350, &mut surface);
        scene.update(0.0, MoveIntent::default(), 400, &mut surface);

        assert!(scene.remote("lurker").is_none());
        assert!(surface.calls.contains(&Call::Despawn("lurker".to_string())));
        assert!(scene.remote("a").is_some());
    }

    #[test]
    fn test_fresh_join_survives_until_snapshots_catch_up() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);

        scene.handle_message(snapshot(1_000, &[("me", 0.0, 0.0)]), 0, &mut surface);
        scene.handle_message(snapshot(1_050, &[("me", 0.0, 0.0)]), 50, &mut surface);
        scene.handle_message(snapshot(1_100, &[("me", 0.0, 0.0)]), 100, &mut surface);
        scene.handle_message(
            ServerMessage::PlayerJoin(Player::new("bee", Position::new(5.0, 5.0))),
            110,
            &mut surface,
        );
        scene.update(0.016, MoveIntent::default(), 126, &mut surface);

        assert_eq!(scene.remote_count(), 1);
        assert!(!surface.calls.contains(&Call::Despawn("bee".to_string())));

        // Once a render state includes the newcomer it is reconciled normally
        scene.handle_message(
            snapshot(1_150, &[("me", 0.0, 0.0), ("bee", 6.0, 5.0)]),
            150,
            &mut surface,
        );
        scene.handle_message(
            snapshot(1_200, &[("me", 0.0, 0.0), ("bee", 8.0, 5.0)]),
            200,
            &mut surface,
        );
        scene.update(0.016, MoveIntent::default(), 275, &mut surface);

        assert_eq!(scene.remote("bee").unwrap().position, Position::new(7.0, 5.0));
        assert_eq!(
            surface
                .calls
                .iter()
                .filter(|call| matches!(call, Call::Spawn(..)))
                .count(),
            1
        );
    }

    #[test]
    fn test_left_player_not_resurrected_by_buffered_snapshots() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);

        scene.handle_message(snapshot(1_000, &[("a", 0.0, 0.0)]), 0, &mut surface);
        scene.handle_message(snapshot(1_050, &[("a", 1.0, 0.0)]), 50, &mut surface);
        scene.update(0.0, MoveIntent::default(), 125, &mut surface);
        assert_eq!(scene.remote_count(), 1);

        scene.handle_message(
            ServerMessage::PlayerLeave {
                player_id: "a".to_string(),
            },
            0,
            &mut surface,
        );
        scene.update(0.0, MoveIntent::default(), 140, &mut surface);

        assert_eq!(scene.remote_count(), 0);
    }

    #[test]
    fn test_renamed_entity_updates_label() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);
        let mut renamed = Player::new("a", Position::new(1.0, 0.0));
        renamed.name = "Alice".to_string();

        scene.handle_message(snapshot(1_000, &[("a", 0.0, 0.0)]), 0, &mut surface);
        scene.handle_message(
            ServerMessage::Snapshot(Snapshot::from_players(1_050, [&renamed])),
            50,
            &mut surface,
        );
        scene.update(0.0, MoveIntent::default(), 125, &mut surface);

        assert_eq!(scene.remote("a").unwrap().name, "Alice");
    }

    #[test]
    fn test_local_prediction_clamps_to_world() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);

        scene.update(0.5, MoveIntent::new(1.0, 0.0), 0, &mut surface);
        assert_approx_eq!(scene.local_player().unwrap().position.x, 500.0, 1e-3);

        scene.update(10.0, MoveIntent::new(-1.0, 1.0), 0, &mut surface);
        let position = scene.local_player().unwrap().position;
        assert_eq!(position, Position::new(0.0, WORLD_HEIGHT));
    }

    #[test]
    fn test_moves_suppressed_until_identified() {
        let mut surface = RecordingSurface::default();
        let mut scene = scene();
        scene.handle_status(ConnectionStatus::Connected, &mut surface);
        assert!(scene.position_update(0).is_none());

        scene.handle_message(
            ServerMessage::Connected {
                player_id: "me".to_string(),
            },
            0,
            &mut surface,
        );
        let Some(ClientMessage::Move(payload)) = scene.position_update(100) else {
            panic!("Expected a move message");
        };
        assert_eq!(payload.name.as_deref(), Some("Player me"));

        assert!(scene.position_update(120).is_none());
        assert!(scene.position_update(150).is_some());

        scene.handle_status(
            ConnectionStatus::Reconnecting {
                attempt: 1,
                retry_in: Duration::from_secs(2),
            },
            &mut surface,
        );
        assert!(scene.player_id().is_none());
        assert!(scene.position_update(1_000).is_none());
    }

    #[test]
    fn test_new_identity_resets_world() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("first", &mut surface);
        scene.handle_message(
            ServerMessage::PlayerJoin(Player::new("a", Position::default())),
            0,
            &mut surface,
        );
        scene.handle_message(snapshot(1_000, &[("a", 0.0, 0.0)]), 0, &mut surface);
        assert_eq!(scene.buffered_snapshots(), 1);

        scene.handle_message(
            ServerMessage::Connected {
                player_id: "second".to_string(),
            },
            0,
            &mut surface,
        );

        assert_eq!(scene.remote_count(), 0);
        assert_eq!(scene.buffered_snapshots(), 0);
        assert_eq!(scene.player_id(), Some("second"));
        assert!(surface.calls.contains(&Call::Despawn("a".to_string())));
    }

    #[test]
    fn test_set_name() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);

        assert!(scene.set_name("   ").is_none());
        assert_eq!(
            scene.set_name("  Bob "),
            Some(ClientMessage::UpdateName {
                name: "Bob".to_string()
            })
        );
        assert!(scene.set_name("Bob").is_none());
        assert_eq!(scene.local_player().unwrap().name, "Bob");
    }

    #[test]
    fn test_requested_name_survives_reconnect() {
        let mut surface = RecordingSurface::default();
        let mut scene = GameScene::new(Duration::from_millis(100), Some(" Carol ".to_string()));
        scene.handle_status(ConnectionStatus::Connected, &mut surface);
        scene.handle_message(
            ServerMessage::Connected {
                player_id: "one".to_string(),
            },
            0,
            &mut surface,
        );
        assert_eq!(scene.local_player().unwrap().name, "Carol");

        scene.handle_message(
            ServerMessage::Connected {
                player_id: "two".to_string(),
            },
            0,
            &mut surface,
        );
        assert_eq!(scene.local_player().unwrap().name, "Carol");
    }

    #[test]
    fn test_status_forwarded_to_surface() {
        let mut surface = RecordingSurface::default();
        let mut scene = scene();
        scene.handle_status(ConnectionStatus::GaveUp { attempts: 5 }, &mut surface);

        assert_eq!(
            surface.calls,
            vec![Call::Status(ConnectionStatus::GaveUp { attempts: 5 })]
        );
        assert_eq!(scene.status(), &ConnectionStatus::GaveUp { attempts: 5 });
    }

    #[test]
    fn test_player_move_is_ignored() {
        let mut surface = RecordingSurface::default();
        let mut scene = connected_scene("me", &mut surface);
        scene.handle_message(
            ServerMessage::PlayerMove {
                player_id: "a".to_string(),
                position: Position::new(1.0, 1.0),
            },
            0,
            &mut surface,
        );
        assert_eq!(scene.remote_count(), 0);
        assert!(surface.calls.is_empty());
    }
}
