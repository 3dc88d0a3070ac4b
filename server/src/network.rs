//! Server network layer handling WebSocket connections and the event loop

use crate::config::ServerConfig;
use crate::registry::{ChannelHandle, ConnectionRegistry, Outbound};
use crate::tick::{TickLoop, TickTransition};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{decode, ClientMessage};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

const CONNECTION_ID_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Events sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        connection_id: String,
        channel: ChannelHandle,
    },
    Message {
        connection_id: String,
        message: ClientMessage,
    },
    /// Any inbound frame, including control frames and ones that fail to decode
    Activity {
        connection_id: String,
    },
    Disconnected {
        connection_id: String,
        /// Identifies which connection ended when an id has been reused
        channel: ChannelHandle,
    },
}

/// Authoritative server: accepts connections and runs the tick loop
///
/// Connection tasks never touch game state. They forward decoded events to
/// the loop in [`Server::run`], which applies them to the registry one at a
/// time in between tick firings.
#[derive(Debug)]
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: ServerConfig,
    registry: ConnectionRegistry,
    ticker: TickLoop,

    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            ticker: TickLoop::new(config.tick_rate),
            config,
            registry: ConnectionRegistry::new(),
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn ticker(&self) -> &TickLoop {
        &self.ticker
    }

    /// Spawns the task that accepts TCP connections
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        tokio::spawn(handle_connection(stream, addr, event_tx.clone()));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Applies one connection event to the registry
    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected {
                connection_id,
                channel,
            } => {
                if !self.registry.contains(&connection_id)
                    && self.registry.len() >= self.config.max_players
                {
                    warn!(
                        "Refusing {}: server full ({} players)",
                        connection_id,
                        self.registry.len()
                    );
                    let _ = channel.send(Outbound::Close {
                        reason: "Server full".to_string(),
                    });
                    return;
                }
                self.registry.on_connect(&connection_id, channel);
            }

            ServerEvent::Message {
                connection_id,
                message,
            } => {
                self.registry.touch(&connection_id);
                match message {
                    ClientMessage::Move(payload) => {
                        let applied = self.registry.apply_move(
                            &connection_id,
                            payload.position(),
                            payload.name.as_deref(),
                        );
                        if !applied {
                            debug!("Ignored move from {}", connection_id);
                        }
                    }
                    ClientMessage::UpdateName { name } => {
                        self.registry.update_name(&connection_id, &name);
                    }
                }
            }

            ServerEvent::Activity { connection_id } => {
                self.registry.touch(&connection_id);
            }

            ServerEvent::Disconnected {
                connection_id,
                channel,
            } => {
                self.registry.on_channel_closed(&connection_id, &channel);
            }
        }
    }

    /// Drops connections that have gone quiet, when an idle timeout is set
    fn sweep_idle(&mut self) {
        let Some(timeout) = self.config.idle_timeout else {
            return;
        };
        for connection_id in self.registry.idle_connections(timeout) {
            info!("Player {} timed out", connection_id);
            self.registry.disconnect_with_reason(&connection_id, "Idle timeout");
        }
    }

    fn sync_ticker(&mut self, tick_interval: &mut Interval) {
        if let Some(TickTransition::Started) = self.ticker.sync(self.registry.len()) {
            tick_interval.reset();
        }
    }

    /// Main server loop coordinating connection events and ticks
    pub async fn run(mut self) -> Result<(), ServerError> {
        self.spawn_acceptor();

        let mut tick_interval = interval(self.ticker.period());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep_interval = interval(Duration::from_secs(1));

        info!(
            "Server started: {}Hz ticks, up to {} players",
            self.config.tick_rate, self.config.max_players
        );

        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    let Some(event) = event else {
                        info!("Server shutting down");
                        break;
                    };
                    self.handle_event(event);
                    self.sync_ticker(&mut tick_interval);
                },

                _ = tick_interval.tick(), if self.ticker.is_running() => {
                    self.ticker.run_tick(&self.registry);
                },

                _ = sweep_interval.tick(), if self.config.idle_timeout.is_some() => {
                    self.sweep_idle();
                    self.sync_ticker(&mut tick_interval);
                },
            }
        }

        Ok(())
    }
}

/// Generates a connection id from random alphanumerics
pub fn generate_connection_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CONNECTION_ID_LEN)
        .map(char::from)
        .collect()
}

/// Runs one WebSocket connection until either side closes it
///
/// Inbound frames are decoded and forwarded to the server loop. Frames that
/// do not decode are logged, and like control frames they only count as
/// activity. Outbound frames arrive on the channel handed to the registry,
/// and the writer stops on a queued close or once the reader has finished
/// and the registry has let go of the channel.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let connection_id = generate_connection_id();
    debug!("Connection {} accepted from {}", connection_id, addr);

    let (mut sink, mut stream) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let channel = out_tx.clone();

    if event_tx
        .send(ServerEvent::Connected {
            connection_id: connection_id.clone(),
            channel: out_tx,
        })
        .is_err()
    {
        return;
    }

    let writer_id = connection_id.clone();
    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!("Send to {} failed: {}", writer_id, e);
                        break;
                    }
                }
                Outbound::Close { reason } => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => match decode::<ClientMessage>(&text) {
                Ok(message) => ServerEvent::Message {
                    connection_id: connection_id.clone(),
                    message,
                },
                Err(e) => {
                    warn!("Ignoring malformed message from {}: {}", connection_id, e);
                    ServerEvent::Activity {
                        connection_id: connection_id.clone(),
                    }
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => ServerEvent::Activity {
                connection_id: connection_id.clone(),
            },
            Err(e) => {
                debug!("Connection {} errored: {}", connection_id, e);
                break;
            }
        };
        if event_tx.send(event).is_err() {
            break;
        }
    }

    let _ = event_tx.send(ServerEvent::Disconnected {
        connection_id,
        channel,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{MovePayload, Position, ServerMessage};
    use tokio_test::{assert_err, assert_ok};

    async fn test_server(max_players: usize) -> Server {
        let config = ServerConfig {
            max_players,
            ..ServerConfig::default().with_bind_addr("127.0.0.1:0")
        };
        assert_ok!(Server::bind(config).await)
    }

    fn connect(
        server: &mut Server,
        id: &str,
    ) -> (ChannelHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        server.handle_event(ServerEvent::Connected {
            connection_id: id.to_string(),
            channel: tx.clone(),
        });
        (tx, rx)
    }

    fn disconnect(server: &mut Server, id: &str, channel: &ChannelHandle) {
        server.handle_event(ServerEvent::Disconnected {
            connection_id: id.to_string(),
            channel: channel.clone(),
        });
    }

    fn frames(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_generate_connection_id() {
        let a = generate_connection_id();
        let b = generate_connection_id();
        assert_eq!(a.len(), CONNECTION_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let server = test_server(4).await;
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let config = ServerConfig::default().with_bind_addr("not-an-address");
        let error = assert_err!(Server::bind(config).await);
        assert!(matches!(error, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_move_event_updates_registry() {
        let mut server = test_server(4).await;
        let (_tx, _rx) = connect(&mut server, "alpha");

        server.handle_event(ServerEvent::Message {
            connection_id: "alpha".to_string(),
            message: ClientMessage::Move(MovePayload {
                x: 12.0,
                y: 34.0,
                name: Some("Ann".to_string()),
            }),
        });

        let player = server.registry().get("alpha").unwrap();
        assert_eq!(player.position, Position::new(12.0, 34.0));
        assert_eq!(player.name, "Ann");
    }

    #[tokio::test]
    async fn test_update_name_event() {
        let mut server = test_server(4).await;
        let (_tx, _rx) = connect(&mut server, "alpha");

        server.handle_event(ServerEvent::Message {
            connection_id: "alpha".to_string(),
            message: ClientMessage::UpdateName {
                name: "Zed".to_string(),
            },
        });

        assert_eq!(server.registry().get("alpha").unwrap().name, "Zed");
    }

    #[tokio::test]
    async fn test_events_for_unknown_connection_are_noops() {
        let mut server = test_server(4).await;

        server.handle_event(ServerEvent::Message {
            connection_id: "ghost".to_string(),
            message: ClientMessage::Move(MovePayload {
                x: 1.0,
                y: 1.0,
                name: None,
            }),
        });
        let (ghost, _rx) = mpsc::unbounded_channel();
        disconnect(&mut server, "ghost", &ghost);

        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_server_full_closes_newcomer() {
        let mut server = test_server(1).await;
        let _first = connect(&mut server, "alpha");
        let (_tx, mut second) = connect(&mut server, "bravo");

        assert_eq!(server.registry().len(), 1);
        assert_eq!(
            frames(&mut second),
            vec![Outbound::Close {
                reason: "Server full".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_disconnect_event_notifies_others() {
        let mut server = test_server(4).await;
        let (_alpha_tx, mut alpha) = connect(&mut server, "alpha");
        let (bravo_tx, _bravo) = connect(&mut server, "bravo");
        frames(&mut alpha);

        disconnect(&mut server, "bravo", &bravo_tx);

        let received = frames(&mut alpha);
        assert_eq!(received.len(), 1);
        let Outbound::Text(text) = &received[0] else {
            panic!("Expected a text frame");
        };
        assert_eq!(
            decode::<ServerMessage>(text).unwrap(),
            ServerMessage::PlayerLeave {
                player_id: "bravo".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_ticker_follows_player_count() {
        let mut server = test_server(4).await;
        let mut tick_interval = interval(server.ticker().period());

        let (alpha, _rx) = connect(&mut server, "alpha");
        server.sync_ticker(&mut tick_interval);
        assert!(server.ticker().is_running());

        disconnect(&mut server, "alpha", &alpha);
        server.sync_ticker(&mut tick_interval);
        assert!(!server.ticker().is_running());

        let _bravo = connect(&mut server, "bravo");
        server.sync_ticker(&mut tick_interval);
        assert!(server.ticker().is_running());
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_overwritten_connection() {
        let mut server = test_server(4).await;
        let (old, _old_rx) = connect(&mut server, "alpha");
        let (_new, mut new_rx) = connect(&mut server, "alpha");
        frames(&mut new_rx);

        disconnect(&mut server, "alpha", &old);

        assert!(server.registry().contains("alpha"));
        assert!(frames(&mut new_rx).is_empty());
    }

    #[tokio::test]
    async fn test_idle_sweep_off_by_default() {
        let mut server = test_server(4).await;
        let (_tx, _rx) = connect(&mut server, "alpha");

        tokio::time::sleep(Duration::from_millis(20)).await;
        server.sweep_idle();

        assert!(server.registry().contains("alpha"));
    }

    #[tokio::test]
    async fn test_any_frame_keeps_connection_alive() {
        let mut server = test_server(4).await;
        server.config = server
            .config
            .clone()
            .with_idle_timeout(Duration::from_millis(200));
        let (_tx, mut rx) = connect(&mut server, "alpha");
        frames(&mut rx);

        tokio::time::sleep(Duration::from_millis(140)).await;
        server.handle_event(ServerEvent::Activity {
            connection_id: "alpha".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(140)).await;
        server.sweep_idle();
        assert!(server.registry().contains("alpha"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        server.sweep_idle();
        assert!(!server.registry().contains("alpha"));
        assert_eq!(
            frames(&mut rx),
            vec![Outbound::Close {
                reason: "Idle timeout".to_string()
            }]
        );
    }
}
