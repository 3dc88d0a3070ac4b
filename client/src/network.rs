use crate::reconnect::{BackoffConfig, ConnectionStatus, ReconnectController, RetryDecision};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{decode, encode, ClientMessage, ProtocolError, ServerMessage};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Everything the network task reports back to the render loop
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Status(ConnectionStatus),
    Message(ServerMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The server closed the connection or the stream ended
    Closed,
    /// The local side dropped its handle
    Shutdown,
}

/// Owns the connection to the server and reconnects on failure
pub struct NetworkClient {
    url: String,
    controller: ReconnectController,
    events: mpsc::UnboundedSender<ClientEvent>,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
}

impl NetworkClient {
    pub fn new(
        url: impl Into<String>,
        backoff: BackoffConfig,
        events: mpsc::UnboundedSender<ClientEvent>,
        outbound: mpsc::UnboundedReceiver<ClientMessage>,
    ) -> Self {
        Self {
            url: url.into(),
            controller: ReconnectController::new(backoff),
            events,
            outbound,
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    /// Connects, serves the connection and retries until giving up or shut down
    pub async fn run(mut self) {
        while self.controller.begin_attempt() {
            self.emit(ClientEvent::Status(ConnectionStatus::Connecting {
                attempt: self.controller.attempts() + 1,
            }));

            match self.session().await {
                Ok(SessionEnd::Shutdown) => {
                    info!("Network task shutting down");
                    return;
                }
                Ok(SessionEnd::Closed) => info!("Connection to {} closed", self.url),
                Err(e) => warn!("{}", e),
            }

            if self.events.is_closed() {
                return;
            }

            match self.controller.on_failure() {
                RetryDecision::Retry(delay) => {
                    self.emit(ClientEvent::Status(ConnectionStatus::Reconnecting {
                        attempt: self.controller.attempts(),
                        retry_in: delay,
                    }));
                    self.discard_pending();
                    sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    self.emit(ClientEvent::Status(ConnectionStatus::GaveUp {
                        attempts: self.controller.attempts(),
                    }));
                    return;
                }
            }
        }
    }

    /// Messages queued for a dead connection are not replayed on the next one
    fn discard_pending(&mut self) {
        let mut dropped = 0;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Discarded {} queued messages", dropped);
        }
    }

    async fn session(&mut self) -> Result<SessionEnd, NetworkError> {
        info!("Connecting to {}...", self.url);
        let (stream, _) =
            connect_async(self.url.as_str())
                .await
                .map_err(|source| NetworkError::Connect {
                    url: self.url.clone(),
                    source,
                })?;

        debug!("WebSocket open, waiting for an identity");

        let (mut write, mut read) = stream.split();
        // A socket the server closes before CONNECTED counts as a failed attempt
        let mut identified = false;

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => match decode::<ServerMessage>(&text) {
                        Ok(message) => {
                            if matches!(message, ServerMessage::Connected { .. }) {
                                identified = true;
                                self.controller.on_connected();
                                self.emit(ClientEvent::Status(ConnectionStatus::Connected));
                            }
                            self.emit(ClientEvent::Message(message));
                        }
                        Err(e) => warn!("Ignoring malformed frame: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            info!("Server closed connection: {}", frame.reason);
                        }
                        return Ok(SessionEnd::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::Closed),
                },
                outbound = self.outbound.recv() => match outbound {
                    Some(message) => {
                        if !identified {
                            debug!("Dropping outbound message before handshake");
                            continue;
                        }
                        write.send(Message::Text(encode(&message)?)).await?;
                    }
                    None => {
                        let _ = write.close().await;
                        return Ok(SessionEnd::Shutdown);
                    }
                },
            }
        }
    }
}

/// Render-loop side of the network task
///
/// Dropping the handle aborts the task, cancelling any pending retry.
pub struct NetworkHandle {
    events: mpsc::UnboundedReceiver<ClientEvent>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    task: JoinHandle<()>,
}

impl NetworkHandle {
    /// Starts the network task on the current tokio runtime
    pub fn spawn(url: impl Into<String>, backoff: BackoffConfig) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let client = NetworkClient::new(url, backoff, event_tx, outbound_rx);
        let task = tokio::spawn(client.run());

        Self {
            events,
            outbound,
            task,
        }
    }

    /// Queues a message for the server; false once the task has stopped
    pub fn send(&self, message: ClientMessage) -> bool {
        self.outbound.send(message).is_ok()
    }

    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.events.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for NetworkHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
