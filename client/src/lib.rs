//! # Position Sync Client Library
//!
//! Client side of the position-sync layer: it connects to the server over a
//! WebSocket, predicts the local player's movement immediately, and renders
//! every other player from interpolated server snapshots.
//!
//! ## Architecture Overview
//!
//! ### Local Prediction
//! The local player moves as soon as a key is pressed. Its position is
//! reported to the server every 50ms; the server never corrects it.
//!
//! ### Snapshot Interpolation
//! Remote players are drawn a fixed delay in the past, blended between the
//! two buffered snapshots that bracket the render time. Late or reordered
//! snapshots slot into place by time, and nothing is ever extrapolated.
//!
//! ### Connection Lifecycle
//! A dedicated network task owns the socket. Lost connections are retried
//! with exponential backoff until a bounded number of attempts is used up,
//! after which the client stays open and shows a terminal status.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The [`game::GameScene`] and the [`game::RenderSurface`] trait it drives:
//! - Local player prediction and position reports
//! - Immediate join/leave handling
//! - Per-frame reconciliation of remote entities
//!
//! ### Interpolation Module (`interpolation`)
//! Snapshot buffering, interpolation and the server clock estimate.
//!
//! ### Reconnect Module (`reconnect`)
//! Backoff policy and the connection state machine.
//!
//! ### Network Module (`network`)
//! The WebSocket task and the handle the render loop talks to.
//!
//! ### Input and Rendering Modules (`input`, `rendering`)
//! Keyboard sampling and the macroquad implementation of the render surface.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::game::{GameScene, MoveIntent};
//! use client::network::{ClientEvent, NetworkHandle};
//! use client::rendering::MacroquadSurface;
//! use client::ClientConfig;
//!
//! # async fn frame_loop() {
//! let config = ClientConfig::default();
//! let mut network = NetworkHandle::spawn(&config.server_url, config.backoff);
//! let mut scene = GameScene::new(config.render_delay, config.name.clone());
//! let mut surface = MacroquadSurface::new();
//!
//! // Once per frame
//! let now_ms = 0;
//! while let Some(event) = network.try_recv() {
//!     match event {
//!         ClientEvent::Status(status) => scene.handle_status(status, &mut surface),
//!         ClientEvent::Message(message) => scene.handle_message(message, now_ms, &mut surface),
//!     }
//! }
//! scene.update(1.0 / 60.0, MoveIntent::default(), now_ms, &mut surface);
//! if let Some(message) = scene.position_update(now_ms) {
//!     network.send(message);
//! }
//! # }
//! ```

pub mod config;
pub mod game;
pub mod input;
pub mod interpolation;
pub mod network;
pub mod reconnect;
pub mod rendering;

pub use config::ClientConfig;
