//! # Position Sync Server
//!
//! Authoritative server for the position-sync protocol. It owns every
//! player's record, accepts movement from clients over WebSocket connections
//! and keeps all clients in step through immediate join/leave notifications
//! and fixed-rate world snapshots.
//!
//! ## Architecture
//!
//! ### Single Event Loop
//! All state changes happen on one task. Per-connection tasks decode inbound
//! frames and forward them as events; the loop in [`network::Server::run`]
//! applies each event to completion before looking at the next one or at the
//! tick timer. Registry mutations are therefore atomic with respect to each
//! other and to broadcasts, without locks.
//!
//! ### Snapshot Ticks
//! While at least one player is connected, the tick loop serializes every
//! player into a timestamped snapshot and sends it to everyone. Clients
//! buffer these and render remote players slightly in the past, interpolating
//! between the two snapshots that bracket their render time. With nobody
//! connected the loop idles.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! - Connection id to player and outbound channel
//! - Spawn, move, rename and removal
//! - Join/leave notifications and per-destination broadcast isolation
//!
//! ### Tick Module (`tick`)
//! - Run/idle decisions driven by player count
//! - Snapshot construction and broadcast, monotonic tick counter
//!
//! ### Network Module (`network`)
//! - WebSocket accept loop and per-connection reader/writer tasks
//! - Capacity limits and idle-connection sweeping
//!
//! ### Config Module (`config`)
//! - Bind address, tick rate, capacity and idle timeout
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default().with_bind_addr("127.0.0.1:3001");
//!     let server = Server::bind(config).await?;
//!
//!     // Accepts connections and broadcasts snapshots until the task is dropped
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod network;
pub mod registry;
pub mod tick;
