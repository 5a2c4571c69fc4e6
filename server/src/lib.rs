//! # Block Grid Server Library
//!
//! This library implements a server for the classic voxel-grid building
//! protocol. Players connect over TCP, download a compressed map, and then
//! exchange block edits, movement and chat with everyone on the same map while
//! the server grows and withers plants in the background.
//!
//! ## Core Responsibilities
//!
//! ### Session Protocol
//! Every connection is driven by its own worker task. The worker checks the
//! handshake, the player's name and the whitelist, registers the player,
//! streams the map, and then runs the steady-state loop: outbound control
//! packets first, then throttled block updates, then whatever the client sent.
//!
//! ### Authoritative Map
//! The [`map::Map`] is the single source of truth. Client edits are validated
//! by the policy in [`blocks`] before they touch it, and every change is
//! reported to listeners, which fan updates out to other players and keep the
//! physics shadow table current.
//!
//! ### Plant Physics
//! A tick task walks a slice of the map every tick. Saplings grow into trees
//! or die in the dark, flowers and mushrooms react to light, and grass spreads
//! to lit dirt or dies when covered.
//!
//! ## Architecture Design
//!
//! ### Task Per Session
//! Each session owns its socket writer. Other tasks never write to a socket;
//! they push packets into the session's control or block queue. A separate
//! reader task decodes inbound frames into a channel the worker polls.
//!
//! ### Lock Discipline
//! Shared state sits behind `parking_lot` locks that are never held across an
//! await point. Map listeners run under the map's edit lock and must not edit
//! the map themselves.
//!
//! ## Module Organization
//!
//! ### Session Modules (`session`, `codec`, `chat`, `blocks`, `movement`, `spam`)
//! Per-connection protocol handling:
//! - Login and link state machines, queues and kicks
//! - Framed reads and writes with I/O timeouts
//! - Chat validation, partial messages and line wrapping
//! - Block edit validation and placement modes
//! - Movement tracking and anti-spam limits
//!
//! ### World Modules (`map`, `generator`, `physics`, `trees`)
//! The shared grid and everything that changes it on its own.
//!
//! ### Server Modules (`network`, `client_manager`, `commands`, `names`, `config`)
//! Accept loop, player registry, chat commands, name verification and
//! configuration.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::generator;
//! use server::network::Server;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let map = generator::flat(128, 128, 64)?;
//!     let server = Server::new(config, map);
//!
//!     // Accept players until shutdown; physics ticks in the background
//!     let listener = TcpListener::bind("0.0.0.0:25565").await?;
//!     server.run(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod blocks;
pub mod chat;
pub mod client_manager;
pub mod codec;
pub mod commands;
pub mod config;
pub mod generator;
pub mod map;
pub mod movement;
pub mod names;
pub mod network;
pub mod physics;
pub mod session;
pub mod spam;
pub mod trees;
