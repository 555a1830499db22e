//! # Turn-Based Session Server Library
//!
//! This library provides the authoritative server for the parlor framework:
//! it accepts persistent client connections, groups players into named or
//! matchmade sessions, runs a turn-based game to completion, and keeps every
//! client's view of shared state consistent across disconnects and
//! reconnects.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! Each session owns the definitive game state, mutated only by applying
//! validated commands. Clients receive per-player projections and conform
//! to them; nothing a client sends is trusted before validation.
//!
//! ### Session Lifecycle
//! Sessions move Lobby -> InGame -> EndGame and never regress. The registry
//! owns creation, joining, FIFO matchmaking, disconnect handling, and
//! terminal teardown.
//!
//! ### Consistency Under Concurrency
//! All registry and session mutations happen on one main event loop: each
//! inbound command is processed to completion (validate -> apply ->
//! broadcast) before the next, so per-session ordering and registry
//! atomicity fall out of the architecture rather than out of locks.
//!
//! ## Module Organization
//!
//! - [`connection`]: bidirectional connection/player mapping and player
//!   identity records.
//! - [`registry`]: the session map, matchmaking queue, and session state
//!   machine.
//! - [`router`]: per-command validation and dispatch.
//! - [`broadcast`]: per-player projections and delivery, with send failures
//!   converted into disconnect events.
//! - [`network`]: the TCP accept loop, per-connection tasks, and the main
//!   event loop tying everything together.
//! - [`errors`]: the resource/validation error taxonomy surfaced to clients.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::GameServer;
//! use shared::TicTacToe;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = GameServer::bind("127.0.0.1:8765", TicTacToe::factory()).await?;
//!     server.run().await
//! }
//! ```

pub mod broadcast;
pub mod connection;
pub mod errors;
pub mod network;
pub mod registry;
pub mod router;
