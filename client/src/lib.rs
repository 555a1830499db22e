//! # Game Client Library
//!
//! This library provides the client side of the parlor framework: a thin,
//! game-agnostic handle for talking to the session server over a persistent
//! TCP connection.
//!
//! ## Architecture Overview
//!
//! The client is a handle/task pair. [`session::SessionClient`] is the
//! handle applications hold: it queues outbound commands and pops decoded
//! inbound updates without ever blocking on the network. A background
//! transport task owns the socket, frames newline-delimited JSON in both
//! directions, and keeps the connection alive.
//!
//! ### Automatic Resume
//! The handle remembers the coordinates of the session it created, joined,
//! or was matched into. If the connection drops unexpectedly, the transport
//! reconnects with exponential backoff and re-issues a `join_game` for the
//! remembered session before any queued command, so the server responds
//! with a fresh full-state projection and play continues where it left off.
//! A deliberate `disconnect` clears the remembered state, making the drop
//! final.
//!
//! ### Trusting the Server
//! The client performs no game logic of its own. Every update carries the
//! authoritative view for this player; the application renders or reacts to
//! it as-is.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::session::SessionClient;
//! use serde_json::json;
//! use shared::{Command, CommandType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = SessionClient::connect("127.0.0.1:8765").await?;
//!     client.send(&Command::with_fields(
//!         CommandType::FindGame,
//!         [("player_name", json!("alice"))],
//!     ))?;
//!
//!     loop {
//!         while let Some(update) = client.receive() {
//!             println!("{:?}: {:?}", update.update_type, update.data);
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//!     }
//! }
//! ```

pub mod session;
