//! Connection bookkeeping for the server.
//!
//! The [`ConnectionManager`] keeps the bidirectional mapping between a live
//! transport connection and the player identity currently using it. Player
//! records are versioned: assigning a name or a session produces an updated
//! record re-inserted under the same connection, so lookups never see a
//! stale identity. The two maps are mutual inverses restricted to
//! currently-connected players.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use log::info;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Transport-level identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Server-side player identity.
///
/// `id` is an opaque server-generated token, stable across record versions;
/// it is never exposed to other clients except through name strings in
/// roster updates.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub session_id: Option<String>,
    pub connected: bool,
    pub last_seen: Instant,
}

impl Player {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: String::new(),
            session_id: None,
            connected: true,
            last_seen: Instant::now(),
        }
    }

    /// Refreshes the activity timestamp.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

/// Write half of a connection: one queued line per outbound message.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub addr: SocketAddr,
    pub tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
pub struct ConnectionManager {
    connections: HashMap<ConnectionId, (ConnectionHandle, Player)>,
    by_player: HashMap<String, ConnectionId>,
    next_id: u64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh connection id.
    pub fn next_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    /// Records the association in both directions, overwriting any prior
    /// entry for the same connection.
    pub fn insert(&mut self, conn: ConnectionId, handle: ConnectionHandle, player: Player) {
        info!("connection {} registered for player {} ({})", conn, player.id, handle.addr);
        if let Some((_, old)) = self.connections.get(&conn) {
            self.by_player.remove(&old.id);
        }
        self.by_player.insert(player.id.clone(), conn);
        self.connections.insert(conn, (handle, player));
    }

    /// Deletes both directions and returns the prior player. Unknown
    /// connections fail silently.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<Player> {
        let (_, player) = self.connections.remove(&conn)?;
        self.by_player.remove(&player.id);
        info!("connection {} removed (player {})", conn, player.id);
        Some(player)
    }

    pub fn player(&self, conn: ConnectionId) -> Option<&Player> {
        self.connections.get(&conn).map(|(_, p)| p)
    }

    pub fn player_mut(&mut self, conn: ConnectionId) -> Option<&mut Player> {
        self.connections.get_mut(&conn).map(|(_, p)| p)
    }

    pub fn connection_of(&self, player_id: &str) -> Option<ConnectionId> {
        self.by_player.get(player_id).copied()
    }

    pub fn player_by_id(&self, player_id: &str) -> Option<&Player> {
        self.connection_of(player_id).and_then(|conn| self.player(conn))
    }

    pub fn player_by_id_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        let conn = self.connection_of(player_id)?;
        self.player_mut(conn)
    }

    pub fn sender_of(&self, player_id: &str) -> Option<&mpsc::UnboundedSender<String>> {
        let conn = self.connection_of(player_id)?;
        self.connections.get(&conn).map(|(h, _)| &h.tx)
    }

    /// True when the player is present and its connection is live.
    pub fn is_connected(&self, player_id: &str) -> bool {
        self.player_by_id(player_id).map(|p| p.connected).unwrap_or(false)
    }

    pub fn name_of(&self, player_id: &str) -> Option<&str> {
        self.player_by_id(player_id).map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
