//! Update delivery and per-player projection.
//!
//! The broadcaster is the only component that writes to client connections.
//! For `game_state_update` and `game_started` it computes each recipient's
//! projection from the session's game state (or the lobby roster while no
//! game state exists); `game_over` and `error` payloads carry no per-seat
//! data and pass through unchanged. A closed connection is reported back to
//! the caller as a dead player id and never aborts delivery to the rest.

use log::error;
use serde_json::json;
use shared::{Update, UpdateType};

use crate::connection::ConnectionManager;
use crate::registry::Session;

#[derive(Default)]
pub struct Broadcaster;

impl Broadcaster {
    pub fn new() -> Self {
        Self
    }

    /// Delivers `update` to one recipient, or to every session member in
    /// player-list order. Returns the ids whose connection was gone; the
    /// caller feeds those into the disconnect path.
    pub fn send(
        &self,
        connections: &ConnectionManager,
        session: &Session,
        update: &Update,
        recipient: Option<&str>,
    ) -> Vec<String> {
        let mut dead = Vec::new();
        match recipient {
            Some(player_id) => {
                if !self.deliver(connections, session, update, player_id) {
                    dead.push(player_id.to_string());
                }
            }
            None => {
                for player_id in &session.players {
                    if !self.deliver(connections, session, update, player_id) {
                        dead.push(player_id.clone());
                    }
                }
            }
        }
        dead
    }

    /// Writes an update to one player outside any session context (errors,
    /// `game_created` acknowledgements). Returns false when the connection
    /// is gone.
    pub fn send_to_player(
        &self,
        connections: &ConnectionManager,
        player_id: &str,
        update: &Update,
    ) -> bool {
        let line = match update.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!("failed to serialize update for player {}: {}", player_id, e);
                return true;
            }
        };
        match connections.sender_of(player_id) {
            Some(tx) => tx.send(line).is_ok(),
            None => false,
        }
    }

    fn deliver(
        &self,
        connections: &ConnectionManager,
        session: &Session,
        update: &Update,
        player_id: &str,
    ) -> bool {
        let payload = self.payload_for(connections, session, update, player_id);
        self.send_to_player(connections, player_id, &payload)
    }

    fn payload_for(
        &self,
        connections: &ConnectionManager,
        session: &Session,
        update: &Update,
        player_id: &str,
    ) -> Update {
        match update.update_type {
            UpdateType::GameStateUpdate | UpdateType::GameStarted => {
                let mut data = match (&session.game_state, session.seat_of(player_id)) {
                    (Some(state), Some(seat)) => state.perspective(seat),
                    _ => {
                        let mut roster = serde_json::Map::new();
                        roster.insert("phase".to_string(), json!(session.phase));
                        roster
                    }
                };
                data.insert("game_name".to_string(), json!(session.name));
                data.insert("players".to_string(), json!(session.player_names(connections)));
                Update::new(update.update_type, data)
            }
            _ => update.clone(),
        }
    }
}
