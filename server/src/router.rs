//! Inbound command validation and dispatch.
//!
//! The router resolves the sender's identity, gates commands on session
//! phase, delegates move legality to the session's game state, and hands
//! accepted updates to the broadcaster. Rejections go back to the offending
//! client only, as `error` updates, with no state mutation.

use log::{debug, info, warn};
use serde_json::json;
use shared::{Command, CommandType, GamePhase, Update, UpdateType};

use crate::broadcast::Broadcaster;
use crate::connection::{ConnectionId, ConnectionManager};
use crate::errors::CommandError;
use crate::registry::{SessionRegistry, DEFAULT_MAX_PLAYERS};

#[derive(Default)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    /// Processes one inbound command to completion. Returns the player ids
    /// whose connection turned out to be dead during delivery.
    pub fn handle(
        &self,
        connections: &mut ConnectionManager,
        registry: &mut SessionRegistry,
        broadcaster: &Broadcaster,
        conn: ConnectionId,
        command: Command,
    ) -> Vec<String> {
        let player_id = {
            let player = match connections.player_mut(conn) {
                Some(player) => player,
                None => {
                    warn!("command from unknown connection {}", conn);
                    return Vec::new();
                }
            };
            player.touch();
            // Lobby commands carry the caller's display name.
            if matches!(
                command.command_type,
                CommandType::CreateGame | CommandType::JoinGame | CommandType::FindGame
            ) {
                if let Some(name) = command.str_field("player_name") {
                    player.name = name.to_string();
                }
            }
            player.id.clone()
        };
        debug!("routing {:?} from player {}", command.command_type, player_id);

        match command.command_type {
            CommandType::CreateGame => {
                let name = match command.str_field("game_name") {
                    Some(name) => name.to_string(),
                    None => {
                        let err = CommandError::Invalid("missing game_name".to_string());
                        return self.report(connections, broadcaster, &player_id, &err);
                    }
                };
                let password = command.str_field("password").map(str::to_string);
                let max_players = command.usize_field("max_players").unwrap_or(DEFAULT_MAX_PLAYERS);
                match registry.create(connections, broadcaster, &player_id, &name, password, max_players) {
                    Ok(dead) => dead,
                    Err(e) => self.report(connections, broadcaster, &player_id, &e.into()),
                }
            }

            CommandType::JoinGame => {
                let name = match command.str_field("game_name") {
                    Some(name) => name.to_string(),
                    None => {
                        let err = CommandError::Invalid("missing game_name".to_string());
                        return self.report(connections, broadcaster, &player_id, &err);
                    }
                };
                let password = command.str_field("password").map(str::to_string);
                match registry.join(connections, broadcaster, &player_id, &name, password.as_deref()) {
                    Ok(dead) => dead,
                    Err(e) => self.report(connections, broadcaster, &player_id, &e.into()),
                }
            }

            CommandType::FindGame => registry.enqueue_matchmaking(connections, broadcaster, &player_id),

            CommandType::Disconnect => {
                if let Some(player) = connections.player_mut(conn) {
                    player.connected = false;
                }
                registry.disconnect(connections, broadcaster, &player_id)
            }

            CommandType::Surrender | CommandType::MakeMove => {
                self.route_game_command(connections, registry, broadcaster, &player_id, command)
            }
        }
    }

    /// Routing for commands against an existing session: resolve the
    /// session, gate on phase (surrender is exempt), validate, apply,
    /// broadcast, and tear down on game over.
    fn route_game_command(
        &self,
        connections: &mut ConnectionManager,
        registry: &mut SessionRegistry,
        broadcaster: &Broadcaster,
        player_id: &str,
        command: Command,
    ) -> Vec<String> {
        let session_name = match connections.player_by_id(player_id).and_then(|p| p.session_id.clone()) {
            Some(name) => name,
            None => return self.report(connections, broadcaster, player_id, &CommandError::SessionNotFound),
        };

        if command.command_type == CommandType::Surrender {
            return self.handle_surrender(connections, registry, broadcaster, player_id, &session_name);
        }

        let session = match registry.session_mut(&session_name) {
            Some(session) => session,
            None => return self.report(connections, broadcaster, player_id, &CommandError::SessionNotFound),
        };
        if session.phase != GamePhase::InGame {
            return self.report(connections, broadcaster, player_id, &CommandError::NotInProgress);
        }
        let seat = match session.seat_of(player_id) {
            Some(seat) => seat,
            None => return self.report(connections, broadcaster, player_id, &CommandError::SessionNotFound),
        };
        let state = match session.game_state.as_mut() {
            Some(state) => state,
            None => return self.report(connections, broadcaster, player_id, &CommandError::NotInProgress),
        };

        if let Err(reason) = state.validate(&command, seat) {
            return self.report(connections, broadcaster, player_id, &CommandError::Invalid(reason));
        }

        let update = Update::new(UpdateType::GameStateUpdate, command.data);
        state.apply(&update);
        let game_over = state.game_over();
        let winner = state.winner();

        let mut dead = broadcaster.send(connections, session, &update, None);

        if game_over {
            session.phase = GamePhase::EndGame;
            let reason = if winner.is_some() { "win" } else { "draw" };
            info!("session {} over ({}, winner: {:?})", session_name, reason, winner);
            let over = Update::with_fields(
                UpdateType::GameOver,
                [("winner", json!(winner)), ("reason", json!(reason))],
            );
            dead.extend(broadcaster.send(connections, session, &over, None));
            registry.end(connections, &session_name);
        }
        dead
    }

    /// Surrender is a lifecycle command: legal in any phase, ends the
    /// session with any remaining opponent as the winner.
    fn handle_surrender(
        &self,
        connections: &mut ConnectionManager,
        registry: &mut SessionRegistry,
        broadcaster: &Broadcaster,
        player_id: &str,
        session_name: &str,
    ) -> Vec<String> {
        let session = match registry.session_mut(session_name) {
            Some(session) => session,
            None => return self.report(connections, broadcaster, player_id, &CommandError::SessionNotFound),
        };

        session.phase = GamePhase::EndGame;
        let winner = session
            .players
            .iter()
            .find(|id| id.as_str() != player_id)
            .and_then(|id| connections.name_of(id))
            .map(str::to_string);
        info!("player {} surrendered in session {}", player_id, session_name);

        let over = Update::with_fields(
            UpdateType::GameOver,
            [("winner", json!(winner)), ("reason", json!("surrender"))],
        );
        let dead = broadcaster.send(connections, session, &over, None);
        registry.end(connections, session_name);
        dead
    }

    fn report(
        &self,
        connections: &ConnectionManager,
        broadcaster: &Broadcaster,
        player_id: &str,
        error: &CommandError,
    ) -> Vec<String> {
        warn!("rejecting command from player {}: {}", player_id, error);
        if broadcaster.send_to_player(connections, player_id, &Update::error(error.to_string())) {
            Vec::new()
        } else {
            vec![player_id.to_string()]
        }
    }
}
