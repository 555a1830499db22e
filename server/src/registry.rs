//! Session registry and matchmaking.
//!
//! The registry is the single writer of the session map and the matchmaking
//! queue. All of its operations run on the server's main event loop, which
//! is the global ordering point: two simultaneous creates with the same
//! name, or two simultaneous matchmaking requests, are serialized there.

use std::collections::{HashMap, VecDeque};

use log::info;
use serde_json::{json, Map};
use shared::{GameFactory, GamePhase, GameState, Update, UpdateType};

use crate::broadcast::Broadcaster;
use crate::connection::ConnectionManager;
use crate::errors::RegistryError;

pub const DEFAULT_MAX_PLAYERS: usize = 2;

/// One instance of a game between a fixed set of players, keyed by name.
///
/// `players` is join-ordered and the order is meaningful: index 0/1 map to
/// game roles. The game state exists exactly while the phase is not Lobby,
/// and the phase only ever advances.
pub struct Session {
    pub name: String,
    pub password: Option<String>,
    pub max_players: usize,
    pub phase: GamePhase,
    pub players: Vec<String>,
    pub game_state: Option<Box<dyn GameState>>,
    pub is_matchmade: bool,
}

impl Session {
    fn new(name: String, password: Option<String>, max_players: usize, is_matchmade: bool) -> Self {
        Self {
            name,
            password,
            max_players: max_players.max(DEFAULT_MAX_PLAYERS),
            phase: GamePhase::Lobby,
            players: Vec::new(),
            game_state: None,
            is_matchmade,
        }
    }

    pub fn is_full(&self) -> bool {
        self.players.len() == self.max_players
    }

    /// Seat index of a member (join order), if present.
    pub fn seat_of(&self, player_id: &str) -> Option<usize> {
        self.players.iter().position(|id| id == player_id)
    }

    pub fn player_names(&self, connections: &ConnectionManager) -> Vec<String> {
        self.players
            .iter()
            .map(|id| connections.name_of(id).unwrap_or("").to_string())
            .collect()
    }
}

pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    matchmaking: VecDeque<String>,
    matches_created: u64,
    factory: GameFactory,
}

impl SessionRegistry {
    pub fn new(factory: GameFactory) -> Self {
        Self {
            sessions: HashMap::new(),
            matchmaking: VecDeque::new(),
            matches_created: 0,
            factory,
        }
    }

    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    pub fn session_mut(&mut self, name: &str) -> Option<&mut Session> {
        self.sessions.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.matchmaking.len()
    }

    /// Creates a named Lobby session containing only the requester and
    /// acknowledges it with a `game_created` update.
    pub fn create(
        &mut self,
        connections: &mut ConnectionManager,
        broadcaster: &Broadcaster,
        requester: &str,
        name: &str,
        password: Option<String>,
        max_players: usize,
    ) -> Result<Vec<String>, RegistryError> {
        if self.sessions.contains_key(name) {
            return Err(RegistryError::NameTaken);
        }

        let mut session = Session::new(name.to_string(), password, max_players, false);
        session.players.push(requester.to_string());
        if let Some(player) = connections.player_by_id_mut(requester) {
            player.session_id = Some(name.to_string());
        }
        info!("session {} created by player {}", name, requester);

        let ack = Update::with_fields(
            UpdateType::GameCreated,
            [
                ("game_name", json!(name)),
                ("players", json!(session.player_names(connections))),
            ],
        );
        self.sessions.insert(name.to_string(), session);

        let mut dead = Vec::new();
        if !broadcaster.send_to_player(connections, requester, &ack) {
            dead.push(requester.to_string());
        }
        Ok(dead)
    }

    /// Appends the requester to an existing session. Filling the last seat
    /// instantiates the game state exactly once and advances the phase to
    /// InGame; everyone then receives a `game_started` carrying their own
    /// projection. Rejoining an in-progress session that has a free seat
    /// re-sends the fresh projections instead, and a join from a player who
    /// already holds a seat is answered with their projection alone.
    pub fn join(
        &mut self,
        connections: &mut ConnectionManager,
        broadcaster: &Broadcaster,
        requester: &str,
        name: &str,
        password: Option<&str>,
    ) -> Result<Vec<String>, RegistryError> {
        let session = self.sessions.get_mut(name).ok_or(RegistryError::NotFound)?;

        if let Some(expected) = &session.password {
            if password != Some(expected.as_str()) {
                return Err(RegistryError::BadPassword);
            }
        }
        if session.seat_of(requester).is_some() {
            // Already seated: a resume. Re-send the projection instead of
            // granting a second seat.
            info!("player {} resumed session {}", requester, name);
            let update = if session.game_state.is_some() {
                Update::new(UpdateType::GameStarted, Map::new())
            } else {
                Update::new(UpdateType::GameStateUpdate, Map::new())
            };
            return Ok(broadcaster.send(connections, session, &update, Some(requester)));
        }
        if session.is_full() {
            return Err(RegistryError::Full);
        }

        session.players.push(requester.to_string());
        if let Some(player) = connections.player_by_id_mut(requester) {
            player.session_id = Some(name.to_string());
        }
        info!("player {} joined session {}", requester, name);

        if session.is_full() {
            if session.game_state.is_none() {
                let names = session.player_names(connections);
                session.game_state = Some((self.factory)(&names));
                session.phase = GamePhase::InGame;
                info!("session {} starting with {} players", name, session.players.len());
            }
            let started = Update::new(UpdateType::GameStarted, Map::new());
            Ok(broadcaster.send(connections, session, &started, None))
        } else {
            let roster = Update::new(UpdateType::GameStateUpdate, Map::new());
            Ok(broadcaster.send(connections, session, &roster, None))
        }
    }

    /// FIFO matchmaking. The two oldest connected, unseated entries are
    /// paired atomically into a fresh `is_matchmade` two-player session
    /// that starts immediately. Entries whose connection has gone away are
    /// discarded at pairing time rather than paired into a dead session.
    pub fn enqueue_matchmaking(
        &mut self,
        connections: &mut ConnectionManager,
        broadcaster: &Broadcaster,
        requester: &str,
    ) -> Vec<String> {
        if !self.matchmaking.iter().any(|id| id == requester) {
            self.matchmaking.push_back(requester.to_string());
            info!("player {} entered matchmaking (queue depth {})", requester, self.matchmaking.len());
        }
        self.pair_queued(connections, broadcaster)
    }

    fn pair_queued(
        &mut self,
        connections: &mut ConnectionManager,
        broadcaster: &Broadcaster,
    ) -> Vec<String> {
        let mut dead = Vec::new();
        loop {
            self.matchmaking.retain(|id| {
                connections
                    .player_by_id(id)
                    .map(|p| p.connected && p.session_id.is_none())
                    .unwrap_or(false)
            });
            let (first, second) = match (self.matchmaking.pop_front(), self.matchmaking.pop_front()) {
                (Some(a), Some(b)) => (a, b),
                (Some(a), None) => {
                    self.matchmaking.push_front(a);
                    break;
                }
                _ => break,
            };

            self.matches_created += 1;
            let name = format!("match_{}", self.matches_created);
            let mut session = Session::new(name.clone(), None, DEFAULT_MAX_PLAYERS, true);
            session.players = vec![first.clone(), second.clone()];
            for id in [&first, &second] {
                if let Some(player) = connections.player_by_id_mut(id) {
                    player.session_id = Some(name.clone());
                }
            }
            let names = session.player_names(connections);
            session.game_state = Some((self.factory)(&names));
            session.phase = GamePhase::InGame;
            info!("matchmade session {} pairing {} and {}", name, first, second);
            self.sessions.insert(name.clone(), session);

            if let Some(session) = self.sessions.get(&name) {
                let started = Update::new(UpdateType::GameStarted, Map::new());
                dead.extend(broadcaster.send(connections, session, &started, None));
            }
        }
        dead
    }

    /// Disconnect handling: drops the player from matchmaking and from its
    /// session. A session left with fewer than two members is torn down
    /// (survivors are told the game is over first); otherwise the remainder
    /// gets the updated roster.
    pub fn disconnect(
        &mut self,
        connections: &mut ConnectionManager,
        broadcaster: &Broadcaster,
        player_id: &str,
    ) -> Vec<String> {
        self.matchmaking.retain(|id| id != player_id);

        let session_name = connections
            .player_by_id(player_id)
            .and_then(|p| p.session_id.clone())
            .or_else(|| {
                self.sessions
                    .iter()
                    .find(|(_, s)| s.players.iter().any(|id| id == player_id))
                    .map(|(name, _)| name.clone())
            });
        let name = match session_name {
            Some(name) => name,
            None => return Vec::new(),
        };

        if let Some(session) = self.sessions.get_mut(&name) {
            // Seats compact on departure: players after the leaver shift
            // down one index, and game roles follow seat order. With two
            // players this is moot; larger games inherit the reassignment.
            session.players.retain(|id| id != player_id);
        }
        if let Some(player) = connections.player_by_id_mut(player_id) {
            player.session_id = None;
        }
        info!("player {} left session {}", player_id, name);

        let mut dead = Vec::new();
        let teardown = self
            .sessions
            .get(&name)
            .map(|s| s.players.len() < 2)
            .unwrap_or(false);
        if teardown {
            if let Some(session) = self.sessions.get(&name) {
                if !session.players.is_empty() {
                    let winner = session
                        .players
                        .first()
                        .and_then(|id| connections.name_of(id))
                        .map(str::to_string);
                    let over = Update::with_fields(
                        UpdateType::GameOver,
                        [("winner", json!(winner)), ("reason", json!("opponent_disconnected"))],
                    );
                    dead.extend(broadcaster.send(connections, session, &over, None));
                }
            }
            self.end(connections, &name);
        } else if let Some(session) = self.sessions.get(&name) {
            let roster = Update::new(UpdateType::GameStateUpdate, Map::new());
            dead.extend(broadcaster.send(connections, session, &roster, None));
        }
        dead
    }

    /// Terminal teardown: clears every member's session key and removes the
    /// session from the registry. A session is never reused after this.
    pub fn end(&mut self, connections: &mut ConnectionManager, name: &str) {
        if let Some(session) = self.sessions.remove(name) {
            for id in &session.players {
                if let Some(player) = connections.player_by_id_mut(id) {
                    player.session_id = None;
                }
            }
            info!("session {} ended", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionHandle, ConnectionId, Player};
    use shared::TicTacToe;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::sync::mpsc;

    struct Fixture {
        connections: ConnectionManager,
        registry: SessionRegistry,
        broadcaster: Broadcaster,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                connections: ConnectionManager::new(),
                registry: SessionRegistry::new(TicTacToe::factory()),
                broadcaster: Broadcaster::new(),
            }
        }

        fn register(&mut self, name: &str) -> (String, mpsc::UnboundedReceiver<String>) {
            let conn = self.connections.next_id();
            let (tx, rx) = mpsc::unbounded_channel();
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0);
            let mut player = Player::new();
            player.name = name.to_string();
            let player_id = player.id.clone();
            self.connections.insert(conn, ConnectionHandle { addr, tx }, player);
            (player_id, rx)
        }

        fn create(&mut self, requester: &str, name: &str) -> Result<Vec<String>, RegistryError> {
            self.registry.create(
                &mut self.connections,
                &self.broadcaster,
                requester,
                name,
                None,
                DEFAULT_MAX_PLAYERS,
            )
        }

        fn join(&mut self, requester: &str, name: &str) -> Result<Vec<String>, RegistryError> {
            self.registry
                .join(&mut self.connections, &self.broadcaster, requester, name, None)
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Update> {
        let mut updates = Vec::new();
        while let Ok(line) = rx.try_recv() {
            updates.push(Update::from_line(&line).expect("valid update line"));
        }
        updates
    }

    #[test]
    fn duplicate_name_is_rejected_and_original_untouched() {
        let mut fx = Fixture::new();
        let (alice, mut alice_rx) = fx.register("alice");
        let (mallory, _mallory_rx) = fx.register("mallory");

        fx.create(&alice, "S").unwrap();
        let err = fx.create(&mallory, "S").unwrap_err();

        assert_eq!(err, RegistryError::NameTaken);
        let session = fx.registry.session("S").unwrap();
        assert_eq!(session.players, vec![alice.clone()]);
        assert_eq!(session.phase, GamePhase::Lobby);

        let updates = drain(&mut alice_rx);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_type, UpdateType::GameCreated);
        assert_eq!(updates[0].str_field("game_name"), Some("S"));
    }

    #[test]
    fn filling_the_session_starts_the_game_exactly_once() {
        let mut fx = Fixture::new();
        let (alice, mut alice_rx) = fx.register("alice");
        let (bob, mut bob_rx) = fx.register("bob");

        fx.create(&alice, "S").unwrap();
        assert!(fx.registry.session("S").unwrap().game_state.is_none());

        fx.join(&bob, "S").unwrap();

        let session = fx.registry.session("S").unwrap();
        assert_eq!(session.phase, GamePhase::InGame);
        assert!(session.game_state.is_some());
        assert_eq!(session.players.len(), session.max_players);

        // Both players got a game_started carrying their own projection.
        let alice_updates = drain(&mut alice_rx);
        let started = alice_updates
            .iter()
            .find(|u| u.update_type == UpdateType::GameStarted)
            .expect("alice got game_started");
        assert_eq!(started.str_field("your_symbol"), Some("X"));
        assert_eq!(started.data["players"], serde_json::json!(["alice", "bob"]));

        let bob_updates = drain(&mut bob_rx);
        let started = bob_updates
            .iter()
            .find(|u| u.update_type == UpdateType::GameStarted)
            .expect("bob got game_started");
        assert_eq!(started.str_field("your_symbol"), Some("O"));

        // A third join attempt bounces off the capacity limit.
        let (carol, _carol_rx) = fx.register("carol");
        assert_eq!(fx.join(&carol, "S").unwrap_err(), RegistryError::Full);
        assert_eq!(fx.registry.session("S").unwrap().players.len(), 2);
    }

    #[test]
    fn join_checks_password() {
        let mut fx = Fixture::new();
        let (alice, _rx) = fx.register("alice");
        let (bob, _bob_rx) = fx.register("bob");

        fx.registry
            .create(&mut fx.connections, &fx.broadcaster, &alice, "S", Some("hunter2".into()), 2)
            .unwrap();

        let err = fx
            .registry
            .join(&mut fx.connections, &fx.broadcaster, &bob, "S", Some("wrong"))
            .unwrap_err();
        assert_eq!(err, RegistryError::BadPassword);

        fx.registry
            .join(&mut fx.connections, &fx.broadcaster, &bob, "S", Some("hunter2"))
            .unwrap();
        assert_eq!(fx.registry.session("S").unwrap().players.len(), 2);
    }

    #[test]
    fn joining_twice_keeps_a_single_seat() {
        let mut fx = Fixture::new();
        let (alice, _alice_rx) = fx.register("alice");
        let (bob, mut bob_rx) = fx.register("bob");
        fx.create(&alice, "S").unwrap();
        fx.join(&bob, "S").unwrap();
        drain(&mut bob_rx);

        // A repeated join from a seated member is a resume.
        fx.join(&bob, "S").unwrap();

        let session = fx.registry.session("S").unwrap();
        assert_eq!(session.players, vec![alice.clone(), bob.clone()]);
        assert_eq!(session.phase, GamePhase::InGame);

        let updates = drain(&mut bob_rx);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_type, UpdateType::GameStarted);
        assert_eq!(updates[0].str_field("your_symbol"), Some("O"));

        // A third player still bounces off the capacity limit.
        let (carol, _carol_rx) = fx.register("carol");
        assert_eq!(fx.join(&carol, "S").unwrap_err(), RegistryError::Full);
    }

    #[test]
    fn join_unknown_session_is_not_found() {
        let mut fx = Fixture::new();
        let (bob, _rx) = fx.register("bob");
        assert_eq!(fx.join(&bob, "nope").unwrap_err(), RegistryError::NotFound);
    }

    #[test]
    fn matchmaking_pairs_fifo() {
        let mut fx = Fixture::new();
        let ids: Vec<(String, mpsc::UnboundedReceiver<String>)> =
            ["a", "b", "c", "d"].into_iter().map(|n| fx.register(n)).collect();

        for (id, _) in &ids {
            fx.registry
                .enqueue_matchmaking(&mut fx.connections, &fx.broadcaster, id);
        }

        assert_eq!(fx.registry.len(), 2);
        assert_eq!(fx.registry.queue_len(), 0);

        let first = fx.registry.session("match_1").expect("first pair");
        assert_eq!(first.players, vec![ids[0].0.clone(), ids[1].0.clone()]);
        assert!(first.is_matchmade);
        assert_eq!(first.phase, GamePhase::InGame);

        let second = fx.registry.session("match_2").expect("second pair");
        assert_eq!(second.players, vec![ids[2].0.clone(), ids[3].0.clone()]);
    }

    #[test]
    fn matchmaking_skips_disconnected_entries() {
        let mut fx = Fixture::new();
        let (ghost, _ghost_rx) = fx.register("ghost");
        let (alice, _alice_rx) = fx.register("alice");
        let (bob, _bob_rx) = fx.register("bob");

        fx.registry
            .enqueue_matchmaking(&mut fx.connections, &fx.broadcaster, &ghost);
        // ghost's connection drops while queued
        let conn = fx.connections.connection_of(&ghost).unwrap();
        fx.connections.remove(conn);

        fx.registry
            .enqueue_matchmaking(&mut fx.connections, &fx.broadcaster, &alice);
        assert_eq!(fx.registry.len(), 0, "no pairing against a dead entry");

        fx.registry
            .enqueue_matchmaking(&mut fx.connections, &fx.broadcaster, &bob);
        let session = fx.registry.session("match_1").expect("live pair formed");
        assert_eq!(session.players, vec![alice.clone(), bob.clone()]);
    }

    #[test]
    fn disconnect_tears_down_and_clears_survivor() {
        let mut fx = Fixture::new();
        let (alice, mut alice_rx) = fx.register("alice");
        let (bob, _bob_rx) = fx.register("bob");
        fx.create(&alice, "S").unwrap();
        fx.join(&bob, "S").unwrap();
        drain(&mut alice_rx);

        fx.registry
            .disconnect(&mut fx.connections, &fx.broadcaster, &bob);

        assert!(fx.registry.session("S").is_none());
        assert_eq!(
            fx.connections.player_by_id(&alice).unwrap().session_id,
            None,
            "survivor's session key is cleared"
        );

        let updates = drain(&mut alice_rx);
        let over = updates
            .iter()
            .find(|u| u.update_type == UpdateType::GameOver)
            .expect("survivor is told the game ended");
        assert_eq!(over.str_field("winner"), Some("alice"));
        assert_eq!(over.str_field("reason"), Some("opponent_disconnected"));
    }

    #[test]
    fn disconnect_removes_queued_player() {
        let mut fx = Fixture::new();
        let (alice, _rx) = fx.register("alice");
        fx.registry
            .enqueue_matchmaking(&mut fx.connections, &fx.broadcaster, &alice);
        assert_eq!(fx.registry.queue_len(), 1);

        fx.registry
            .disconnect(&mut fx.connections, &fx.broadcaster, &alice);
        assert_eq!(fx.registry.queue_len(), 0);
    }

    #[test]
    fn rejoining_a_vacated_seat_resends_projections() {
        let mut fx = Fixture::new();
        let (alice, _alice_rx) = fx.register("alice");
        let (bob, _bob_rx) = fx.register("bob");
        let (carol, _carol_rx) = fx.register("carol");

        fx.registry
            .create(&mut fx.connections, &fx.broadcaster, &alice, "S", None, 3)
            .unwrap();
        fx.join(&bob, "S").unwrap();
        fx.join(&carol, "S").unwrap();
        assert_eq!(fx.registry.session("S").unwrap().phase, GamePhase::InGame);

        // carol drops; two remain, so the session survives
        fx.registry
            .disconnect(&mut fx.connections, &fx.broadcaster, &carol);
        assert_eq!(fx.registry.session("S").unwrap().players.len(), 2);

        // a reconnecting player takes the free seat; the game state is not
        // re-created and everyone gets a fresh full projection
        let (carol2, mut carol2_rx) = fx.register("carol");
        fx.join(&carol2, "S").unwrap();

        let session = fx.registry.session("S").unwrap();
        assert_eq!(session.phase, GamePhase::InGame);
        let updates = drain(&mut carol2_rx);
        assert!(updates.iter().any(|u| u.update_type == UpdateType::GameStarted));
    }
}
