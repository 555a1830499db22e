//! The capability set every concrete game implements.
//!
//! The server's command router is generic over this trait: it gates commands
//! on session phase and turn ownership, but never inspects game-specific
//! fields. A game plugs in by implementing the three operations below and
//! providing a [`GameFactory`] that seeds fresh state from the join-ordered
//! player list.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::protocol::{Command, GamePhase, Update};

/// Authoritative per-session game state.
///
/// Owned exclusively by its session and mutated only through [`apply`].
/// Clients may hold an instance as a local mirror and feed it the same
/// updates the server broadcasts.
///
/// [`apply`]: GameState::apply
pub trait GameState: Send {
    /// Pure legality check for a command from the player at `player_index`
    /// (seat order = join order). Must verify turn ownership and the
    /// structural/semantic validity of the move. Never mutates state.
    fn validate(&self, command: &Command, player_index: usize) -> Result<(), String>;

    /// Mutates state from an already-validated update's data: applies the
    /// move, advances the turn, detects terminal conditions and sets
    /// `game_over`/`winner`/`phase` accordingly.
    fn apply(&mut self, update: &Update);

    /// The subset of state visible to one seat. Derives seat-specific
    /// fields (symbol, turn flag) from `player_index`.
    fn perspective(&self, player_index: usize) -> Map<String, Value>;

    fn game_over(&self) -> bool;

    fn winner(&self) -> Option<String>;

    fn phase(&self) -> GamePhase;
}

/// Builds the initial state for a freshly filled session, seeded with the
/// ordered player-name list (index 0/1 map to game roles).
pub type GameFactory = Arc<dyn Fn(&[String]) -> Box<dyn GameState> + Send + Sync>;
