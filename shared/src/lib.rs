//! Types shared between the parlor server and its clients: the wire
//! protocol, the game-state capability set, and the bundled reference game.

pub mod game;
pub mod protocol;
pub mod tictactoe;

pub use game::{GameFactory, GameState};
pub use protocol::{Command, CommandType, GamePhase, Update, UpdateType};
pub use tictactoe::TicTacToe;
