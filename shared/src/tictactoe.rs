//! Bundled reference game: 3x3 tic-tac-toe.
//!
//! Seat 0 plays X and moves first, seat 1 plays O. Serves as the working
//! example of the [`GameState`] capability set and as the game the server
//! binary and the integration tests run.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::game::{GameFactory, GameState};
use crate::protocol::{Command, GamePhase, Update};

const BOARD_SIZE: usize = 3;

#[derive(Debug, Clone)]
pub struct TicTacToe {
    board: [[String; BOARD_SIZE]; BOARD_SIZE],
    current_player: String,
    winner: Option<String>,
    game_over: bool,
    phase: GamePhase,
}

impl TicTacToe {
    /// Fresh in-progress game with an empty board; X moves first.
    pub fn new() -> Self {
        Self {
            board: Default::default(),
            current_player: "X".to_string(),
            winner: None,
            game_over: false,
            phase: GamePhase::InGame,
        }
    }

    /// Factory for the session registry. The seeded player list is not
    /// needed here: seats map to symbols purely by index.
    pub fn factory() -> GameFactory {
        Arc::new(|_players: &[String]| Box::new(TicTacToe::new()) as Box<dyn GameState>)
    }

    pub fn symbol_for(player_index: usize) -> &'static str {
        if player_index == 0 {
            "X"
        } else {
            "O"
        }
    }

    fn line_winner(&self) -> Option<String> {
        let b = &self.board;
        for i in 0..BOARD_SIZE {
            if !b[i][0].is_empty() && b[i][0] == b[i][1] && b[i][1] == b[i][2] {
                return Some(b[i][0].clone());
            }
            if !b[0][i].is_empty() && b[0][i] == b[1][i] && b[1][i] == b[2][i] {
                return Some(b[0][i].clone());
            }
        }
        if !b[1][1].is_empty()
            && ((b[0][0] == b[1][1] && b[1][1] == b[2][2]) || (b[0][2] == b[1][1] && b[1][1] == b[2][0]))
        {
            return Some(b[1][1].clone());
        }
        None
    }

    fn is_draw(&self) -> bool {
        self.board.iter().all(|row| row.iter().all(|cell| !cell.is_empty()))
    }
}

impl Default for TicTacToe {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState for TicTacToe {
    fn validate(&self, command: &Command, player_index: usize) -> Result<(), String> {
        let symbol = Self::symbol_for(player_index);

        if self.game_over {
            return Err("game is already over".to_string());
        }
        if symbol != self.current_player {
            return Err(format!("not your turn - it's {}'s turn", self.current_player));
        }
        if let Some(claimed) = command.str_field("symbol") {
            if claimed != symbol {
                return Err(format!("you play {}, not {}", symbol, claimed));
            }
        }

        let row = command
            .usize_field("row")
            .ok_or_else(|| "invalid move: missing row".to_string())?;
        let col = command
            .usize_field("col")
            .ok_or_else(|| "invalid move: missing col".to_string())?;

        if row >= BOARD_SIZE || col >= BOARD_SIZE {
            return Err(format!("invalid move: ({}, {}) is out of bounds", row, col));
        }
        if !self.board[row][col].is_empty() {
            return Err(format!("invalid move: ({}, {}) is already occupied", row, col));
        }

        Ok(())
    }

    fn apply(&mut self, update: &Update) {
        let row = update.data.get("row").and_then(Value::as_u64).map(|n| n as usize);
        let col = update.data.get("col").and_then(Value::as_u64).map(|n| n as usize);
        let (row, col) = match (row, col) {
            (Some(row), Some(col)) if row < BOARD_SIZE && col < BOARD_SIZE => (row, col),
            _ => return,
        };

        let symbol = update
            .str_field("symbol")
            .map(str::to_string)
            .unwrap_or_else(|| self.current_player.clone());
        self.board[row][col] = symbol.clone();

        if let Some(winner) = self.line_winner() {
            self.winner = Some(winner);
            self.game_over = true;
            self.phase = GamePhase::EndGame;
        } else if self.is_draw() {
            self.winner = None;
            self.game_over = true;
            self.phase = GamePhase::EndGame;
        } else {
            self.current_player = if symbol == "X" { "O" } else { "X" }.to_string();
        }
    }

    fn perspective(&self, player_index: usize) -> Map<String, Value> {
        let symbol = Self::symbol_for(player_index);
        let mut state = Map::new();
        state.insert("phase".to_string(), json!(self.phase));
        state.insert("board".to_string(), json!(&self.board));
        state.insert("current_player".to_string(), json!(self.current_player));
        state.insert("winner".to_string(), json!(self.winner));
        state.insert("your_symbol".to_string(), json!(symbol));
        state.insert(
            "is_your_turn".to_string(),
            json!(!self.game_over && self.current_player == symbol),
        );
        state
    }

    fn game_over(&self) -> bool {
        self.game_over
    }

    fn winner(&self) -> Option<String> {
        self.winner.clone()
    }

    fn phase(&self) -> GamePhase {
        self.phase
    }
}
