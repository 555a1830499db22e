//! Wire protocol for client-server communication
//!
//! Messages travel as line-delimited JSON over a persistent TCP connection.
//! Clients send [`Command`] envelopes, the server answers with [`Update`]
//! envelopes. Both carry a free-form `data` map so the framework stays
//! agnostic of any particular game's move encoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Client intent, one per inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    CreateGame,
    JoinGame,
    FindGame,
    MakeMove,
    Surrender,
    Disconnect,
}

/// Server-to-client fact, one per outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    GameCreated,
    GameStarted,
    GameStateUpdate,
    GameOver,
    Error,
}

/// Coarse lifecycle stage of a session.
///
/// Advances Lobby -> InGame -> EndGame and never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Lobby,
    InGame,
    EndGame,
}

/// A single client command. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command_type: CommandType,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Command {
    pub fn new(command_type: CommandType, data: Map<String, Value>) -> Self {
        Self { command_type, data }
    }

    /// Builds a command from `(field, value)` pairs.
    pub fn with_fields<I, K>(command_type: CommandType, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let data = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self { command_type, data }
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn usize_field(&self, key: &str) -> Option<usize> {
        self.data.get(key).and_then(Value::as_u64).map(|n| n as usize)
    }

    /// Serializes to one wire line (no trailing newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// A single server update. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub update_type: UpdateType,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Update {
    pub fn new(update_type: UpdateType, data: Map<String, Value>) -> Self {
        Self { update_type, data }
    }

    pub fn with_fields<I, K>(update_type: UpdateType, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let data = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self { update_type, data }
    }

    /// Error surfaced to a single offending client.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_fields(UpdateType::Error, [("message", Value::String(message.into()))])
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
