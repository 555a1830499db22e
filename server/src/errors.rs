//! Server-side error taxonomy.
//!
//! Every variant here is surfaced to the offending client as an `Error`
//! update and never mutates state; none of them is fatal to the process.
//! Malformed wire lines are logged at the network layer and disconnects are
//! events, not errors.

use thiserror::Error;

/// Resource failures from session registry operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("game name already exists")]
    NameTaken,

    #[error("game not found")]
    NotFound,

    #[error("invalid password")]
    BadPassword,

    #[error("game is full")]
    Full,
}

/// Failures while routing an in-session command.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("no active session")]
    SessionNotFound,

    #[error("game not in progress")]
    NotInProgress,

    #[error("invalid command: {0}")]
    Invalid(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
