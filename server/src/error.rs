//! Errors reported back to a client after a rejected command

use crate::game_table::GameTableError;
use crate::matchmaking::MatchmakingError;
use crate::persistence::PersistenceError;
use shared::protocol::ProtocolError;
use shared::reversi::RuleViolation;
use thiserror::Error;

/// A command issued in the wrong session state, or clashing with an
/// existing account or login
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateConflict {
    #[error("You can't use this command while searching for a match! Use stop first.")]
    Searching,
    #[error("You are already searching for a match!")]
    AlreadySearching,
    #[error("Finish your match first!")]
    InGame,
    #[error("You can only use stop while searching for a match!")]
    NotSearching,
    #[error("You are not in an active game!")]
    NotInGame,
    #[error("You are not logged in!")]
    NotLoggedIn,
    #[error("You must be logged in to play!")]
    LoginRequired,
    #[error("You are already logged in with an account!")]
    AlreadyAuthenticated,
    #[error("User {0} is already logged in!")]
    LoggedInElsewhere(String),
    #[error("User {0} already exists.")]
    UsernameTaken(String),
}

/// Everything that can go wrong while handling one command
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Rule(#[from] RuleViolation),
    #[error(transparent)]
    State(#[from] StateConflict),
    #[error("Login failed! Check your credentials.")]
    InvalidCredentials,
    #[error("Server error, please try again later.")]
    Persistence(#[from] PersistenceError),
}

impl From<MatchmakingError> for CommandError {
    fn from(err: MatchmakingError) -> Self {
        match err {
            MatchmakingError::AlreadyQueued => StateConflict::AlreadySearching.into(),
            MatchmakingError::NotQueued => StateConflict::NotSearching.into(),
        }
    }
}

impl From<GameTableError> for CommandError {
    fn from(_: GameTableError) -> Self {
        StateConflict::NotInGame.into()
    }
}
