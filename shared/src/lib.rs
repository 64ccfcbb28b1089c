//! Game rules and wire protocol shared by the Reversi server and client.
//!
//! `reversi` holds the pure rules engine, `protocol` the text command grammar.

pub mod protocol;
pub mod reversi;

pub use protocol::{Command, ProtocolError};
pub use reversi::{Awards, Board, Cell, FinalScore, ReversiGame, RuleViolation, Side, TurnOutcome};
