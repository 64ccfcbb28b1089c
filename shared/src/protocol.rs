//! Line-based text protocol spoken between client and server
//!
//! One command per newline-terminated line, case-sensitive keywords and
//! space-separated arguments. Responses are plain text.

use crate::reversi::BOARD_SIZE;
use std::str::FromStr;
use thiserror::Error;

/// Port the server listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 8080;

/// Number of entries returned by `scoreboard`
pub const DEFAULT_SCOREBOARD_SIZE: usize = 10;

/// Longest accepted command line in bytes
pub const MAX_LINE_LENGTH: usize = 1024;

pub const HELP_TEXT: &str = "Available commands:\n\
register <username> <password> - Create a new account\n\
login <username> <password> - Sign in\n\
logout - Sign out of the current account\n\
play - Look for a Reversi match\n\
stop - Stop looking for a match\n\
move <row> <col> - Place a disc (rows and columns 0-7)\n\
surrender - Give up the current game\n\
scoreboard - Show the top players\n\
help - Show this message\n\
quit - Disconnect from the server\n";

/// A parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { username: String, password: String },
    Login { username: String, password: String },
    Logout,
    Play,
    Stop,
    Move { row: usize, col: usize },
    Surrender,
    Scoreboard,
    Help,
    Quit,
}

impl Command {
    /// Keyword that introduces this command on the wire
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Login { .. } => "login",
            Command::Logout => "logout",
            Command::Play => "play",
            Command::Stop => "stop",
            Command::Move { .. } => "move",
            Command::Surrender => "surrender",
            Command::Scoreboard => "scoreboard",
            Command::Help => "help",
            Command::Quit => "quit",
        }
    }
}

/// Malformed input from a client. The connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Blank line; sessions skip these without replying
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Invalid coordinate '{0}': rows and columns are 0-7")]
    InvalidCoordinate(String),
    #[error("Command too long ({0} bytes)")]
    LineTooLong(usize),
}

fn coordinate(arg: &str) -> Result<usize, ProtocolError> {
    arg.parse::<usize>()
        .ok()
        .filter(|&value| value < BOARD_SIZE)
        .ok_or_else(|| ProtocolError::InvalidCoordinate(arg.to_string()))
}

fn credentials(args: &[&str], usage: &'static str) -> Result<(String, String), ProtocolError> {
    match args {
        [username, password] => Ok((username.to_string(), password.to_string())),
        _ => Err(ProtocolError::Usage(usage)),
    }
}

fn no_args(args: &[&str], command: Command) -> Result<Command, ProtocolError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(ProtocolError::Usage(command.keyword()))
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let keyword = words.next().ok_or(ProtocolError::Empty)?;
        let args: Vec<&str> = words.collect();

        match keyword {
            "register" => {
                let (username, password) =
                    credentials(&args, "register <username> <password>")?;
                Ok(Command::Register { username, password })
            }
            "login" => {
                let (username, password) = credentials(&args, "login <username> <password>")?;
                Ok(Command::Login { username, password })
            }
            "move" => match args.as_slice() {
                [row, col] => Ok(Command::Move {
                    row: coordinate(row)?,
                    col: coordinate(col)?,
                }),
                _ => Err(ProtocolError::Usage("move <row> <col>")),
            },
            "logout" => no_args(&args, Command::Logout),
            "play" => no_args(&args, Command::Play),
            "stop" => no_args(&args, Command::Stop),
            "surrender" => no_args(&args, Command::Surrender),
            "scoreboard" => no_args(&args, Command::Scoreboard),
            "help" => no_args(&args, Command::Help),
            "quit" => no_args(&args, Command::Quit),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

/// Strips the line terminator and checks the length limit
pub fn normalize_line(raw: &str, max_len: usize) -> Result<&str, ProtocolError> {
    let line = raw.trim_end_matches(['\r', '\n']);
    if line.len() > max_len {
        return Err(ProtocolError::LineTooLong(line.len()));
    }
    Ok(line)
}
