//! Server configuration

use shared::protocol::{DEFAULT_PORT, DEFAULT_SCOREBOARD_SIZE, MAX_LINE_LENGTH};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Account store file; None keeps accounts in memory only
    pub database: Option<PathBuf>,
    /// Entries listed by `scoreboard`
    pub scoreboard_size: usize,
    pub max_line_length: usize,
    /// Connections beyond this are refused with "Server full"
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            database: Some(PathBuf::from("users.db")),
            scoreboard_size: DEFAULT_SCOREBOARD_SIZE,
            max_line_length: MAX_LINE_LENGTH,
            max_clients: 256,
        }
    }
}

impl ServerConfig {
    /// `host:port` string to bind to
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.scoreboard_size, 10);
        assert_eq!(config.max_line_length, 1024);
        assert_eq!(config.database, Some(PathBuf::from("users.db")));
    }
}
