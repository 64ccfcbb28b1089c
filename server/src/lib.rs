//! # Reversi Server Library
//!
//! This library implements the authoritative server for networked Reversi
//! (Othello). Clients connect over TCP, exchange newline-terminated text
//! commands, and are paired into two-player matches. The server owns every
//! board; clients only ever see what it sends them.
//!
//! ## Core Responsibilities
//!
//! ### Accounts
//! Registration, login and logout against a [`persistence::PersistenceGateway`].
//! An account can be logged in from at most one connection at a time, and its
//! cumulative score survives restarts when a file store is configured.
//!
//! ### Matchmaking
//! A single FIFO queue pairs waiting players. The player who waited longest
//! plays black and moves first.
//!
//! ### Game Authority
//! Moves are validated and applied under a per-game lock, turn passing and
//! game end are detected by the server, and results are credited exactly once
//! whether a game ends on the board, by surrender, or by disconnect.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! Each accepted socket gets its own tokio task that reads lines and drives a
//! [`session::ClientSession`]. Replies go through an unbounded channel to a
//! dedicated writer task, so a slow reader never stalls another client's
//! worker.
//!
//! ### Lock Ordering
//! Shared state is split into the matchmaking queue, the game table, one lock
//! per game, and each session's status. They are always acquired in that
//! order, and storage calls and socket writes happen with no lock held.
//!
//! ## Module Organization
//!
//! - `client_manager`: live connection registry and capacity limit
//! - `config`: runtime settings
//! - `context`: shared state handed to every worker
//! - `error`: client-facing rejection reasons
//! - `game_table`: active games and their players
//! - `matchmaking`: the FIFO waiting queue
//! - `network`: accept loop, line reader and outbound writer
//! - `persistence`: account storage backends
//! - `session`: per-connection state machine and command dispatch
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::context::ServerContext;
//! use server::network::Server;
//! use server::persistence::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let address = config.address();
//!     let context = Arc::new(ServerContext::new(Arc::new(MemoryStore::new()), config));
//!
//!     let server = Server::bind(&address, context).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod context;
pub mod error;
pub mod game_table;
pub mod matchmaking;
pub mod network;
pub mod persistence;
pub mod session;
