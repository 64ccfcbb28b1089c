//! # Reversi Client Library
//!
//! A thin terminal client for the Reversi server. All game logic lives on the
//! server; the client forwards what the user types and prints what the server
//! sends back, so it can never disagree with the authoritative board.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Owns the TCP connection and relays lines in both directions:
//! - User input lines are forwarded to the server unchanged
//! - Server lines are written to the output as they arrive
//! - End of input half-closes the socket while server output keeps flowing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use tokio::io::{stdin, stdout, BufReader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect("127.0.0.1:8080").await?;
//!     client.run(BufReader::new(stdin()), stdout()).await?;
//!     Ok(())
//! }
//! ```

pub mod network;
