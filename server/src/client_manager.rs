//! Connection registry for the TCP server
//!
//! This module tracks which sockets are currently attached to the server:
//! - Session id assignment for every accepted connection
//! - Capacity enforcement so a flood of connections cannot exhaust the host
//! - Connection metadata used in logs when a client leaves
//!
//! Game and account state live elsewhere; a registry entry only says that a
//! worker task is serving the socket.

use crate::session::SessionId;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A socket currently served by a connection worker
#[derive(Debug)]
pub struct ConnectedClient {
    /// Session id assigned by the server
    pub id: SessionId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    pub connected_at: Instant,
}

impl ConnectedClient {
    pub fn new(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
        }
    }

    /// Time since the connection was accepted
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Tracks every live connection and hands out session ids
///
/// Ids start at 1 and are never reused within one server run, so a late
/// message addressed to a departed session can never reach a newcomer.
pub struct ClientManager {
    /// Live connections indexed by session id
    clients: HashMap<SessionId, ConnectedClient>,
    next_client_id: SessionId,
    /// Maximum number of concurrent connections
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new connection.
    ///
    /// Returns the assigned session id, or None when the server is full.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<SessionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, ConnectedClient::new(client_id, addr));
        Some(client_id)
    }

    /// Forgets a connection. Returns false if it was already gone.
    pub fn remove_client(&mut self, client_id: &SessionId) -> bool {
        match self.clients.remove(client_id) {
            Some(client) => {
                info!(
                    "Client {} ({}) disconnected after {:.1}s",
                    client.id,
                    client.addr,
                    client.connected_for().as_secs_f64()
                );
                true
            }
            None => false,
        }
    }

    pub fn get(&self, client_id: &SessionId) -> Option<&ConnectedClient> {
        self.clients.get(client_id)
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
