//! State shared by every connection worker

use crate::config::ServerConfig;
use crate::game_table::GameTable;
use crate::matchmaking::MatchmakingQueue;
use crate::persistence::{AccountStore, PersistenceGateway};
use std::sync::Arc;

pub struct ServerContext {
    pub queue: MatchmakingQueue,
    pub games: GameTable,
    pub store: AccountStore,
    pub config: ServerConfig,
}

impl ServerContext {
    pub fn new(store: Arc<dyn PersistenceGateway>, config: ServerConfig) -> Self {
        Self {
            queue: MatchmakingQueue::new(),
            games: GameTable::new(),
            store: AccountStore::new(store),
            config,
        }
    }
}
