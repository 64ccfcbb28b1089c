//! FIFO matchmaking
//!
//! Waiting players sit in a single queue behind one lock. A `play` request
//! either consumes the oldest waiting player and starts a game, or becomes the
//! sole occupant of the queue. Status changes of the affected sessions happen
//! while the queue lock is held, so a session is never observed half-paired by
//! a concurrent `stop` or disconnect.

use crate::game_table::{GameId, GameTable, Player};
use crate::session::{Session, SessionId, Status};
use log::info;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MatchmakingError {
    #[error("session is already queued")]
    AlreadyQueued,
    #[error("session is not queued")]
    NotQueued,
}

/// Result of a `play` request
#[derive(Debug)]
pub enum PlayOutcome {
    /// Nobody was waiting; the requester is now queued
    Waiting,
    /// Paired with the oldest waiting player, who plays black
    Paired { game: GameId, opponent: Player },
}

#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    waiting: Mutex<VecDeque<Player>>,
}

fn position(waiting: &VecDeque<Player>, id: SessionId) -> Option<usize> {
    waiting.iter().position(|p| p.session.id() == id)
}

fn push_unique(waiting: &mut VecDeque<Player>, player: Player) -> Result<(), MatchmakingError> {
    if position(waiting, player.session.id()).is_some() {
        return Err(MatchmakingError::AlreadyQueued);
    }
    player.session.set_status(Status::Queued);
    info!("{} is waiting for an opponent", player.username);
    waiting.push_back(player);
    Ok(())
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs `player` with the head of the queue or queues them.
    ///
    /// Enqueue, pairing and game creation form one atomic step with respect
    /// to [`MatchmakingQueue::cancel`].
    pub async fn play(&self, player: Player, games: &GameTable) -> Result<PlayOutcome, MatchmakingError> {
        let mut waiting = self.waiting.lock().await;
        if position(&waiting, player.session.id()).is_some() {
            return Err(MatchmakingError::AlreadyQueued);
        }

        match waiting.pop_front() {
            Some(opponent) => {
                let game = games.create(opponent.clone(), player).await;
                Ok(PlayOutcome::Paired { game, opponent })
            }
            None => {
                push_unique(&mut waiting, player)?;
                Ok(PlayOutcome::Waiting)
            }
        }
    }

    /// Removes the given session from the queue and marks it `Idle`
    pub async fn cancel(&self, session: &Session) -> Result<(), MatchmakingError> {
        let mut waiting = self.waiting.lock().await;
        let index = position(&waiting, session.id()).ok_or(MatchmakingError::NotQueued)?;
        if let Some(player) = waiting.remove(index) {
            player.session.set_status(Status::Idle);
            info!("{} stopped waiting for an opponent", player.username);
        }
        Ok(())
    }

    pub async fn contains(&self, session: &Session) -> bool {
        position(&*self.waiting.lock().await, session.id()).is_some()
    }

    pub async fn len(&self) -> usize {
        self.waiting.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.waiting.lock().await.is_empty()
    }
}
