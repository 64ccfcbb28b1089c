//! Registry of active games
//!
//! The table structure (insert, lookup, remove) sits behind one lock and every
//! game behind its own, so two different games never contend. A game is only
//! read or mutated through [`GameTable::with_game`]. Once a game turns
//! terminal both players are released back to idle under that game's lock, and
//! any later access reports [`GameTableError::NoSuchGame`].

use crate::session::{Session, Status};
use log::info;
use shared::reversi::{Awards, Board, ReversiGame, RuleViolation, Side, TurnOutcome};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

pub type GameId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GameTableError {
    #[error("no such game: {0}")]
    NoSuchGame(GameId),
}

/// A participant: the session plus the username bound at pairing time.
///
/// Scores are credited to `username`; the session is only used to deliver
/// messages and to track status.
#[derive(Clone)]
pub struct Player {
    pub session: Arc<Session>,
    pub username: String,
}

impl Player {
    pub fn new(session: Arc<Session>, username: impl Into<String>) -> Self {
        Self {
            session,
            username: username.into(),
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("session", &self.session.id())
            .field("username", &self.username)
            .finish()
    }
}

/// Copy of a game's visible state, taken under the game lock and used to
/// build messages after the lock is released
#[derive(Debug, Clone)]
pub struct GameView {
    pub id: GameId,
    pub board: Board,
    pub turn: Side,
    pub black: Player,
    pub white: Player,
}

impl GameView {
    pub fn player(&self, side: Side) -> &Player {
        match side {
            Side::Black => &self.black,
            Side::White => &self.white,
        }
    }

    /// Sends the same message to both players
    pub fn broadcast(&self, message: &str) {
        self.black.session.send(message);
        self.white.session.send(message);
    }
}

/// One active match. Player 1 plays black, player 2 white.
#[derive(Debug)]
pub struct Game {
    id: GameId,
    black: Player,
    white: Player,
    rules: ReversiGame,
}

impl Game {
    fn new(id: GameId, black: Player, white: Player, rules: ReversiGame) -> Self {
        Self {
            id,
            black,
            white,
            rules,
        }
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn board(&self) -> &Board {
        self.rules.board()
    }

    pub fn turn(&self) -> Side {
        self.rules.turn()
    }

    pub fn is_terminal(&self) -> bool {
        self.rules.is_finished()
    }

    pub fn player(&self, side: Side) -> &Player {
        match side {
            Side::Black => &self.black,
            Side::White => &self.white,
        }
    }

    pub fn view(&self) -> GameView {
        GameView {
            id: self.id,
            board: self.rules.board().clone(),
            turn: self.rules.turn(),
            black: self.black.clone(),
            white: self.white.clone(),
        }
    }

    /// Plays a move for `side`. A finishing move releases both players.
    pub fn play(&mut self, side: Side, row: usize, col: usize) -> Result<TurnOutcome, RuleViolation> {
        let outcome = self.rules.play(side, row, col)?;
        if let TurnOutcome::Finished(_) = outcome {
            self.release_players();
        }
        Ok(outcome)
    }

    /// Ends the game early in favour of `loser`'s opponent
    pub fn forfeit(&mut self, loser: Side) -> Result<Awards, RuleViolation> {
        if self.rules.is_finished() {
            return Err(RuleViolation::GameOver);
        }
        self.rules.finish();
        self.release_players();
        Ok(Awards::forfeit(loser))
    }

    fn release_players(&self) {
        for player in [&self.black, &self.white] {
            player
                .session
                .update_status(|status| match status {
                    Status::InGame { game, .. } if game == self.id => Status::Idle,
                    other => other,
                });
        }
    }
}

/// Owns every active game
#[derive(Debug)]
pub struct GameTable {
    games: RwLock<HashMap<GameId, Arc<Mutex<Game>>>>,
    next_game_id: AtomicU64,
}

impl Default for GameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl GameTable {
    pub fn new() -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            next_game_id: AtomicU64::new(1),
        }
    }

    /// Registers a new game on the opening board and moves both players to
    /// `InGame`. `black` moves first.
    pub async fn create(&self, black: Player, white: Player) -> GameId {
        self.create_from(black, white, ReversiGame::new()).await
    }

    /// Like [`GameTable::create`], resuming from the given rules state
    pub async fn create_from(&self, black: Player, white: Player, rules: ReversiGame) -> GameId {
        let id = self.next_game_id.fetch_add(1, Ordering::Relaxed);
        info!(
            "Game {} created: {} (black) vs {} (white)",
            id, black.username, white.username
        );

        let (black_session, white_session) = (black.session.clone(), white.session.clone());
        let game = Game::new(id, black, white, rules);
        self.games.write().await.insert(id, Arc::new(Mutex::new(game)));

        black_session.set_status(Status::InGame {
            game: id,
            side: Side::Black,
        });
        white_session.set_status(Status::InGame {
            game: id,
            side: Side::White,
        });
        id
    }

    /// Runs `f` with exclusive access to the game.
    ///
    /// Access is serialized per game; terminal games are treated as missing.
    pub async fn with_game<F, R>(&self, id: GameId, f: F) -> Result<R, GameTableError>
    where
        F: FnOnce(&mut Game) -> R,
    {
        let entry = {
            let games = self.games.read().await;
            games.get(&id).cloned()
        }
        .ok_or(GameTableError::NoSuchGame(id))?;

        let mut game = entry.lock().await;
        if game.is_terminal() {
            return Err(GameTableError::NoSuchGame(id));
        }
        Ok(f(&mut game))
    }

    /// Detaches a game from the table
    pub async fn remove(&self, id: GameId) -> Result<(), GameTableError> {
        match self.games.write().await.remove(&id) {
            Some(_) => {
                info!("Game {} removed", id);
                Ok(())
            }
            None => Err(GameTableError::NoSuchGame(id)),
        }
    }

    pub async fn contains(&self, id: GameId) -> bool {
        self.games.read().await.contains_key(&id)
    }

    /// Number of games currently registered
    pub async fn len(&self) -> usize {
        self.games.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.games.read().await.is_empty()
    }
}
