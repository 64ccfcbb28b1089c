//! Per-connection session state and command dispatch
//!
//! A [`Session`] is the part of a connection other workers may touch: its
//! identity, status and outbound message channel. A [`ClientSession`] drives
//! one session from the connection's own worker, turning received lines into
//! commands and delegating to matchmaking, the game table and storage.
//!
//! Session fields are written by the owning worker, by the pairing step under
//! the matchmaking lock, and by game termination under that game's lock. The
//! status mutex is never held across an `.await`.

use crate::context::ServerContext;
use crate::error::{CommandError, StateConflict};
use crate::game_table::{GameId, GameView, Player};
use crate::matchmaking::PlayOutcome;
use crate::persistence::{LoginOutcome, Registration};
use log::{debug, error, info, warn};
use shared::protocol::{normalize_line, Command, ProtocolError, HELP_TEXT};
use shared::reversi::{Awards, FinalScore, Side, TurnOutcome};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

pub type SessionId = u64;

/// Lifecycle of a session. The game reference only exists while in a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Queued,
    InGame { game: GameId, side: Side },
}

#[derive(Debug)]
struct SessionState {
    username: Option<String>,
    status: Status,
}

/// Shared handle to a connected client
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    outbox: mpsc::UnboundedSender<String>,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: SessionId, outbox: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            outbox,
            state: Mutex::new(SessionState {
                username: None,
                status: Status::Idle,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> Status {
        self.state().status
    }

    /// Authenticated username, if logged in
    pub fn username(&self) -> Option<String> {
        self.state().username.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().username.is_some()
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.state().status = status;
    }

    /// Replaces the status atomically based on its current value
    pub(crate) fn update_status(&self, f: impl FnOnce(Status) -> Status) {
        let mut state = self.state();
        state.status = f(state.status);
    }

    pub(crate) fn set_username(&self, username: Option<String>) {
        self.state().username = username;
    }

    /// Queues a message for the connection's writer. Each message goes out as
    /// a single newline-terminated write. Returns false once the connection
    /// is gone.
    pub fn send(&self, message: &str) -> bool {
        let mut text = message.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.outbox.send(text).is_ok()
    }
}

/// Input delivered to a session's state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// One received line, terminator included or not
    Line(String),
    /// The connection dropped or the client quit
    Disconnected,
}

/// Whether the connection should keep reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct ClientSession {
    session: Arc<Session>,
    context: Arc<ServerContext>,
}

impl ClientSession {
    pub fn new(id: SessionId, outbox: mpsc::UnboundedSender<String>, context: Arc<ServerContext>) -> Self {
        Self {
            session: Arc::new(Session::new(id, outbox)),
            context,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn greet(&self) {
        self.session
            .send("Welcome to Reversi! Type help for the list of commands.");
    }

    pub async fn handle_event(&self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::Line(line) => self.handle_line(&line).await,
            SessionEvent::Disconnected => {
                self.disconnect().await;
                Flow::Close
            }
        }
    }

    async fn handle_line(&self, raw: &str) -> Flow {
        let line = match normalize_line(raw, self.context.config.max_line_length) {
            Ok(line) => line,
            Err(e) => {
                warn!("Session {}: {}", self.session.id(), e);
                self.reject(e.into()).await;
                return Flow::Continue;
            }
        };
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            // Blank lines are ignored
            Err(ProtocolError::Empty) => return Flow::Continue,
            Err(e) => {
                self.reject(e.into()).await;
                return Flow::Continue;
            }
        };
        // Only the keyword is logged, arguments may hold a password
        debug!("Session {} issued {}", self.session.id(), command.keyword());

        match self.dispatch(command).await {
            Ok(flow) => flow,
            Err(e) => {
                self.reject(e).await;
                Flow::Continue
            }
        }
    }

    async fn dispatch(&self, command: Command) -> Result<Flow, CommandError> {
        match command {
            Command::Register { username, password } => self.register(&username, &password).await,
            Command::Login { username, password } => self.login(&username, &password).await,
            Command::Logout => self.logout().await,
            Command::Play => self.play().await,
            Command::Stop => self.stop().await,
            Command::Move { row, col } => self.play_move(row, col).await,
            Command::Surrender => self.surrender().await,
            Command::Scoreboard => self.scoreboard().await,
            Command::Help => self.help(),
            Command::Quit => {
                self.session.send("Goodbye!");
                Ok(Flow::Close)
            }
        }
    }

    /// Reports a failed command to this client only. While in a game the
    /// current board is re-sent with the reason.
    async fn reject(&self, err: CommandError) {
        if let CommandError::Persistence(e) = &err {
            error!("Storage failure for session {}: {}", self.session.id(), e);
        }

        let mut message = format!("{}\n", err);
        if let Status::InGame { game, .. } = self.session.status() {
            if let Ok(board) = self.context.games.with_game(game, |g| g.board().clone()).await {
                message.push_str(&board.to_string());
            }
        }
        self.session.send(&message);
    }

    fn ensure_idle(&self) -> Result<(), StateConflict> {
        match self.session.status() {
            Status::Idle => Ok(()),
            Status::Queued => Err(StateConflict::Searching),
            Status::InGame { .. } => Err(StateConflict::InGame),
        }
    }

    fn current_game(&self) -> Result<(GameId, Side), StateConflict> {
        match self.session.status() {
            Status::InGame { game, side } => Ok((game, side)),
            _ => Err(StateConflict::NotInGame),
        }
    }

    async fn register(&self, username: &str, password: &str) -> Result<Flow, CommandError> {
        self.ensure_idle()?;
        match self.context.store.register(username, password).await? {
            Registration::Created => {
                info!("Registered account {}", username);
                self.session
                    .send(&format!("Registration successful for user {}.", username));
                Ok(Flow::Continue)
            }
            Registration::AlreadyExists => {
                Err(StateConflict::UsernameTaken(username.to_string()).into())
            }
        }
    }

    async fn login(&self, username: &str, password: &str) -> Result<Flow, CommandError> {
        self.ensure_idle()?;
        if self.session.is_authenticated() {
            return Err(StateConflict::AlreadyAuthenticated.into());
        }

        match self.context.store.login(username, password).await? {
            LoginOutcome::Ok => {
                self.session.set_username(Some(username.to_string()));
                info!("Session {} logged in as {}", self.session.id(), username);
                self.session
                    .send(&format!("Login successful! Welcome, {}.", username));
                Ok(Flow::Continue)
            }
            LoginOutcome::AlreadyLoggedIn => {
                Err(StateConflict::LoggedInElsewhere(username.to_string()).into())
            }
            LoginOutcome::InvalidCredentials => Err(CommandError::InvalidCredentials),
        }
    }

    async fn logout(&self) -> Result<Flow, CommandError> {
        self.ensure_idle()?;
        let username = self.session.username().ok_or(StateConflict::NotLoggedIn)?;
        self.context.store.logout(&username).await?;
        self.session.set_username(None);
        info!("Session {} logged out of {}", self.session.id(), username);
        self.session.send("Logout successful!");
        Ok(Flow::Continue)
    }

    async fn play(&self) -> Result<Flow, CommandError> {
        match self.session.status() {
            Status::Idle => {}
            Status::Queued => return Err(StateConflict::AlreadySearching.into()),
            Status::InGame { .. } => return Err(StateConflict::InGame.into()),
        }
        let username = self.session.username().ok_or(StateConflict::LoginRequired)?;
        let player = Player::new(Arc::clone(&self.session), username);

        match self.context.queue.play(player, &self.context.games).await? {
            PlayOutcome::Waiting => {
                self.session.send("Waiting for an opponent...");
            }
            PlayOutcome::Paired { game, .. } => self.announce_start(game).await,
        }
        Ok(Flow::Continue)
    }

    async fn announce_start(&self, game: GameId) {
        let view = match self.context.games.with_game(game, |g| g.view()).await {
            Ok(view) => view,
            // The opponent already left and forfeited
            Err(_) => return,
        };

        let to_move = &view.player(view.turn).username;
        for side in [Side::Black, Side::White] {
            let opponent = &view.player(side.opponent()).username;
            view.player(side).session.send(&format!(
                "Game started against {}! You play {} ({}).\n{}It's {}'s turn.",
                opponent,
                side,
                side.glyph(),
                view.board,
                to_move
            ));
        }
    }

    async fn stop(&self) -> Result<Flow, CommandError> {
        if self.session.status() != Status::Queued {
            return Err(StateConflict::NotSearching.into());
        }
        self.context.queue.cancel(&self.session).await?;
        self.session.send("Stopped searching for a match.");
        Ok(Flow::Continue)
    }

    async fn play_move(&self, row: usize, col: usize) -> Result<Flow, CommandError> {
        let (game, side) = self.current_game()?;
        let (result, view) = self
            .context
            .games
            .with_game(game, |g| (g.play(side, row, col), g.view()))
            .await?;

        match result? {
            TurnOutcome::Next(next) => view.broadcast(&format!(
                "Move accepted! It's {}'s turn.\n{}",
                view.player(next).username,
                view.board
            )),
            TurnOutcome::Pass { passed, next } => view.broadcast(&format!(
                "Move accepted! {} has no legal move and passes. It's {}'s turn again.\n{}",
                view.player(passed).username,
                view.player(next).username,
                view.board
            )),
            TurnOutcome::Finished(score) => self.finish_game(&view, score).await,
        }
        Ok(Flow::Continue)
    }

    async fn finish_game(&self, view: &GameView, score: FinalScore) {
        if let Err(e) = self.context.games.remove(view.id).await {
            warn!("Finished game {} was already gone: {}", view.id, e);
        }
        self.settle(view, score.awards()).await;

        let result = match score.winner() {
            Some(side) => format!("{} wins!", view.player(side).username),
            None => "It's a draw!".to_string(),
        };
        info!(
            "Game {} over: {} {} - {} {}",
            view.id, view.black.username, score.black, score.white, view.white.username
        );
        view.broadcast(&format!(
            "Game over!\nBlack ({}): {}\nWhite ({}): {}\n{}\n{}",
            view.black.username, score.black, view.white.username, score.white, result, view.board
        ));
    }

    /// Credits the final points to both accounts
    async fn settle(&self, view: &GameView, awards: Awards) {
        for side in [Side::Black, Side::White] {
            let player = view.player(side);
            let points = awards.for_side(side);
            if let Err(e) = self.context.store.add_score(&player.username, points).await {
                error!(
                    "Failed to record {} points for {}: {}",
                    points, player.username, e
                );
            }
        }
    }

    async fn surrender(&self) -> Result<Flow, CommandError> {
        let (game, side) = self.current_game()?;
        let view = self.forfeit(game, side).await?;
        view.broadcast(&format!(
            "{} surrendered the game. {} wins by forfeit.",
            view.player(side).username,
            view.player(side.opponent()).username
        ));
        Ok(Flow::Continue)
    }

    /// Ends a game early against `loser`. Shared by surrender and
    /// disconnect; whichever path takes the game lock first wins and the
    /// other sees the game as gone.
    async fn forfeit(&self, game: GameId, loser: Side) -> Result<GameView, CommandError> {
        let (awards, view) = self
            .context
            .games
            .with_game(game, |g| (g.forfeit(loser), g.view()))
            .await?;
        let awards = awards?;

        if let Err(e) = self.context.games.remove(game).await {
            warn!("Forfeited game {} was already gone: {}", game, e);
        }
        self.settle(&view, awards).await;
        info!(
            "Game {} forfeited by {}",
            game,
            view.player(loser).username
        );
        Ok(view)
    }

    async fn scoreboard(&self) -> Result<Flow, CommandError> {
        self.ensure_idle()?;
        let limit = self.context.config.scoreboard_size;
        let scores = self.context.store.top_scores(limit).await?;

        let mut text = format!("Top {} players:\n", limit);
        for (rank, (username, score)) in scores.iter().enumerate() {
            text.push_str(&format!("{}. {}: {} points\n", rank + 1, username, score));
        }
        self.session.send(&text);
        Ok(Flow::Continue)
    }

    fn help(&self) -> Result<Flow, CommandError> {
        self.ensure_idle()?;
        self.session.send(HELP_TEXT);
        Ok(Flow::Continue)
    }

    /// Cleanup for a dropped or quitting connection. Safe to run while the
    /// opponent is finishing the game through another path.
    async fn disconnect(&self) {
        if self.session.status() == Status::Queued {
            // Fails when a pairing got here first; the game is handled below
            if self.context.queue.cancel(&self.session).await.is_ok() {
                debug!("Session {} left the queue", self.session.id());
            }
        }

        if let Status::InGame { game, side } = self.session.status() {
            match self.forfeit(game, side).await {
                Ok(view) => {
                    view.player(side.opponent()).session.send(&format!(
                        "{} disconnected and forfeits the game. You win!",
                        view.player(side).username
                    ));
                }
                Err(_) => debug!(
                    "Game {} already over when session {} left",
                    game,
                    self.session.id()
                ),
            }
        }

        if let Some(username) = self.session.username() {
            if let Err(e) = self.context.store.logout(&username).await {
                error!("Failed to log out {}: {}", username, e);
            }
            self.session.set_username(None);
            info!("{} logged out on disconnect", username);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::persistence::{MemoryStore, PersistenceGateway};
    use shared::reversi::{Board, Cell, ReversiGame};

    struct Harness {
        context: Arc<ServerContext>,
        store: Arc<MemoryStore>,
    }

    struct TestClient {
        session: ClientSession,
        rx: mpsc::UnboundedReceiver<String>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let context = Arc::new(ServerContext::new(store.clone(), ServerConfig::default()));
            Self { context, store }
        }

        fn connect(&self, id: SessionId) -> TestClient {
            let (tx, rx) = mpsc::unbounded_channel();
            TestClient {
                session: ClientSession::new(id, tx, Arc::clone(&self.context)),
                rx,
            }
        }

        /// Registers and logs in a fresh client
        async fn player(&self, id: SessionId, name: &str) -> TestClient {
            let mut client = self.connect(id);
            client.send(&format!("register {} pw", name)).await;
            client.send(&format!("login {} pw", name)).await;
            client.drain();
            client
        }

        /// Two logged-in clients paired into a game, black first
        async fn paired(&self) -> (TestClient, TestClient, GameId) {
            let mut black = self.player(1, "alice").await;
            let mut white = self.player(2, "bob").await;
            black.send("play").await;
            white.send("play").await;
            black.drain();
            white.drain();
            let game = match black.status() {
                Status::InGame { game, .. } => game,
                other => panic!("expected a game, got {:?}", other),
            };
            (black, white, game)
        }

        /// Two logged-in clients put straight into a game on `rows`
        async fn staged(&self, rows: &[&str], turn: Side) -> (TestClient, TestClient, GameId) {
            let black = self.player(1, "alice").await;
            let white = self.player(2, "bob").await;
            let board = Board::from_rows(rows).unwrap();
            let game = self
                .context
                .games
                .create_from(
                    Player::new(Arc::clone(black.session.session()), "alice"),
                    Player::new(Arc::clone(white.session.session()), "bob"),
                    ReversiGame::from_position(board, turn),
                )
                .await;
            (black, white, game)
        }
    }

    impl TestClient {
        async fn send(&mut self, line: &str) -> Flow {
            self.session
                .handle_event(SessionEvent::Line(format!("{}\n", line)))
                .await
        }

        fn drain(&mut self) -> String {
            let mut out = String::new();
            while let Ok(message) = self.rx.try_recv() {
                out.push_str(&message);
            }
            out
        }

        fn status(&self) -> Status {
            self.session.session().status()
        }
    }

    #[tokio::test]
    async fn test_greeting() {
        let harness = Harness::new();
        let mut client = harness.connect(1);
        client.session.greet();
        assert!(client.drain().starts_with("Welcome to Reversi!"));
    }

    #[tokio::test]
    async fn test_register_twice() {
        let harness = Harness::new();
        let mut client = harness.connect(1);

        client.send("register alice secret").await;
        assert_eq!(client.drain(), "Registration successful for user alice.\n");

        client.send("register alice secret").await;
        assert_eq!(client.drain(), "User alice already exists.\n");
    }

    #[tokio::test]
    async fn test_login_from_two_connections() {
        let harness = Harness::new();
        let mut first = harness.connect(1);
        let mut second = harness.connect(2);

        first.send("register alice secret").await;
        first.send("login alice secret").await;
        assert!(first.drain().ends_with("Login successful! Welcome, alice.\n"));
        assert!(first.session.session().is_authenticated());

        second.send("login alice secret").await;
        assert_eq!(second.drain(), "User alice is already logged in!\n");
        assert!(!second.session.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_login_rejections() {
        let harness = Harness::new();
        let mut client = harness.connect(1);

        client.send("register alice secret").await;
        client.send("register bob secret").await;
        client.drain();

        client.send("login alice nope").await;
        assert_eq!(client.drain(), "Login failed! Check your credentials.\n");

        client.send("login alice secret").await;
        client.drain();
        client.send("login bob secret").await;
        assert_eq!(client.drain(), "You are already logged in with an account!\n");
    }

    #[tokio::test]
    async fn test_logout() {
        let harness = Harness::new();
        let mut client = harness.connect(1);

        client.send("logout").await;
        assert_eq!(client.drain(), "You are not logged in!\n");

        let mut client = harness.player(2, "alice").await;
        client.send("logout").await;
        assert_eq!(client.drain(), "Logout successful!\n");
        assert!(!harness.store.is_logged_in("alice"));
    }

    #[tokio::test]
    async fn test_play_requires_login() {
        let harness = Harness::new();
        let mut client = harness.connect(1);

        client.send("play").await;
        assert_eq!(client.drain(), "You must be logged in to play!\n");
        assert_eq!(client.status(), Status::Idle);
    }

    #[tokio::test]
    async fn test_pairing_notifies_both() {
        let harness = Harness::new();
        let mut alice = harness.player(1, "alice").await;
        let mut bob = harness.player(2, "bob").await;

        alice.send("play").await;
        assert_eq!(alice.drain(), "Waiting for an opponent...\n");
        assert_eq!(alice.status(), Status::Queued);

        alice.send("play").await;
        assert_eq!(alice.drain(), "You are already searching for a match!\n");

        bob.send("play").await;
        let to_alice = alice.drain();
        let to_bob = bob.drain();
        assert!(to_alice.starts_with("Game started against bob! You play black (B)."));
        assert!(to_bob.starts_with("Game started against alice! You play white (W)."));
        assert!(to_alice.contains("Current board:"));
        assert!(to_bob.ends_with("It's alice's turn.\n"));
        assert!(matches!(alice.status(), Status::InGame { side: Side::Black, .. }));
        assert!(matches!(bob.status(), Status::InGame { side: Side::White, .. }));
    }

    #[tokio::test]
    async fn test_move_while_queued_is_rejected() {
        let harness = Harness::new();
        let mut alice = harness.player(1, "alice").await;

        alice.send("play").await;
        alice.drain();
        alice.send("move 0 0").await;

        assert_eq!(alice.drain(), "You are not in an active game!\n");
        assert_eq!(alice.status(), Status::Queued);
        assert_eq!(harness.context.queue.len().await, 1);
        assert!(harness.context.games.is_empty().await);
    }

    #[tokio::test]
    async fn test_commands_blocked_while_queued() {
        let harness = Harness::new();
        let mut alice = harness.player(1, "alice").await;
        alice.send("play").await;
        alice.drain();

        for line in ["help", "scoreboard", "logout", "register x y", "login x y"] {
            alice.send(line).await;
            assert_eq!(
                alice.drain(),
                "You can't use this command while searching for a match! Use stop first.\n",
                "{}",
                line
            );
        }
        assert!(alice.session.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_stop() {
        let harness = Harness::new();
        let mut alice = harness.player(1, "alice").await;

        alice.send("stop").await;
        assert_eq!(
            alice.drain(),
            "You can only use stop while searching for a match!\n"
        );

        alice.send("play").await;
        alice.send("stop").await;
        assert!(alice.drain().ends_with("Stopped searching for a match.\n"));
        assert_eq!(alice.status(), Status::Idle);
        assert!(harness.context.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_opening_move_is_broadcast() {
        let harness = Harness::new();
        let (mut black, mut white, game) = harness.paired().await;

        black.send("move 2 3").await;

        let to_black = black.drain();
        assert!(to_black.starts_with("Move accepted! It's bob's turn."));
        assert_eq!(to_black, white.drain());
        let cell = harness
            .context
            .games
            .with_game(game, |g| g.board().get(3, 3))
            .await
            .unwrap();
        assert_eq!(cell, Some(Cell::Black));
    }

    #[tokio::test]
    async fn test_rule_violations_resend_board() {
        let harness = Harness::new();
        let (mut black, mut white, _) = harness.paired().await;

        white.send("move 2 4").await;
        let reply = white.drain();
        assert!(reply.starts_with("It is not your turn!\nCurrent board:"));

        black.send("move 0 0").await;
        let reply = black.drain();
        assert!(reply.starts_with("Invalid move at (0, 0)! Try again.\nCurrent board:"));
        assert!(white.drain().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_move_is_protocol_error() {
        let harness = Harness::new();
        let mut idle = harness.player(3, "carol").await;
        idle.send("move 9 0").await;
        assert!(idle.drain().starts_with("Invalid coordinate '9'"));

        let (mut black, _white, _) = harness.paired().await;
        black.send("move 9 0").await;
        let reply = black.drain();
        assert!(reply.starts_with("Invalid coordinate '9'"));
        assert!(reply.contains("Current board:"));
    }

    #[tokio::test]
    async fn test_commands_blocked_in_game() {
        let harness = Harness::new();
        let (mut black, _white, _) = harness.paired().await;

        black.send("scoreboard").await;
        let reply = black.drain();
        assert!(reply.starts_with("Finish your match first!\nCurrent board:"));

        black.send("dance").await;
        assert!(black.drain().starts_with("Unknown command: dance\nCurrent board:"));
    }

    #[tokio::test]
    async fn test_surrender() {
        let harness = Harness::new();
        let (mut black, mut white, game) = harness.paired().await;

        black.send("surrender").await;

        let expected = "alice surrendered the game. bob wins by forfeit.\n";
        assert_eq!(black.drain(), expected);
        assert_eq!(white.drain(), expected);
        assert_eq!(black.status(), Status::Idle);
        assert_eq!(white.status(), Status::Idle);
        assert!(!harness.context.games.contains(game).await);
        assert_eq!(harness.store.score("alice"), Some(1));
        assert_eq!(harness.store.score("bob"), Some(3));

        black.send("surrender").await;
        assert_eq!(black.drain(), "You are not in an active game!\n");
        assert_eq!(harness.store.score("bob"), Some(3));
    }

    #[tokio::test]
    async fn test_disconnect_mid_game_forfeits() {
        let harness = Harness::new();
        let (black, mut white, game) = harness.paired().await;

        let flow = black
            .session
            .handle_event(SessionEvent::Disconnected)
            .await;

        assert_eq!(flow, Flow::Close);
        assert_eq!(
            white.drain(),
            "alice disconnected and forfeits the game. You win!\n"
        );
        assert_eq!(harness.store.score("bob"), Some(3));
        assert_eq!(harness.store.score("alice"), Some(1));
        assert!(!harness.context.games.contains(game).await);
        assert_eq!(white.status(), Status::Idle);
        assert!(!harness.store.is_logged_in("alice"));
        assert!(harness.store.is_logged_in("bob"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let harness = Harness::new();
        let (black, white, _) = harness.paired().await;

        black.session.handle_event(SessionEvent::Disconnected).await;
        black.session.handle_event(SessionEvent::Disconnected).await;
        white.session.handle_event(SessionEvent::Disconnected).await;

        assert_eq!(harness.store.score("bob"), Some(3));
        assert_eq!(harness.store.score("alice"), Some(1));
        assert!(harness.context.games.is_empty().await);
    }

    #[tokio::test]
    async fn test_disconnect_while_queued_leaves_queue() {
        let harness = Harness::new();
        let mut alice = harness.player(1, "alice").await;
        let mut bob = harness.player(2, "bob").await;
        let mut carol = harness.player(3, "carol").await;

        alice.send("play").await;
        bob.send("play").await;
        // alice and bob are now playing; carol waits alone
        carol.send("play").await;
        carol.session.handle_event(SessionEvent::Disconnected).await;

        assert!(harness.context.queue.is_empty().await);
        assert!(!harness.store.is_logged_in("carol"));
        assert!(matches!(alice.status(), Status::InGame { .. }));
        alice.drain();
        bob.drain();
    }

    #[tokio::test]
    async fn test_quit_closes() {
        let harness = Harness::new();
        let mut client = harness.connect(1);

        assert_eq!(client.send("quit").await, Flow::Close);
        assert_eq!(client.drain(), "Goodbye!\n");
    }

    #[tokio::test]
    async fn test_help_and_scoreboard() {
        let harness = Harness::new();
        let mut client = harness.connect(1);

        client.send("help").await;
        assert_eq!(client.drain(), HELP_TEXT);

        harness.store.register("alice", "pw").unwrap();
        harness.store.register("bob", "pw").unwrap();
        harness.store.add_score("alice", 7).unwrap();
        harness.store.add_score("bob", 3).unwrap();

        client.send("scoreboard").await;
        assert_eq!(
            client.drain(),
            "Top 10 players:\n1. alice: 7 points\n2. bob: 3 points\n"
        );
    }

    #[tokio::test]
    async fn test_blank_and_oversized_lines() {
        let harness = Harness::new();
        let mut client = harness.connect(1);

        assert_eq!(client.send("   ").await, Flow::Continue);
        assert!(client.drain().is_empty());

        let long = "x".repeat(2000);
        client.send(&long).await;
        assert_eq!(client.drain(), "Command too long (2000 bytes)\n");
    }

    #[tokio::test]
    async fn test_full_game_awards_points_once() {
        let harness = Harness::new();
        let (mut black, mut white, game) = harness.paired().await;

        loop {
            let next = harness
                .context
                .games
                .with_game(game, |g| {
                    let side = g.turn();
                    (side, g.board().legal_moves(side)[0])
                })
                .await;
            let (side, (row, col)) = match next {
                Ok(next) => next,
                Err(_) => break,
            };
            let mover = match side {
                Side::Black => &mut black,
                Side::White => &mut white,
            };
            mover.send(&format!("move {} {}", row, col)).await;
        }

        assert!(black.drain().contains("Game over!"));
        assert!(white.drain().contains("Game over!"));
        assert_eq!(black.status(), Status::Idle);
        assert_eq!(white.status(), Status::Idle);
        assert!(harness.context.games.is_empty().await);

        let alice = harness.store.score("alice").unwrap();
        let bob = harness.store.score("bob").unwrap();
        assert_eq!(alice + bob, 4);
        assert!(alice >= 1 && bob >= 1);
    }

    #[tokio::test]
    async fn test_pass_is_announced_to_both_players() {
        let harness = Harness::new();
        let (mut black, mut white, game) = harness
            .staged(
                &[
                    "B W . . . . . .",
                    ". . . . . . . .",
                    ". . . . . . . .",
                    ". . . . . . . .",
                    ". . . . . . . .",
                    ". . . . . . . .",
                    ". . . . . . . .",
                    "B W . . . . . .",
                ],
                Side::Black,
            )
            .await;

        black.send("move 0 2").await;

        let to_black = black.drain();
        assert!(to_black.starts_with(
            "Move accepted! bob has no legal move and passes. It's alice's turn again.\n"
        ));
        assert!(to_black.contains("0 B B B . . . . ."));
        assert_eq!(to_black, white.drain());

        let turn = harness
            .context
            .games
            .with_game(game, |g| g.turn())
            .await
            .unwrap();
        assert_eq!(turn, Side::Black);
        assert!(matches!(white.status(), Status::InGame { side: Side::White, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disconnect_racing_final_move_settles_once() {
        for _ in 0..25 {
            let harness = Harness::new();
            let (black, white, game) = harness
                .staged(
                    &[
                        "B W . . . . . .",
                        ". . . . . . . .",
                        ". . . . . . . .",
                        ". . . . . . . .",
                        ". . . . . . . .",
                        ". . . . . . . .",
                        ". . . . . . . .",
                        ". . . . . . . .",
                    ],
                    Side::Black,
                )
                .await;
            let TestClient {
                session: mover,
                rx: _black_rx,
            } = black;
            let TestClient {
                session: leaver,
                rx: _white_rx,
            } = white;

            let finishing = tokio::spawn(async move {
                mover
                    .handle_event(SessionEvent::Line("move 0 2\n".to_string()))
                    .await;
                mover
            });
            let leaving = tokio::spawn(async move {
                leaver.handle_event(SessionEvent::Disconnected).await;
                leaver
            });
            let mover = finishing.await.unwrap();
            leaving.await.unwrap();

            // Either path wins; alice gets 3 and bob 1 exactly once
            assert_eq!(harness.store.score("alice"), Some(3));
            assert_eq!(harness.store.score("bob"), Some(1));
            assert!(!harness.context.games.contains(game).await);
            assert_eq!(mover.session().status(), Status::Idle);
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported_generically() {
        let path = std::env::temp_dir()
            .join(format!("reversi-session-missing-{}", std::process::id()))
            .join("users.db");
        let store = Arc::new(crate::persistence::FileStore::open(&path).unwrap());
        let context = Arc::new(ServerContext::new(store, ServerConfig::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = ClientSession::new(1, tx, context);

        for _ in 0..2 {
            session
                .handle_event(SessionEvent::Line("register alice pw\n".to_string()))
                .await;
            assert_eq!(
                rx.try_recv().unwrap(),
                "Server error, please try again later.\n"
            );
        }
        assert!(!session.session().is_authenticated());
    }
}
