//! Account and score storage
//!
//! The server only talks to storage through [`PersistenceGateway`]. Two
//! implementations are provided: [`MemoryStore`] keeps everything in process
//! memory and [`FileStore`] mirrors the same table into a bincode file after
//! every mutation. Sessions reach either one through [`AccountStore`], which
//! moves each call onto tokio's blocking pool.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::{self, JoinError};

/// Storage failures. Surfaced to clients as a generic error.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("storage encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Ok,
    AlreadyLoggedIn,
    InvalidCredentials,
}

/// Account and score store consulted by client sessions
pub trait PersistenceGateway: Send + Sync {
    fn register(&self, username: &str, password: &str) -> Result<Registration, PersistenceError>;

    /// Checks credentials and marks the account logged in on success
    fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, PersistenceError>;

    fn logout(&self, username: &str) -> Result<(), PersistenceError>;

    /// Adds `delta` to the account's score. Unknown accounts are ignored.
    fn add_score(&self, username: &str, delta: i64) -> Result<(), PersistenceError>;

    /// Highest scores first, ties broken by username
    fn top_scores(&self, limit: usize) -> Result<Vec<(String, i64)>, PersistenceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
    pub logged_in: bool,
    pub score: i64,
}

/// The account table both stores operate on
#[derive(Debug, Clone, Default)]
struct AccountTable {
    accounts: HashMap<String, Account>,
}

impl AccountTable {
    fn register(&mut self, username: &str, password: &str) -> Registration {
        if self.accounts.contains_key(username) {
            return Registration::AlreadyExists;
        }
        self.accounts.insert(
            username.to_string(),
            Account {
                username: username.to_string(),
                password: password.to_string(),
                logged_in: false,
                score: 0,
            },
        );
        Registration::Created
    }

    fn login(&mut self, username: &str, password: &str) -> LoginOutcome {
        match self.accounts.get_mut(username) {
            Some(account) if account.password == password => {
                if account.logged_in {
                    LoginOutcome::AlreadyLoggedIn
                } else {
                    account.logged_in = true;
                    LoginOutcome::Ok
                }
            }
            _ => LoginOutcome::InvalidCredentials,
        }
    }

    fn logout(&mut self, username: &str) {
        if let Some(account) = self.accounts.get_mut(username) {
            account.logged_in = false;
        }
    }

    fn add_score(&mut self, username: &str, delta: i64) -> bool {
        match self.accounts.get_mut(username) {
            Some(account) => {
                account.score += delta;
                true
            }
            None => false,
        }
    }

    fn top_scores(&self, limit: usize) -> Vec<(String, i64)> {
        let mut scores: Vec<(String, i64)> = self
            .accounts
            .values()
            .map(|account| (account.username.clone(), account.score))
            .collect();
        scores.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scores.truncate(limit);
        scores
    }

    fn snapshot(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        accounts
    }
}

fn lock(table: &Mutex<AccountTable>) -> MutexGuard<'_, AccountTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Non-persistent store, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<AccountTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current score of an account, if it exists
    pub fn score(&self, username: &str) -> Option<i64> {
        lock(&self.table).accounts.get(username).map(|a| a.score)
    }

    pub fn is_logged_in(&self, username: &str) -> bool {
        lock(&self.table)
            .accounts
            .get(username)
            .is_some_and(|a| a.logged_in)
    }
}

impl PersistenceGateway for MemoryStore {
    fn register(&self, username: &str, password: &str) -> Result<Registration, PersistenceError> {
        Ok(lock(&self.table).register(username, password))
    }

    fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, PersistenceError> {
        Ok(lock(&self.table).login(username, password))
    }

    fn logout(&self, username: &str) -> Result<(), PersistenceError> {
        lock(&self.table).logout(username);
        Ok(())
    }

    fn add_score(&self, username: &str, delta: i64) -> Result<(), PersistenceError> {
        if !lock(&self.table).add_score(username, delta) {
            warn!("Score update for unknown account {}", username);
        }
        Ok(())
    }

    fn top_scores(&self, limit: usize) -> Result<Vec<(String, i64)>, PersistenceError> {
        Ok(lock(&self.table).top_scores(limit))
    }
}

/// Store backed by a single bincode-encoded file
///
/// The whole table is rewritten through a temporary file and a rename after
/// each mutation, while the table lock is held so writes never interleave.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    table: Mutex<AccountTable>,
}

impl FileStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// Every account is marked logged out on load since no session survives
    /// a restart.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let mut table = AccountTable::default();

        match fs::read(&path) {
            Ok(bytes) => {
                let accounts: Vec<Account> = bincode::deserialize(&bytes)?;
                for mut account in accounts {
                    account.logged_in = false;
                    table.accounts.insert(account.username.clone(), account);
                }
                info!("Loaded {} accounts from {}", table.accounts.len(), path.display());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No account store at {}, starting empty", path.display());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `change` to a copy of the table. The copy replaces the table
    /// only if it was saved, so a failed write leaves no trace in memory.
    /// `change` reports its outcome and whether anything needs saving.
    fn update<T>(&self, change: impl FnOnce(&mut AccountTable) -> (T, bool)) -> Result<T, PersistenceError> {
        let mut table = lock(&self.table);
        let mut next = table.clone();
        let (outcome, changed) = change(&mut next);
        if changed {
            self.save(&next)?;
            *table = next;
        }
        Ok(outcome)
    }

    fn save(&self, table: &AccountTable) -> Result<(), PersistenceError> {
        let bytes = bincode::serialize(&table.snapshot())?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistenceGateway for FileStore {
    fn register(&self, username: &str, password: &str) -> Result<Registration, PersistenceError> {
        self.update(|table| {
            let outcome = table.register(username, password);
            (outcome, outcome == Registration::Created)
        })
    }

    fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, PersistenceError> {
        self.update(|table| {
            let outcome = table.login(username, password);
            (outcome, outcome == LoginOutcome::Ok)
        })
    }

    fn logout(&self, username: &str) -> Result<(), PersistenceError> {
        self.update(|table| {
            table.logout(username);
            ((), true)
        })
    }

    fn add_score(&self, username: &str, delta: i64) -> Result<(), PersistenceError> {
        let found = self.update(|table| {
            let found = table.add_score(username, delta);
            (found, found)
        })?;
        if !found {
            warn!("Score update for unknown account {}", username);
        }
        Ok(())
    }

    fn top_scores(&self, limit: usize) -> Result<Vec<(String, i64)>, PersistenceError> {
        Ok(lock(&self.table).top_scores(limit))
    }
}

/// Async front for a [`PersistenceGateway`]
///
/// Gateway calls may block on disk I/O, so each one runs on the blocking
/// thread pool rather than on a runtime worker.
#[derive(Clone)]
pub struct AccountStore {
    gateway: Arc<dyn PersistenceGateway>,
}

impl AccountStore {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }

    async fn run<T, F>(&self, call: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PersistenceGateway) -> Result<T, PersistenceError> + Send + 'static,
    {
        let gateway = Arc::clone(&self.gateway);
        task::spawn_blocking(move || call(gateway.as_ref())).await?
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<Registration, PersistenceError> {
        let (username, password) = (username.to_string(), password.to_string());
        self.run(move |store| store.register(&username, &password))
            .await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, PersistenceError> {
        let (username, password) = (username.to_string(), password.to_string());
        self.run(move |store| store.login(&username, &password)).await
    }

    pub async fn logout(&self, username: &str) -> Result<(), PersistenceError> {
        let username = username.to_string();
        self.run(move |store| store.logout(&username)).await
    }

    pub async fn add_score(&self, username: &str, delta: i64) -> Result<(), PersistenceError> {
        let username = username.to_string();
        self.run(move |store| store.add_score(&username, delta))
            .await
    }

    pub async fn top_scores(&self, limit: usize) -> Result<Vec<(String, i64)>, PersistenceError> {
        self.run(move |store| store.top_scores(limit)).await
    }
}
