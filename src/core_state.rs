//! Shared application state.
//!
//! Built once at startup and wrapped in `Arc`; the HTTP routes and the
//! socket handlers all borrow the same instance.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::accounts;
use crate::alerts::AlertDispatcher;
use crate::config::{AppConfig, DEFAULT_SESSION_TTL_HOURS, DEFAULT_WS_QUEUE_CAPACITY};
use crate::db;
use crate::realtime::RoomHub;

pub struct CoreState {
    /// Single SQLite connection. Never hold the guard across an `.await`.
    db: Mutex<Connection>,
    hub: Arc<RoomHub>,
    dispatcher: AlertDispatcher,
    pub session_ttl: chrono::Duration,
    pub ws_queue_capacity: usize,
    /// PBKDF2 rounds for new and checked passwords.
    pub password_iterations: u32,
}

impl CoreState {
    pub fn new(conn: Connection, session_ttl: chrono::Duration, ws_queue_capacity: usize) -> Self {
        let hub = Arc::new(RoomHub::new());
        Self {
            db: Mutex::new(conn),
            dispatcher: AlertDispatcher::new(hub.clone()),
            hub,
            session_ttl,
            ws_queue_capacity,
            password_iterations: accounts::PBKDF2_ITERATIONS,
        }
    }

    /// Open (and migrate) the configured database.
    pub fn open(config: &AppConfig) -> Result<Self, CoreError> {
        let conn = db::open_database(&config.db_path)?;
        tracing::info!(path = %config.db_path.display(), "Database ready");
        Ok(Self::new(conn, config.session_ttl, config.ws_queue_capacity))
    }

    /// Fresh in-memory state with default settings.
    pub fn in_memory() -> Result<Self, CoreError> {
        Ok(Self::new(
            db::open_memory_database()?,
            chrono::Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            DEFAULT_WS_QUEUE_CAPACITY,
        ))
    }

    /// Lock the database connection.
    pub fn db(&self) -> Result<MutexGuard<'_, Connection>, CoreError> {
        self.db.lock().map_err(|_| CoreError::LockPoisoned)
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }
}

/// Errors from CoreState operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
}
