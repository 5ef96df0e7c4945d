//! SQLite connection bootstrap and the shared default handle.
//!
//! # Responsibility
//! - Open and configure SQLite connections for repositories.
//! - Share one connection between repositories as the default handle.
//! - Run closures inside a transaction on that handle.
//!
//! # Invariants
//! - Every connection handed out has `foreign_keys=ON` and a busy timeout.
//! - A default-handle call holds the connection for its whole duration.
//!
//! # See also
//! - `repo::Repository` `_tx` forms for transaction-scoped calls.

use log::{debug, warn};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Driver name used when mapping SQLite failures.
pub const SQLITE_DRIVER: &str = "sqlite";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Cloneable default handle shared by repositories.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    driver: &'static str,
}

impl Database {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        open_db(path).map(Self::from_connection)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        open_db_in_memory().map(Self::from_connection)
    }

    /// Wraps an already configured connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            driver: SQLITE_DRIVER,
        }
    }

    pub fn driver(&self) -> &'static str {
        self.driver
    }

    /// Runs `f` with exclusive access to the shared connection.
    ///
    /// Must not be called from inside `run_in_tx` on the same handle.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Executes a batch of statements, e.g. schema setup in tests.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.with_connection(|conn| conn.execute_batch(sql))?;
        Ok(())
    }

    /// Runs `f` in a transaction; commits on `Ok`, rolls back on `Err`.
    ///
    /// # Errors
    /// - Failures to begin or commit are converted through `E::from`.
    pub fn run_in_tx<R, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<R, E>) -> Result<R, E>
    where
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                debug!("event=db_tx module=db status=commit");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    warn!("event=db_tx module=db status=rollback_failed error={rollback}");
                } else {
                    debug!("event=db_tx module=db status=rollback");
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("driver", &self.driver)
            .finish_non_exhaustive()
    }
}
