//! Database module for conversation and reminder persistence

pub mod conversation;
pub mod reminder;
mod schema;

use std::path::{Path, PathBuf};

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{Error, Result};

pub use conversation::{ConversationMessage, ConversationStore, MessageRole};
pub use reminder::{Reminder, ReminderRepo, ReminderStatus};
pub use schema::SCHEMA_VERSION;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Initialize the database
///
/// A file that fails the integrity check or cannot be migrated is moved
/// aside to `<name>.corrupt-<timestamp>` and a fresh database is created.
///
/// # Errors
///
/// Returns error if a fresh database cannot be created either
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path = path.as_ref();

    match open(path) {
        Ok(pool) => Ok(pool),
        Err(e) if path.exists() => {
            let aside = quarantine(path)?;
            tracing::warn!(
                error = %e,
                moved_to = %aside.display(),
                "database unusable, rebuilding empty"
            );
            open(path)
        }
        Err(e) => Err(e),
    }
}

/// Initialize an in-memory database (for testing)
///
/// # Errors
///
/// Returns error if database cannot be initialized
pub fn init_memory() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    Ok(pool)
}

fn open(path: &Path) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;

    let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if check != "ok" {
        return Err(Error::Database(format!("integrity check failed: {check}")));
    }

    schema::init(&conn)?;

    tracing::info!(version = SCHEMA_VERSION, path = %path.display(), "database initialized");
    Ok(pool)
}

/// Move a broken database (and its journal files) out of the way
fn quarantine(path: &Path) -> Result<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(".corrupt-{stamp}"));
    let aside = PathBuf::from(aside);

    std::fs::rename(path, &aside)?;
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            std::fs::remove_file(&side).ok();
        }
    }

    Ok(aside)
}
