//! Local database for persisted provider credentials
//!
//! The file holds API keys, so on unix it is restricted to the owner.

mod schema;

use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{Error, Result};

pub use schema::SCHEMA_VERSION;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// How long a connection waits on a lock held by another process
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn pool_error(e: impl std::fmt::Display) -> Error {
    Error::Database(e.to_string())
}

/// Build a pool and bring its schema up to date
fn open(manager: SqliteConnectionManager, max_size: u32) -> Result<DbPool> {
    let manager = manager.with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
    let pool = Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(pool_error)?;

    let conn = pool.get().map_err(pool_error)?;
    schema::init(&conn)?;
    Ok(pool)
}

/// Open (or create) the database at `path`
///
/// # Errors
///
/// Returns error if the directory cannot be created or the database cannot
/// be opened or migrated
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = open(SqliteConnectionManager::file(path), 4)?;
    restrict_permissions(path)?;

    tracing::debug!(path = %path.display(), version = SCHEMA_VERSION, "database ready");
    Ok(pool)
}

/// Open an in-memory database
///
/// Limited to one connection, since every in-memory connection is its own
/// database.
///
/// # Errors
///
/// Returns error if the schema cannot be created
pub fn init_memory() -> Result<DbPool> {
    open(SqliteConnectionManager::memory(), 1)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_database_has_key_table() {
        let pool = init_memory().unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM provider_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("voice.db");
        drop(init(&path).unwrap());
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn file_database_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.db");
        drop(init(&path).unwrap());

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
