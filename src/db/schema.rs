//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Ordered migrations; index + 1 is the schema version each one produces
const MIGRATIONS: &[&str] = &[
    // v1: provider keys
    "CREATE TABLE IF NOT EXISTS provider_keys (
        provider TEXT PRIMARY KEY,
        api_key TEXT NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );",
];

/// Current schema version
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring the schema up to [`SCHEMA_VERSION`]
///
/// Each pending migration runs in its own transaction together with the
/// `user_version` bump.
///
/// # Errors
///
/// Returns error if a migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (version, sql) in (1..).zip(MIGRATIONS) {
        if version <= current {
            continue;
        }
        conn.execute_batch(&format!(
            "BEGIN; {sql} PRAGMA user_version = {version}; COMMIT;"
        ))?;
        tracing::debug!(version, "applied migration");
    }

    Ok(())
}
