//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: cursor and request log
    r#"
    -- Last frame confirmed fully processed. At most one row.
    CREATE TABLE IF NOT EXISTS processing_cursor (
        id               INTEGER PRIMARY KEY CHECK (id = 1),
        frame            JSON NOT NULL,
        frame_end        DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS request_log (
        id               TEXT PRIMARY KEY,
        kind             TEXT NOT NULL,
        start_time       DATETIME NOT NULL,
        end_time         DATETIME NOT NULL,
        recording_count  INTEGER NOT NULL,
        downloaded_count INTEGER NOT NULL,
        merge_status     INTEGER,
        handled_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_request_log_handled ON request_log(handled_at);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
