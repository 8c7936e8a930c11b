//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use crate::error::{Error, Result};
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: host tables
    r#"
    -- ============================================
    -- Forms and submissions (reference host)
    -- ============================================

    CREATE TABLE IF NOT EXISTS forms (
        id          INTEGER PRIMARY KEY,
        handle      TEXT NOT NULL UNIQUE,
        title       TEXT NOT NULL,
        created_at  DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS form_fields (
        form_id     INTEGER NOT NULL REFERENCES forms(id) ON DELETE CASCADE,
        position    INTEGER NOT NULL,
        handle      TEXT NOT NULL,
        label       TEXT NOT NULL,
        kind        TEXT NOT NULL,
        -- Resolved FieldCapability, rating config included
        capability  JSON NOT NULL,
        PRIMARY KEY (form_id, handle)
    );

    CREATE TABLE IF NOT EXISTS submissions (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        form_id     INTEGER NOT NULL REFERENCES forms(id) ON DELETE CASCADE,
        created_at  DATETIME NOT NULL,
        field_values JSON NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_submissions_form_created
        ON submissions(form_id, created_at);
    "#,
    // Version 2: job queue
    r#"
    -- ============================================
    -- Cache regeneration queue
    -- ============================================

    CREATE TABLE IF NOT EXISTS queue_jobs (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        kind            TEXT NOT NULL,           -- master | batch
        job             JSON NOT NULL,
        status          TEXT NOT NULL DEFAULT 'waiting',
        available_at    DATETIME NOT NULL,
        reserved_at     DATETIME,
        attempts        INTEGER NOT NULL DEFAULT 0,
        progress        REAL NOT NULL DEFAULT 0,
        progress_label  TEXT,
        error           TEXT,
        created_at      DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_queue_jobs_status_available
        ON queue_jobs(status, available_at);
    "#,
];

/// Apply every migration newer than the stored `user_version`.
///
/// Each migration commits together with its version bump, so a failure
/// leaves the database at the last complete version.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let from = get_schema_version(conn)?;
    if from > SCHEMA_VERSION {
        return Err(Error::Config(format!(
            "database schema version {} is newer than supported version {}",
            from, SCHEMA_VERSION
        )));
    }

    for (version, sql) in (1..).zip(MIGRATIONS.iter()).skip(from as usize) {
        tracing::info!(version, "Applying schema migration");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    if from < SCHEMA_VERSION {
        tracing::info!(from, to = SCHEMA_VERSION, "Database schema up to date");
    }
    Ok(())
}

/// Schema version stored in `PRAGMA user_version` (0 for a new database)
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |r| r.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["forms", "form_fields", "submissions", "queue_jobs"] {
            let count: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_rejects_newer_schema() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
