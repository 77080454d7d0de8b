//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: snapshots and misalignments
    r#"
    -- ============================================
    -- Parsed sessions
    -- ============================================

    CREATE TABLE IF NOT EXISTS session_snapshots (
        session_id       TEXT PRIMARY KEY,
        origin           TEXT,
        source_path      TEXT,

        -- SessionMeta without instructions
        meta             JSON,
        events           JSON NOT NULL,
        flattened_text   TEXT,

        event_count      INTEGER NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    -- ============================================
    -- Detected rule violations (never deleted)
    -- ============================================

    CREATE TABLE IF NOT EXISTS misalignments (
        id               TEXT PRIMARY KEY,
        session_id       TEXT NOT NULL,
        rule_id          TEXT NOT NULL,
        title            TEXT NOT NULL,
        summary          TEXT NOT NULL,
        severity         TEXT NOT NULL,
        status           TEXT NOT NULL DEFAULT 'new',
        event_range      JSON,
        evidence         JSON NOT NULL,
        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_misalignments_session ON misalignments(session_id);
    CREATE INDEX IF NOT EXISTS idx_misalignments_status ON misalignments(status);
    "#,
    // Version 2: chat history
    r#"
    CREATE TABLE IF NOT EXISTS chat_messages (
        seq              INTEGER PRIMARY KEY AUTOINCREMENT,
        id               TEXT NOT NULL UNIQUE,
        session_id       TEXT NOT NULL,
        role             TEXT NOT NULL,
        content          TEXT NOT NULL,
        created_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, seq);
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

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
