//! Database repository layer
//!
//! Provides query and insert operations for snapshots, misalignments and
//! chat history.

use crate::detect::rank_records;
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Stored snapshot listing entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    pub session_id: String,
    pub origin: Option<SessionOrigin>,
    pub source_path: Option<String>,
    pub event_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        super::schema::run_migrations(&self.conn())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Snapshot operations
    // ============================================

    /// Insert or replace the stored snapshot of a session.
    ///
    /// Session instructions are never written.
    pub fn upsert_snapshot(&self, snapshot: &SessionSnapshot, source_path: Option<&Path>) -> Result<()> {
        let meta = snapshot
            .meta
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let events = serde_json::to_string(&snapshot.events)?;
        let origin = snapshot
            .meta
            .as_ref()
            .and_then(|m| m.origin)
            .map(|o| o.as_str());

        self.conn().execute(
            r#"
            INSERT INTO session_snapshots
                (session_id, origin, source_path, meta, events, flattened_text, event_count, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(session_id) DO UPDATE SET
                origin = excluded.origin,
                source_path = excluded.source_path,
                meta = excluded.meta,
                events = excluded.events,
                flattened_text = excluded.flattened_text,
                event_count = excluded.event_count,
                updated_at = excluded.updated_at
            "#,
            params![
                snapshot.session_id,
                origin,
                source_path.map(|p| p.to_string_lossy().to_string()),
                meta,
                events,
                snapshot.flattened_text,
                snapshot.events.len() as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tracing::debug!(session = %snapshot.session_id, events = snapshot.events.len(), "Stored snapshot");
        Ok(())
    }

    /// Get a stored snapshot by session ID
    pub fn get_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT session_id, meta, events, flattened_text FROM session_snapshots WHERE session_id = ?1",
                [session_id],
                |row| {
                    Ok((
                        row.get::<_, String>("session_id")?,
                        row.get::<_, Option<String>>("meta")?,
                        row.get::<_, String>("events")?,
                        row.get::<_, Option<String>>("flattened_text")?,
                    ))
                },
            )
            .optional()?;

        let Some((session_id, meta, events, flattened_text)) = row else {
            return Ok(None);
        };
        Ok(Some(SessionSnapshot {
            session_id,
            meta: meta.map(|m| serde_json::from_str(&m)).transpose()?,
            events: serde_json::from_str(&events)?,
            flattened_text,
        }))
    }

    /// Like [`get_snapshot`](Self::get_snapshot), failing when the session was never stored
    pub fn require_snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        self.get_snapshot(session_id)?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// List stored snapshots, most recently updated first
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, origin, source_path, event_count, updated_at
            FROM session_snapshots
            ORDER BY updated_at DESC, session_id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let origin: Option<String> = row.get("origin")?;
            Ok(SnapshotSummary {
                session_id: row.get("session_id")?,
                origin: origin.and_then(|o| o.parse().ok()),
                source_path: row.get("source_path")?,
                event_count: row.get("event_count")?,
                updated_at: parse_timestamp(&row.get::<_, String>("updated_at")?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ============================================
    // Misalignment operations
    // ============================================

    /// Store freshly detected records.
    ///
    /// A record already stored keeps its status and `created_at`; its
    /// content and `updated_at` are refreshed. Nothing is ever deleted.
    pub fn upsert_misalignments(&self, records: &[MisalignmentRecord]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO misalignments
                    (id, session_id, rule_id, title, summary, severity, status,
                     event_range, evidence, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(id) DO UPDATE SET
                    rule_id = excluded.rule_id,
                    title = excluded.title,
                    summary = excluded.summary,
                    severity = excluded.severity,
                    event_range = excluded.event_range,
                    evidence = excluded.evidence,
                    updated_at = excluded.updated_at
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    record.id,
                    record.session_id,
                    record.rule_id,
                    record.title,
                    record.summary,
                    record.severity.as_str(),
                    record.status.as_str(),
                    record
                        .event_range
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    serde_json::to_string(&record.evidence)?,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(count = records.len(), "Stored misalignments");
        Ok(())
    }

    /// Records of a session in display order
    pub fn list_misalignments(&self, session_id: &str) -> Result<Vec<MisalignmentRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM misalignments WHERE session_id = ?1 ORDER BY created_at, id",
        )?;
        let mut records = stmt
            .query_map([session_id], Self::row_to_misalignment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rank_records(&mut records);
        Ok(records)
    }

    /// Get a misalignment by ID
    pub fn get_misalignment(&self, id: &str) -> Result<Option<MisalignmentRecord>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT * FROM misalignments WHERE id = ?1",
                [id],
                Self::row_to_misalignment,
            )
            .optional()?)
    }

    /// Move a record to `next`, enforcing the status transition table.
    pub fn update_misalignment_status(
        &self,
        id: &str,
        next: MisalignmentStatus,
        at: DateTime<Utc>,
    ) -> Result<MisalignmentRecord> {
        let mut record = self
            .get_misalignment(id)?
            .ok_or_else(|| Error::MisalignmentNotFound(id.to_string()))?;
        let previous = record.status;
        record.transition(next, at)?;

        self.conn().execute(
            "UPDATE misalignments SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![record.status.as_str(), record.updated_at.to_rfc3339(), id],
        )?;
        tracing::info!(id, from = %previous, to = %next, "Misalignment status changed");
        Ok(record)
    }

    fn row_to_misalignment(row: &Row) -> rusqlite::Result<MisalignmentRecord> {
        let event_range: Option<String> = row.get("event_range")?;
        let evidence: String = row.get("evidence")?;

        Ok(MisalignmentRecord {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            rule_id: row.get("rule_id")?,
            title: row.get("title")?,
            summary: row.get("summary")?,
            severity: parse_column(row, "severity")?,
            status: parse_column(row, "status")?,
            event_range: event_range
                .map(|r| serde_json::from_str(&r))
                .transpose()
                .map_err(|e| conversion_error(row, "event_range", e))?,
            evidence: serde_json::from_str(&evidence)
                .map_err(|e| conversion_error(row, "evidence", e))?,
            created_at: parse_timestamp(&row.get::<_, String>("created_at")?),
            updated_at: parse_timestamp(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Chat history operations
    // ============================================

    /// Append one chat turn
    pub fn append_chat_message(&self, message: &ChatMessage) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO chat_messages (id, session_id, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                message.id,
                message.session_id,
                message.role.as_str(),
                message.content,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Chat turns of a session in the order they were appended
    pub fn list_chat_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, created_at FROM chat_messages WHERE session_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map([session_id], |row| {
            let role: String = row.get("role")?;
            Ok(ChatMessage {
                id: row.get("id")?,
                session_id: row.get("session_id")?,
                role: match role.as_str() {
                    "system" => ChatRole::System,
                    "assistant" => ChatRole::Assistant,
                    _ => ChatRole::User,
                },
                content: row.get("content")?,
                created_at: parse_timestamp(&row.get::<_, String>("created_at")?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn conversion_error<E>(row: &Row, column: &str, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let index = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn parse_column<T>(row: &Row, column: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = Error>,
{
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e| conversion_error(row, column, e))
}
