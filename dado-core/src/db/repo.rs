//! Database repository layer
//!
//! Cursor persistence and the request log.

use crate::error::Result;
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

use super::cursor::CursorStore;

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
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
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Processing cursor
    // ============================================

    /// When the cursor was last written
    pub fn cursor_updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let updated: Option<String> = conn
            .query_row(
                "SELECT updated_at FROM processing_cursor WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(updated.and_then(|s| parse_datetime(&s)))
    }

    // ============================================
    // Request log
    // ============================================

    /// Record a handled request
    pub fn log_request(&self, entry: &RequestLogEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO request_log (id, kind, start_time, end_time, recording_count,
                                     downloaded_count, merge_status, handled_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                entry.id,
                entry.kind.as_str(),
                entry.start_time.to_rfc3339(),
                entry.end_time.to_rfc3339(),
                entry.recording_count as i64,
                entry.downloaded_count as i64,
                entry.merge_status,
                entry.handled_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recently handled requests, newest first
    pub fn recent_requests(&self, limit: usize) -> Result<Vec<RequestLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM request_log
            ORDER BY handled_at DESC, start_time DESC
            LIMIT ?
            "#,
        )?;

        let entries = stmt
            .query_map([limit as i64], Self::row_to_request_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Total number of logged requests
    pub fn request_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM request_log", [], |r| r.get(0))?;
        Ok(count)
    }

    fn row_to_request_log(row: &Row) -> rusqlite::Result<RequestLogEntry> {
        let kind_str: String = row.get("kind")?;
        let start_str: String = row.get("start_time")?;
        let end_str: String = row.get("end_time")?;
        let handled_str: String = row.get("handled_at")?;
        let recording_count: i64 = row.get("recording_count")?;
        let downloaded_count: i64 = row.get("downloaded_count")?;

        Ok(RequestLogEntry {
            id: row.get("id")?,
            kind: kind_str.parse().unwrap_or(RequestKind::Motion),
            start_time: parse_datetime(&start_str).unwrap_or_else(Utc::now),
            end_time: parse_datetime(&end_str).unwrap_or_else(Utc::now),
            recording_count: recording_count.max(0) as usize,
            downloaded_count: downloaded_count.max(0) as usize,
            merge_status: row.get("merge_status")?,
            handled_at: parse_datetime(&handled_str).unwrap_or_else(Utc::now),
        })
    }
}

impl CursorStore for Database {
    fn load_cursor(&self) -> Result<Option<ProcessingCursor>> {
        let conn = self.conn.lock().unwrap();
        let frame: Option<String> = conn
            .query_row(
                "SELECT frame FROM processing_cursor WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match frame {
            Some(json) => {
                let frame: FrameItem = serde_json::from_str(&json)?;
                Ok(Some(ProcessingCursor::new(frame)))
            }
            None => Ok(None),
        }
    }

    fn save_cursor(&self, cursor: &ProcessingCursor) -> Result<()> {
        let frame = serde_json::to_string(&cursor.frame)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO processing_cursor (id, frame, frame_end, updated_at)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                frame = excluded.frame,
                frame_end = excluded.frame_end,
                updated_at = excluded.updated_at
            "#,
            params![frame, cursor.end_time().to_rfc3339(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear_cursor(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM processing_cursor", [])?;
        Ok(removed > 0)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
