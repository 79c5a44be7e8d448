//! # SQLite Storage Repository
//!
//! The durable [`StorageRepository`] implementation, backed by a single
//! SQLite connection in WAL mode.
//!
//! The connection lives behind an async mutex: SQLite statements here are
//! short (point lookups, bounded range scans, small transactional batches),
//! so a brief synchronous section under the lock is the pragmatic trade -
//! the same one a single-writer SQLite event store makes.
//!
//! The conditional fast-path write runs as one SQLite transaction, which is
//! the "storage layer's transactional primitive" the appender relies on: the
//! head check and the event inserts commit or disappear together.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::schema::Database;
use crate::storage::StorageRepository;
use crate::types::{Event, PendingHead, Position, RangeKey, RecordedEvent, StreamKey};

/// A [`StorageRepository`] over a SQLite database.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens (creating if needed) a database file and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    /// Creates an in-memory instance (tests, throwaway embedding).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    /// Wraps an already-initialized [`Database`].
    pub fn from_database(db: Database) -> Self {
        Self {
            conn: Mutex::new(db.into_connection()),
        }
    }
}

/// `(head, pending)` for one stream; `(NONE, None)` when the row is missing.
fn read_meta(conn: &Connection, key: &StreamKey) -> Result<(Position, Option<PendingHead>)> {
    let row: Option<(i64, Option<i64>, Option<i64>)> = conn
        .query_row(
            "SELECT head, pending_original, pending_target FROM streams WHERE stream_key = ?",
            [key.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    match row {
        None => Ok((Position::NONE, None)),
        Some((head, Some(original), Some(target))) => Ok((
            Position::from_raw(head),
            Some(PendingHead {
                original: Position::from_raw(original),
                target: Position::from_raw(target),
            }),
        )),
        Some((head, _, _)) => Ok((Position::from_raw(head), None)),
    }
}

fn insert_event(
    conn: &Connection,
    key: &StreamKey,
    position: Position,
    event: &Event,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO events \
         (stream_key, position, event_id, source, event_type, data_content_type, data, time_ms) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            key.to_string(),
            position.as_raw(),
            event.id,
            event.source,
            event.event_type,
            event.data_content_type,
            event.data,
            event.time_ms.map(|t| t as i64),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl StorageRepository for SqliteStorage {
    async fn get_head_document(&self, key: &StreamKey) -> Result<Option<Position>> {
        let conn = self.conn.lock().await;
        let row: Option<(i64, Option<i64>)> = conn
            .query_row(
                "SELECT head, pending_original FROM streams WHERE stream_key = ?",
                [key.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((_, Some(_))) => None, // pending marker masks the head view
            Some((head, None)) => Some(Position::from_raw(head)),
            None => None,
        })
    }

    async fn get_pending_head_document(&self, key: &StreamKey) -> Result<Option<PendingHead>> {
        let conn = self.conn.lock().await;
        let (_, pending) = read_meta(&conn, key)?;
        Ok(pending)
    }

    async fn execute_conditional_batch(
        &self,
        key: &StreamKey,
        events: &[Event],
        expected_head: Position,
        new_head: Position,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let (head, pending) = read_meta(&tx, key)?;
        if pending.is_some() || head != expected_head {
            return Err(Error::Conflict {
                stream: key.to_string(),
                expected: expected_head.as_raw(),
                actual: head.as_raw(),
            });
        }

        for (offset, event) in events.iter().enumerate() {
            insert_event(&tx, key, expected_head.add(offset as i64 + 1), event)?;
        }
        tx.execute(
            "INSERT INTO streams (stream_key, head) VALUES (?, ?) \
             ON CONFLICT (stream_key) DO UPDATE SET head = excluded.head",
            params![key.to_string(), new_head.as_raw()],
        )?;

        tx.commit()?;
        Ok(())
    }

    async fn create_pending_head(
        &self,
        key: &StreamKey,
        original: Position,
        target: Position,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO streams (stream_key, head, pending_original, pending_target) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (stream_key) DO UPDATE SET \
               pending_original = excluded.pending_original, \
               pending_target = excluded.pending_target",
            params![
                key.to_string(),
                original.as_raw(),
                original.as_raw(),
                target.as_raw()
            ],
        )?;
        Ok(())
    }

    async fn append_event_batch(
        &self,
        key: &StreamKey,
        events: &[Event],
        start_position: Position,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for (offset, event) in events.iter().enumerate() {
            insert_event(&tx, key, start_position.add(offset as i64), event)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn commit_head_position(&self, key: &StreamKey, target: Position) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO streams (stream_key, head) VALUES (?, ?) \
             ON CONFLICT (stream_key) DO UPDATE SET \
               head = excluded.head, pending_original = NULL, pending_target = NULL",
            params![key.to_string(), target.as_raw()],
        )?;
        Ok(())
    }

    async fn delete_pending_head(&self, key: &StreamKey) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE streams SET pending_original = NULL, pending_target = NULL \
             WHERE stream_key = ?",
            [key.to_string()],
        )?;
        // A never-committed stream's row carries no information once the
        // marker is gone.
        conn.execute(
            "DELETE FROM streams WHERE stream_key = ? AND head = -1",
            [key.to_string()],
        )?;
        Ok(())
    }

    async fn delete_event(&self, key: &StreamKey, position: Position) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM events WHERE stream_key = ? AND position = ?",
            params![key.to_string(), position.as_raw()],
        )?;
        Ok(())
    }

    async fn event_exists(&self, key: &StreamKey, position: Position) -> Result<bool> {
        let conn = self.conn.lock().await;
        let exists: i64 = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM events WHERE stream_key = ? AND position = ?)",
            params![key.to_string(), position.as_raw()],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    async fn get_existing_positions(
        &self,
        key: &StreamKey,
        from: Position,
        to: Position,
    ) -> Result<HashSet<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT position FROM events \
             WHERE stream_key = ? AND position BETWEEN ? AND ?",
        )?;
        let positions = stmt.query_map(
            params![key.to_string(), from.as_raw(), to.as_raw()],
            |row| row.get::<_, i64>(0),
        )?;

        let mut result = HashSet::new();
        for position in positions {
            result.insert(Position::from_raw(position?));
        }
        Ok(result)
    }

    async fn query_events(
        &self,
        range: &RangeKey,
        from: Position,
        page_size: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let conn = self.conn.lock().await;
        let start = from.max(range.start());
        let mut stmt = conn.prepare(
            "SELECT position, event_id, source, event_type, data_content_type, data, time_ms \
             FROM events \
             WHERE stream_key = ? AND position >= ? AND position < ? \
             ORDER BY position \
             LIMIT ?",
        )?;

        let rows = stmt.query_map(
            params![
                range.stream_key().to_string(),
                start.as_raw(),
                range.end().as_raw(),
                page_size as i64,
            ],
            |row| {
                let position: i64 = row.get(0)?;
                let time_ms: Option<i64> = row.get(6)?;
                Ok(RecordedEvent {
                    position: Position::from_raw(position),
                    event: Event {
                        id: row.get(1)?,
                        source: row.get(2)?,
                        event_type: row.get(3)?,
                        data_content_type: row.get(4)?,
                        data: row.get(5)?,
                        time_ms: time_ms.map(|t| t as u64),
                    },
                })
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

// =============================================================================
// Tests
// =============================================================================
