//! # SQLite Schema for BrookDB
//!
//! DDL and database initialization for the SQLite backend.
//!
//! ## Table Overview
//!
//! ```text
//! streams                          events
//! ┌────────────────────┐          ┌─────────────────────┐
//! │ stream_key (PK)    │          │ stream_key (PK, 1/2)│
//! │ head               │◄────────►│ position   (PK, 2/2)│
//! │ pending_original   │          │ event_id            │
//! │ pending_target     │          │ source              │
//! └────────────────────┘          │ event_type          │
//!                                 │ data_content_type   │
//! one row per stream;             │ data BLOB           │
//! pending_* both NULL unless      │ time_ms             │
//! a multi-batch append is         └─────────────────────┘
//! in flight / interrupted
//! ```
//!
//! The `(stream_key, position)` primary key gives range scans in position
//! order for free, which is exactly the shape of every read the engine does.

use rusqlite::Connection;

use crate::error::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version, stored in the metadata table. Increment on
/// breaking schema changes.
const SCHEMA_VERSION: i64 = 1;

// =============================================================================
// DDL
// =============================================================================

const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS brookdb_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

/// One row per stream: the committed head plus the optional pending marker.
///
/// `pending_original`/`pending_target` are both NULL (no marker) or both set.
/// While set, the head view is masked; the committed head is still `head`
/// (equal to `pending_original`).
const CREATE_STREAMS: &str = r#"
CREATE TABLE IF NOT EXISTS streams (
    stream_key       TEXT PRIMARY KEY,
    head             INTEGER NOT NULL,
    pending_original INTEGER,
    pending_target   INTEGER,
    CHECK ((pending_original IS NULL) = (pending_target IS NULL))
)
"#;

/// One row per stored event, addressed by `(stream_key, position)`.
const CREATE_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    stream_key        TEXT    NOT NULL,
    position          INTEGER NOT NULL,
    event_id          TEXT    NOT NULL,
    source            TEXT    NOT NULL,
    event_type        TEXT    NOT NULL,
    data_content_type TEXT    NOT NULL,
    data              BLOB    NOT NULL,
    time_ms           INTEGER,
    PRIMARY KEY (stream_key, position)
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the BrookDB schema applied.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database (tests, throwaway embedding).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Applies pragmas, creates tables, verifies the schema version.
    /// Idempotent - safe on an already-initialized database.
    fn initialize(&mut self) -> Result<()> {
        // WAL: readers don't block the writer. NORMAL sync: fsync on commit
        // boundaries only, an acceptable trade for an event store whose
        // clients retry on failure.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_STREAMS)?;
        self.conn.execute_batch(CREATE_EVENTS)?;

        self.verify_version()
    }

    fn verify_version(&self) -> Result<()> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM brookdb_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match stored {
            None => {
                self.conn.execute(
                    "INSERT INTO brookdb_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
                Ok(())
            }
            Some(value) if value == SCHEMA_VERSION.to_string() => Ok(()),
            Some(value) => Err(Error::Storage(format!(
                "schema version mismatch: database has {}, this build expects {}",
                value, SCHEMA_VERSION
            ))),
        }
    }

    /// Consumes the wrapper, returning the initialized connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================
