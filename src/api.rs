//! # Public Engine Surface
//!
//! [`BrookDb`] is the embeddable handle tying the write path, read path,
//! recovery, and slice cache together over one storage backend.
//!
//! ## Per-Key Serialization
//!
//! Within a process, write operations against the same stream key never
//! interleave: each key owns an async mutex, taken for the duration of an
//! append. Operations on different keys proceed fully in parallel, and reads
//! bypass the mutex entirely (they are lock-free by design). Cross-process
//! exclusivity is the lock manager's job; the per-key mutex just keeps
//! in-process writers from burning lease-acquisition retries against each
//! other.
//!
//! ## Example
//!
//! ```no_run
//! use brookdb::{BrookDb, Event, StreamKey};
//!
//! # async fn demo() -> brookdb::Result<()> {
//! let db = BrookDb::open("./orders.db")?;
//! let key = StreamKey::new("order", "o-1234")?;
//!
//! let head = db.append_events(
//!     &key,
//!     vec![Event::new("e-1", "checkout", "OrderPlaced", "application/json", b"{}".to_vec())],
//!     None,
//! ).await?;
//!
//! let events = db.read_events_batch(&key, None, None).await?;
//! assert_eq!(events.len(), head.as_raw() as usize + 1);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::BoxStream;

use crate::appender::StreamAppender;
use crate::error::{Error, Result};
use crate::lock::{LeaseProvider, LockManager};
use crate::memory::{InMemoryLeaseProvider, InMemoryStorage};
use crate::reader::StreamReader;
use crate::recovery::RecoveryService;
use crate::retry::RetryPolicy;
use crate::slice::{SliceReader, StreamCursor};
use crate::sqlite::SqliteStorage;
use crate::storage::StorageRepository;
use crate::types::{Event, Position, RangeKey, RecordedEvent, StreamKey};

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum events per storage batch; larger appends take the multi-batch
    /// path.
    pub max_events_per_batch: usize,

    /// Maximum estimated bytes per storage request, batch overhead included.
    pub max_request_bytes: usize,

    /// Lease duration for stream locks.
    pub lock_duration: Duration,

    /// How long before lease expiry a renewal must land.
    pub renewal_threshold: Duration,

    /// Events fetched per page on the read path.
    pub read_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events_per_batch: 100,
            max_request_bytes: 2 * 1024 * 1024,
            lock_duration: Duration::from_secs(60),
            renewal_threshold: Duration::from_secs(10),
            read_page_size: 100,
        }
    }
}

// =============================================================================
// Engine Handle
// =============================================================================

/// An embeddable event store handle. Cheap to clone; clones share storage,
/// locks, and the per-key serialization registry.
#[derive(Clone)]
pub struct BrookDb {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn StorageRepository>,
    appender: StreamAppender,
    reader: StreamReader,
    recovery: RecoveryService,
    config: EngineConfig,
    stream_locks: Mutex<HashMap<StreamKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl BrookDb {
    /// Creates an engine over the given storage backend and lease provider.
    pub fn new(
        storage: Arc<dyn StorageRepository>,
        leases: Arc<dyn LeaseProvider>,
        config: EngineConfig,
    ) -> Self {
        let locks = LockManager::new(leases, config.renewal_threshold);
        let recovery = RecoveryService::new(
            Arc::clone(&storage),
            locks.clone(),
            config.lock_duration,
            RetryPolicy::default(),
        );
        let appender = StreamAppender::new(
            Arc::clone(&storage),
            locks,
            recovery.clone(),
            config.clone(),
        );
        let reader = StreamReader::new(Arc::clone(&storage), config.read_page_size);

        Self {
            inner: Arc::new(Inner {
                storage,
                appender,
                reader,
                recovery,
                config,
                stream_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Opens (creating if necessary) a SQLite-backed engine at `path`, with
    /// in-process leases and default configuration.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let storage = Arc::new(SqliteStorage::open(path)?);
        Ok(Self::new(
            storage,
            Arc::new(InMemoryLeaseProvider::new()),
            EngineConfig::default(),
        ))
    }

    /// Creates a fully in-memory engine (tests, prototyping).
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(InMemoryLeaseProvider::new()),
            EngineConfig::default(),
        )
    }

    /// Appends `events` to the stream at `key`, returning the new head.
    ///
    /// With `expected_version` set, fails with [`Error::Conflict`] unless the
    /// stream's resolved head equals it (optimistic concurrency). Within this
    /// process, appends to the same key are serialized.
    pub async fn append_events(
        &self,
        key: &StreamKey,
        events: Vec<Event>,
        expected_version: Option<Position>,
    ) -> Result<Position> {
        let key_mutex = self.key_mutex(key);
        let _serialized = key_mutex.lock().await;
        self.inner.appender.append_events(key, events, expected_version).await
    }

    /// The stream's current head position (−1 if empty), resolving any
    /// interrupted multi-batch append first.
    pub async fn head_position(&self, key: &StreamKey) -> Result<Position> {
        self.inner.recovery.get_or_recover_head_position(key).await
    }

    /// Streams events of `key` in position order, lazily.
    ///
    /// `read_from` defaults to the stream's start and `read_to` (inclusive)
    /// to its current head. An empty or fully-out-of-range window yields an
    /// empty stream.
    pub async fn read_events(
        &self,
        key: &StreamKey,
        read_from: Option<Position>,
        read_to: Option<Position>,
    ) -> Result<BoxStream<'static, Result<RecordedEvent>>> {
        let range = self.resolve_range(key, read_from, read_to).await?;
        Ok(self.inner.reader.read_events(range))
    }

    /// Like [`read_events`](Self::read_events), collected into a vector.
    pub async fn read_events_batch(
        &self,
        key: &StreamKey,
        read_from: Option<Position>,
        read_to: Option<Position>,
    ) -> Result<Vec<RecordedEvent>> {
        use futures::TryStreamExt;
        self.read_events(key, read_from, read_to).await?.try_collect().await
    }

    /// A cursor tracking `key`'s latest position (cached and confirmed tiers).
    pub fn cursor(&self, key: &StreamKey) -> Arc<StreamCursor> {
        Arc::new(StreamCursor::new(Arc::clone(&self.inner.storage), key.clone()))
    }

    /// A caching slice over the window addressed by `range`.
    pub fn slice(&self, range: RangeKey) -> SliceReader {
        let cursor = self.cursor(range.stream_key());
        SliceReader::new(range, self.inner.reader.clone(), cursor)
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    async fn resolve_range(
        &self,
        key: &StreamKey,
        read_from: Option<Position>,
        read_to: Option<Position>,
    ) -> Result<RangeKey> {
        let from = read_from.unwrap_or(Position::FIRST);
        if from < Position::FIRST {
            return Err(Error::InvalidArgument(format!(
                "read_from must be >= 0, got {}",
                from
            )));
        }
        let to = match read_to {
            Some(to) => to,
            None => self.head_position(key).await?,
        };

        let count = (to.as_raw() - from.as_raw() + 1).max(0);
        RangeKey::new(key.clone(), from, count)
    }

    fn key_mutex(&self, key: &StreamKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut registry = self
            .inner
            .stream_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            registry
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> Event {
        Event::new(id, "src", "Ev", "application/json", b"{}".to_vec())
    }

    #[tokio::test]
    async fn test_append_and_read_defaults() {
        let db = BrookDb::in_memory();
        let key = StreamKey::new("order", "o-1").unwrap();

        for i in 0..5 {
            db.append_events(&key, vec![event(&format!("e-{}", i))], None)
                .await
                .unwrap();
        }

        // Defaults read the whole stream.
        let events = db.read_events_batch(&key, None, None).await.unwrap();
        assert_eq!(events.len(), 5);
        let positions: Vec<i64> = events.iter().map(|r| r.position.as_raw()).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_read_window_is_inclusive() {
        let db = BrookDb::in_memory();
        let key = StreamKey::new("order", "o-2").unwrap();
        let events: Vec<Event> = (0..8).map(|i| event(&format!("e-{}", i))).collect();
        db.append_events(&key, events, None).await.unwrap();

        let window = db
            .read_events_batch(&key, Some(Position::from_raw(2)), Some(Position::from_raw(4)))
            .await
            .unwrap();
        let positions: Vec<i64> = window.iter().map(|r| r.position.as_raw()).collect();
        assert_eq!(positions, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_empty_stream_reads_empty() {
        let db = BrookDb::in_memory();
        let key = StreamKey::new("order", "o-none").unwrap();

        assert_eq!(db.head_position(&key).await.unwrap(), Position::NONE);
        let events = db.read_events_batch(&key, None, None).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let db = BrookDb::in_memory();
        let clone = db.clone();
        let key = StreamKey::new("order", "o-shared").unwrap();

        db.append_events(&key, vec![event("a")], None).await.unwrap();
        assert_eq!(clone.head_position(&key).await.unwrap(), Position::FIRST);
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_same_key_serialize() {
        let db = BrookDb::in_memory();
        let key = StreamKey::new("order", "o-racy").unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let db = db.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                db.append_events(&key, vec![event(&format!("e-{}", i))], None).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(db.head_position(&key).await.unwrap(), Position::from_raw(7));
        let events = db.read_events_batch(&key, None, None).await.unwrap();
        assert_eq!(events.len(), 8);
    }
}
