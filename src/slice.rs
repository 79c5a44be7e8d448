//! # Slice Cache
//!
//! Per-range in-memory caching over the read path. A stream is partitioned
//! into fixed, position-addressed **slices**; each slice owns an ordered
//! in-memory cache of its window `[start, start + count)` and a lightweight
//! **cursor** tracking the stream's latest position.
//!
//! ## Staleness Tiers
//!
//! The cursor exposes two tiers:
//!
//! - **cached** - the last value any confirmed read observed. Free to read,
//!   may lag reality. Suitable for polling surfaces that tolerate lag.
//! - **confirmed** - re-reads the head from storage. The slice uses this tier
//!   when deciding whether its cache is still valid, so the cache never
//!   silently serves stale data for positions that exist in storage.
//!
//! Cursors are read-only and never take the stream's lock. While a
//! multi-batch append is in flight its pending marker masks the head view,
//! and the confirmed tier reports the marker's original position - the last
//! state a reader may rely on.
//!
//! ## Repopulation
//!
//! A slice repopulates (one full window read through the paged reader) only
//! when its cached extent is behind **both** the requested window's end and
//! the stream's confirmed latest position. A request fully inside the cached
//! extent is served with no event queries at all, and serving walks the
//! position-ordered cache linearly, stopping as soon as it passes the
//! requested end.
//!
//! Idle slices can be [`deactivated`](SliceReader::deactivate) to reclaim
//! memory; repopulation is idempotent, so this has no correctness impact.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures::TryStreamExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::reader::StreamReader;
use crate::storage::StorageRepository;
use crate::types::{Position, RangeKey, RecordedEvent, StreamKey};

// =============================================================================
// Cursor
// =============================================================================

/// Tracks a stream's latest position at two staleness tiers.
pub struct StreamCursor {
    storage: Arc<dyn StorageRepository>,
    key: StreamKey,
    cached: AtomicI64,
}

impl StreamCursor {
    /// Creates a cursor for `key`. The cached tier starts at "empty stream"
    /// until the first confirmed read.
    pub fn new(storage: Arc<dyn StorageRepository>, key: StreamKey) -> Self {
        Self {
            storage,
            key,
            cached: AtomicI64::new(Position::NONE.as_raw()),
        }
    }

    /// The stream this cursor tracks.
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// The cached tier: the latest position any confirmed read observed.
    /// Never touches storage; may lag reality.
    pub fn cached_position(&self) -> Position {
        Position::from_raw(self.cached.load(Ordering::Acquire))
    }

    /// The confirmed tier: re-reads the head from storage and refreshes the
    /// cached tier with the result.
    ///
    /// With a multi-batch append in flight (or interrupted), this reports the
    /// committed position the in-flight append started from.
    pub async fn confirmed_position(&self) -> Result<Position> {
        let head = match self.storage.get_head_document(&self.key).await? {
            Some(head) => head,
            None => match self.storage.get_pending_head_document(&self.key).await? {
                Some(pending) => pending.original,
                None => Position::NONE,
            },
        };
        self.cached.store(head.as_raw(), Ordering::Release);
        Ok(head)
    }

    /// Resets the cached tier to "empty stream".
    pub fn deactivate(&self) {
        self.cached.store(Position::NONE.as_raw(), Ordering::Release);
    }
}

// =============================================================================
// Slice Reader
// =============================================================================

struct SliceState {
    cache: Vec<RecordedEvent>,
    populated: bool,
}

/// An in-memory cache over one slice window of a stream.
pub struct SliceReader {
    range: RangeKey,
    reader: StreamReader,
    cursor: Arc<StreamCursor>,
    state: Mutex<SliceState>,
}

impl SliceReader {
    /// Creates a slice over `range`, sharing `cursor` for validity checks.
    pub fn new(range: RangeKey, reader: StreamReader, cursor: Arc<StreamCursor>) -> Self {
        Self {
            range,
            reader,
            cursor,
            state: Mutex::new(SliceState {
                cache: Vec::new(),
                populated: false,
            }),
        }
    }

    /// The window this slice covers.
    pub fn range(&self) -> &RangeKey {
        &self.range
    }

    /// Reads the events in `[min_read_from, max_read_to]` (inclusive bounds,
    /// clamped to the slice window), repopulating the cache first if it is
    /// behind both the request and the stream's confirmed latest position.
    pub async fn read(
        &self,
        min_read_from: Position,
        max_read_to: Position,
    ) -> Result<Vec<RecordedEvent>> {
        let mut state = self.state.lock().await;

        let extent = match state.cache.last() {
            Some(recorded) => recorded.position,
            None => Position::NONE,
        };

        if extent < max_read_to {
            let latest = self.cursor.confirmed_position().await?;
            if extent < latest || !state.populated {
                debug!(
                    range = %self.range,
                    extent = extent.as_raw(),
                    latest = latest.as_raw(),
                    "repopulating slice cache"
                );
                state.cache = self
                    .reader
                    .read_events(self.range.clone())
                    .try_collect()
                    .await?;
                state.populated = true;
            }
        }

        // Position-ordered cache: stop as soon as we pass the requested end.
        let mut served = Vec::new();
        for recorded in &state.cache {
            if recorded.position > max_read_to {
                break;
            }
            if recorded.position >= min_read_from {
                served.push(recorded.clone());
            }
        }
        Ok(served)
    }

    /// Drops the cached window and resets the cursor's cached tier. Purely a
    /// resource-reclamation path; the next read repopulates.
    pub async fn deactivate(&self) {
        let mut state = self.state.lock().await;
        state.cache = Vec::new();
        state.populated = false;
        self.cursor.deactivate();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::memory::InMemoryStorage;
    use crate::types::{Event, PendingHead};

    fn event(id: &str) -> Event {
        Event::new(id, "src", "Ev", "application/json", b"{}".to_vec())
    }

    async fn seed(storage: &dyn StorageRepository, key: &StreamKey, count: i64) {
        let events: Vec<Event> = (0..count).map(|i| event(&format!("e-{}", i))).collect();
        storage
            .execute_conditional_batch(key, &events, Position::NONE, Position::from_raw(count - 1))
            .await
            .unwrap();
    }

    /// Counts event queries so cache-hit behavior is observable.
    struct CountingStorage {
        inner: InMemoryStorage,
        queries: AtomicUsize,
    }

    impl CountingStorage {
        fn new() -> Self {
            Self {
                inner: InMemoryStorage::new(),
                queries: AtomicUsize::new(0),
            }
        }

        fn query_count(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StorageRepository for CountingStorage {
        async fn get_head_document(&self, key: &StreamKey) -> Result<Option<Position>> {
            self.inner.get_head_document(key).await
        }

        async fn get_pending_head_document(
            &self,
            key: &StreamKey,
        ) -> Result<Option<PendingHead>> {
            self.inner.get_pending_head_document(key).await
        }

        async fn execute_conditional_batch(
            &self,
            key: &StreamKey,
            events: &[Event],
            expected_head: Position,
            new_head: Position,
        ) -> Result<()> {
            self.inner
                .execute_conditional_batch(key, events, expected_head, new_head)
                .await
        }

        async fn create_pending_head(
            &self,
            key: &StreamKey,
            original: Position,
            target: Position,
        ) -> Result<()> {
            self.inner.create_pending_head(key, original, target).await
        }

        async fn append_event_batch(
            &self,
            key: &StreamKey,
            events: &[Event],
            start_position: Position,
        ) -> Result<()> {
            self.inner.append_event_batch(key, events, start_position).await
        }

        async fn commit_head_position(&self, key: &StreamKey, target: Position) -> Result<()> {
            self.inner.commit_head_position(key, target).await
        }

        async fn delete_pending_head(&self, key: &StreamKey) -> Result<()> {
            self.inner.delete_pending_head(key).await
        }

        async fn delete_event(&self, key: &StreamKey, position: Position) -> Result<()> {
            self.inner.delete_event(key, position).await
        }

        async fn event_exists(&self, key: &StreamKey, position: Position) -> Result<bool> {
            self.inner.event_exists(key, position).await
        }

        async fn get_existing_positions(
            &self,
            key: &StreamKey,
            from: Position,
            to: Position,
        ) -> Result<HashSet<Position>> {
            self.inner.get_existing_positions(key, from, to).await
        }

        async fn query_events(
            &self,
            range: &RangeKey,
            from: Position,
            page_size: usize,
        ) -> Result<Vec<RecordedEvent>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.query_events(range, from, page_size).await
        }
    }

    fn slice_over(storage: Arc<dyn StorageRepository>, key: &StreamKey, count: i64) -> SliceReader {
        let cursor = Arc::new(StreamCursor::new(Arc::clone(&storage), key.clone()));
        let reader = StreamReader::new(storage, 1000);
        let range = RangeKey::new(key.clone(), Position::FIRST, count).unwrap();
        SliceReader::new(range, reader, cursor)
    }

    #[tokio::test]
    async fn test_cursor_tiers() {
        let storage: Arc<dyn StorageRepository> = Arc::new(InMemoryStorage::new());
        let key = StreamKey::new("t", "cursor").unwrap();
        seed(storage.as_ref(), &key, 5).await;

        let cursor = StreamCursor::new(Arc::clone(&storage), key.clone());
        // The cached tier lags until a confirmed read happens.
        assert_eq!(cursor.cached_position(), Position::NONE);
        assert_eq!(cursor.confirmed_position().await.unwrap(), Position::from_raw(4));
        assert_eq!(cursor.cached_position(), Position::from_raw(4));

        cursor.deactivate();
        assert_eq!(cursor.cached_position(), Position::NONE);
    }

    #[tokio::test]
    async fn test_cursor_reports_original_while_pending() {
        let storage: Arc<dyn StorageRepository> = Arc::new(InMemoryStorage::new());
        let key = StreamKey::new("t", "mid-flight").unwrap();
        seed(storage.as_ref(), &key, 3).await;
        storage
            .create_pending_head(&key, Position::from_raw(2), Position::from_raw(10))
            .await
            .unwrap();

        let cursor = StreamCursor::new(storage, key);
        assert_eq!(cursor.confirmed_position().await.unwrap(), Position::from_raw(2));
    }

    #[tokio::test]
    async fn test_read_inside_cached_window_queries_nothing() {
        let storage = Arc::new(CountingStorage::new());
        let key = StreamKey::new("t", "hit").unwrap();
        seed(storage.as_ref(), &key, 10).await;

        let slice = slice_over(storage.clone(), &key, 10);

        // First read repopulates: exactly one event query.
        let first = slice.read(Position::FIRST, Position::from_raw(9)).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(storage.query_count(), 1);

        // Fully inside the cached window: zero further event queries.
        let second = slice.read(Position::from_raw(2), Position::from_raw(5)).await.unwrap();
        assert_eq!(
            second.iter().map(|r| r.position.as_raw()).collect::<Vec<i64>>(),
            vec![2, 3, 4, 5]
        );
        assert_eq!(storage.query_count(), 1);
    }

    #[tokio::test]
    async fn test_read_beyond_cache_repopulates_once() {
        let storage = Arc::new(CountingStorage::new());
        let key = StreamKey::new("t", "grow").unwrap();
        seed(storage.as_ref(), &key, 4).await;

        let slice = slice_over(storage.clone(), &key, 100);
        slice.read(Position::FIRST, Position::from_raw(3)).await.unwrap();
        assert_eq!(storage.query_count(), 1);

        // The stream grows past the cached extent.
        storage
            .execute_conditional_batch(
                &key,
                &[event("e-4"), event("e-5")],
                Position::from_raw(3),
                Position::from_raw(5),
            )
            .await
            .unwrap();

        let grown = slice.read(Position::FIRST, Position::from_raw(5)).await.unwrap();
        assert_eq!(grown.len(), 6);
        assert_eq!(storage.query_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_request_past_head_does_not_repopulate() {
        let storage = Arc::new(CountingStorage::new());
        let key = StreamKey::new("t", "no-growth").unwrap();
        seed(storage.as_ref(), &key, 4).await;

        let slice = slice_over(storage.clone(), &key, 100);
        slice.read(Position::FIRST, Position::from_raw(3)).await.unwrap();
        assert_eq!(storage.query_count(), 1);

        // Asking past the head with no new events: the confirmed cursor shows
        // the cache already covers everything that exists.
        let served = slice.read(Position::FIRST, Position::from_raw(50)).await.unwrap();
        assert_eq!(served.len(), 4);
        assert_eq!(storage.query_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_stream_serves_empty_without_event_queries() {
        let storage = Arc::new(CountingStorage::new());
        let key = StreamKey::new("t", "void").unwrap();

        let slice = slice_over(storage.clone(), &key, 100);
        let served = slice.read(Position::FIRST, Position::from_raw(10)).await.unwrap();
        assert!(served.is_empty());
        // One probe read marks the slice populated; nothing after that.
        let again = slice.read(Position::FIRST, Position::from_raw(10)).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(storage.query_count(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_clears_and_repopulation_is_idempotent() {
        let storage = Arc::new(CountingStorage::new());
        let key = StreamKey::new("t", "sleepy").unwrap();
        seed(storage.as_ref(), &key, 6).await;

        let slice = slice_over(storage.clone(), &key, 100);
        let before = slice.read(Position::FIRST, Position::from_raw(5)).await.unwrap();
        assert_eq!(storage.query_count(), 1);

        slice.deactivate().await;

        let after = slice.read(Position::FIRST, Position::from_raw(5)).await.unwrap();
        assert_eq!(storage.query_count(), 2);
        assert_eq!(before, after);
    }
}
