//! # Paged Stream Reader
//!
//! Streams the events of a range window `[start, start + count)` back to the
//! caller in position order, fetching one storage page at a time.
//!
//! The returned stream is lazy: no storage query runs until the caller polls
//! it, and a caller that stops early never pays for the pages it didn't
//! consume. Paging terminates on whichever comes first - a short (or empty)
//! page, meaning the stream has no further events in the window, or the
//! window's end position.
//!
//! Reads take no locks and never consult the pending-head marker: they see
//! committed events only, and an in-flight multi-batch append is invisible
//! until its commit.

use std::sync::Arc;

use async_stream::try_stream;
use futures::stream::BoxStream;
use tracing::trace;

use crate::error::Result;
use crate::storage::StorageRepository;
use crate::types::{RangeKey, RecordedEvent};

/// The read path for one engine instance.
#[derive(Clone)]
pub struct StreamReader {
    storage: Arc<dyn StorageRepository>,
    page_size: usize,
}

impl StreamReader {
    /// Creates a reader fetching `page_size` events per storage query.
    pub fn new(storage: Arc<dyn StorageRepository>, page_size: usize) -> Self {
        Self { storage, page_size }
    }

    /// Streams the events of `range` in ascending position order.
    ///
    /// Yields nothing for an empty or unknown stream. Positions inside the
    /// window that hold no event are skipped, not errors.
    pub fn read_events(&self, range: RangeKey) -> BoxStream<'static, Result<RecordedEvent>> {
        let storage = Arc::clone(&self.storage);
        let page_size = self.page_size;

        Box::pin(try_stream! {
            let mut from = range.start();
            let end = range.end();

            while from < end {
                let page = storage.query_events(&range, from, page_size).await?;
                trace!(range = %range, from = %from, fetched = page.len(), "read page");

                let full_page = page.len() == page_size;
                let mut last = None;
                for recorded in page {
                    last = Some(recorded.position);
                    yield recorded;
                }

                match last {
                    // A short page means the window holds nothing further.
                    Some(position) if full_page => from = position.next(),
                    _ => break,
                }
            }
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::memory::InMemoryStorage;
    use crate::types::{Event, Position, StreamKey};

    fn event(id: &str) -> Event {
        Event::new(id, "src", "Ev", "application/json", b"{}".to_vec())
    }

    async fn seed(storage: &InMemoryStorage, key: &StreamKey, count: i64) {
        let events: Vec<Event> = (0..count).map(|i| event(&format!("e-{}", i))).collect();
        storage
            .execute_conditional_batch(key, &events, Position::NONE, Position::from_raw(count - 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reads_full_window_in_order() {
        let storage = Arc::new(InMemoryStorage::new());
        let key = StreamKey::new("t", "ordered").unwrap();
        seed(&storage, &key, 10).await;

        let reader = StreamReader::new(storage, 3);
        let range = RangeKey::new(key, Position::FIRST, 10).unwrap();
        let events: Vec<RecordedEvent> = reader.read_events(range).try_collect().await.unwrap();

        let positions: Vec<i64> = events.iter().map(|r| r.position.as_raw()).collect();
        assert_eq!(positions, (0..10).collect::<Vec<i64>>());
        assert_eq!(events[0].event.id, "e-0");
        assert_eq!(events[9].event.id, "e-9");
    }

    #[tokio::test]
    async fn test_window_bounds_are_honored() {
        let storage = Arc::new(InMemoryStorage::new());
        let key = StreamKey::new("t", "windowed").unwrap();
        seed(&storage, &key, 10).await;

        let reader = StreamReader::new(storage, 100);
        let range = RangeKey::new(key, Position::from_raw(3), 4).unwrap();
        let events: Vec<RecordedEvent> = reader.read_events(range).try_collect().await.unwrap();

        let positions: Vec<i64> = events.iter().map(|r| r.position.as_raw()).collect();
        assert_eq!(positions, vec![3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_unknown_stream_yields_nothing() {
        let storage = Arc::new(InMemoryStorage::new());
        let key = StreamKey::new("t", "nothing").unwrap();

        let reader = StreamReader::new(storage, 10);
        let range = RangeKey::new(key, Position::FIRST, 50).unwrap();
        let events: Vec<RecordedEvent> = reader.read_events(range).try_collect().await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_window_past_head_stops_at_head() {
        let storage = Arc::new(InMemoryStorage::new());
        let key = StreamKey::new("t", "short").unwrap();
        seed(&storage, &key, 4).await;

        let reader = StreamReader::new(storage, 2);
        let range = RangeKey::new(key, Position::FIRST, 1000).unwrap();
        let events: Vec<RecordedEvent> = reader.read_events(range).try_collect().await.unwrap();
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_exact_page_boundary_terminates() {
        // Head count is a multiple of the page size: the final probe page is
        // empty and the stream must still terminate.
        let storage = Arc::new(InMemoryStorage::new());
        let key = StreamKey::new("t", "boundary").unwrap();
        seed(&storage, &key, 6).await;

        let reader = StreamReader::new(storage, 3);
        let range = RangeKey::new(key, Position::FIRST, 1000).unwrap();
        let events: Vec<RecordedEvent> = reader.read_events(range).try_collect().await.unwrap();
        assert_eq!(events.len(), 6);
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        use futures::StreamExt;

        let storage = Arc::new(InMemoryStorage::new());
        let key = StreamKey::new("t", "lazy").unwrap();
        seed(&storage, &key, 10).await;

        let reader = StreamReader::new(storage, 2);
        let range = RangeKey::new(key, Position::FIRST, 10).unwrap();
        let mut stream = reader.read_events(range);

        // Consuming a single element must not have drained the rest.
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.position, Position::FIRST);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.position, Position::from_raw(1));
    }
}
