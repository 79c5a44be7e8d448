//! # In-Memory Backend
//!
//! In-memory implementations of [`StorageRepository`] and [`LeaseProvider`].
//! Used by the test suite and for embedding the engine without a durable
//! backend; the SQLite backend in [`crate::sqlite`] is the durable twin.
//!
//! State lives behind a single async mutex per component. Every operation
//! takes the lock for the duration of one call, which makes the conditional
//! batch genuinely atomic with respect to concurrent callers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lock::LeaseProvider;
use crate::storage::StorageRepository;
use crate::types::{Event, PendingHead, Position, RangeKey, RecordedEvent, StreamKey};

// =============================================================================
// In-Memory Storage
// =============================================================================

/// Per-stream metadata record: committed head plus optional pending marker.
#[derive(Debug, Clone, Copy)]
struct StreamMeta {
    head: Position,
    pending: Option<PendingHead>,
}

#[derive(Default)]
struct State {
    meta: HashMap<StreamKey, StreamMeta>,
    /// Events per stream, keyed by raw position. BTreeMap keeps them in
    /// position order for range queries.
    events: HashMap<StreamKey, BTreeMap<i64, Event>>,
}

/// An in-memory [`StorageRepository`].
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<State>,
}

impl InMemoryStorage {
    /// Creates an empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageRepository for InMemoryStorage {
    async fn get_head_document(&self, key: &StreamKey) -> Result<Option<Position>> {
        let state = self.inner.lock().await;
        Ok(state.meta.get(key).and_then(|meta| {
            if meta.pending.is_some() {
                None
            } else {
                Some(meta.head)
            }
        }))
    }

    async fn get_pending_head_document(&self, key: &StreamKey) -> Result<Option<PendingHead>> {
        let state = self.inner.lock().await;
        Ok(state.meta.get(key).and_then(|meta| meta.pending))
    }

    async fn execute_conditional_batch(
        &self,
        key: &StreamKey,
        events: &[Event],
        expected_head: Position,
        new_head: Position,
    ) -> Result<()> {
        let mut state = self.inner.lock().await;

        let current = state.meta.get(key).copied().unwrap_or(StreamMeta {
            head: Position::NONE,
            pending: None,
        });
        if current.pending.is_some() || current.head != expected_head {
            return Err(Error::Conflict {
                stream: key.to_string(),
                expected: expected_head.as_raw(),
                actual: current.head.as_raw(),
            });
        }

        let stream_events = state.events.entry(key.clone()).or_default();
        for (offset, event) in events.iter().enumerate() {
            let position = expected_head.add(offset as i64 + 1);
            stream_events.insert(position.as_raw(), event.clone());
        }
        state.meta.insert(
            key.clone(),
            StreamMeta {
                head: new_head,
                pending: None,
            },
        );
        Ok(())
    }

    async fn create_pending_head(
        &self,
        key: &StreamKey,
        original: Position,
        target: Position,
    ) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.meta.insert(
            key.clone(),
            StreamMeta {
                head: original,
                pending: Some(PendingHead { original, target }),
            },
        );
        Ok(())
    }

    async fn append_event_batch(
        &self,
        key: &StreamKey,
        events: &[Event],
        start_position: Position,
    ) -> Result<()> {
        let mut state = self.inner.lock().await;
        let stream_events = state.events.entry(key.clone()).or_default();
        for (offset, event) in events.iter().enumerate() {
            let position = start_position.add(offset as i64);
            stream_events.insert(position.as_raw(), event.clone());
        }
        Ok(())
    }

    async fn commit_head_position(&self, key: &StreamKey, target: Position) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.meta.insert(
            key.clone(),
            StreamMeta {
                head: target,
                pending: None,
            },
        );
        Ok(())
    }

    async fn delete_pending_head(&self, key: &StreamKey) -> Result<()> {
        let mut state = self.inner.lock().await;
        let remove = match state.meta.get_mut(key) {
            Some(meta) => {
                meta.pending = None;
                // A record for a never-committed stream carries no information.
                meta.head.is_none()
            }
            None => false,
        };
        if remove {
            state.meta.remove(key);
        }
        Ok(())
    }

    async fn delete_event(&self, key: &StreamKey, position: Position) -> Result<()> {
        let mut state = self.inner.lock().await;
        if let Some(stream_events) = state.events.get_mut(key) {
            stream_events.remove(&position.as_raw());
        }
        Ok(())
    }

    async fn event_exists(&self, key: &StreamKey, position: Position) -> Result<bool> {
        let state = self.inner.lock().await;
        Ok(state
            .events
            .get(key)
            .map(|events| events.contains_key(&position.as_raw()))
            .unwrap_or(false))
    }

    async fn get_existing_positions(
        &self,
        key: &StreamKey,
        from: Position,
        to: Position,
    ) -> Result<HashSet<Position>> {
        let state = self.inner.lock().await;
        Ok(state
            .events
            .get(key)
            .map(|events| {
                events
                    .range(from.as_raw()..=to.as_raw())
                    .map(|(&raw, _)| Position::from_raw(raw))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query_events(
        &self,
        range: &RangeKey,
        from: Position,
        page_size: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let state = self.inner.lock().await;
        let start = from.max(range.start());
        let end = range.end();
        Ok(state
            .events
            .get(range.stream_key())
            .map(|events| {
                events
                    .range(start.as_raw()..end.as_raw())
                    .take(page_size)
                    .map(|(&raw, event)| RecordedEvent {
                        position: Position::from_raw(raw),
                        event: event.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// =============================================================================
// In-Memory Lease Provider
// =============================================================================

struct LeaseRecord {
    lease_id: String,
    expires_at: Instant,
}

/// An in-memory [`LeaseProvider`] with TTL expiry.
///
/// Exclusion holds across tasks within one process; for cross-process
/// exclusion back the engine with a shared lease store instead.
#[derive(Default)]
pub struct InMemoryLeaseProvider {
    leases: Mutex<HashMap<String, LeaseRecord>>,
    renewals: AtomicU64,
}

impl InMemoryLeaseProvider {
    /// Creates an empty lease provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of renewals that reached the provider (test observability).
    pub async fn renewal_count(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }

    /// Drops a lease as if another holder had fenced it (test hook).
    pub async fn evict(&self, resource: &str) {
        self.leases.lock().await.remove(resource);
    }
}

#[async_trait]
impl LeaseProvider for InMemoryLeaseProvider {
    async fn acquire(&self, resource: &str, duration: Duration) -> Result<String> {
        let mut leases = self.leases.lock().await;
        if let Some(record) = leases.get(resource) {
            if record.expires_at > Instant::now() {
                return Err(Error::LeaseHeld {
                    resource: resource.to_string(),
                });
            }
        }

        let lease_id = Uuid::new_v4().to_string();
        leases.insert(
            resource.to_string(),
            LeaseRecord {
                lease_id: lease_id.clone(),
                expires_at: Instant::now() + duration,
            },
        );
        Ok(lease_id)
    }

    async fn renew(&self, resource: &str, lease_id: &str, duration: Duration) -> Result<()> {
        let mut leases = self.leases.lock().await;
        match leases.get_mut(resource) {
            Some(record) if record.lease_id == lease_id && record.expires_at > Instant::now() => {
                record.expires_at = Instant::now() + duration;
                self.renewals.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(Error::LeaseLost {
                resource: resource.to_string(),
            }),
        }
    }

    async fn release(&self, resource: &str, lease_id: &str) -> Result<()> {
        let mut leases = self.leases.lock().await;
        if let Some(record) = leases.get(resource) {
            if record.lease_id == lease_id {
                leases.remove(resource);
            }
        }
        // Releasing an already-gone lease is fine.
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
