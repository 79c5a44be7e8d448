//! # Event Stream Appender
//!
//! The write path. One append is:
//!
//! 1. Acquire the stream's lease.
//! 2. Resolve the current head via the recovery service - which self-heals
//!    any append a previous writer left interrupted, before this one touches
//!    anything.
//! 3. Check the caller's expected version (optimistic concurrency). A
//!    mismatch fails before any mutation.
//! 4. Pick a strategy from the batch estimator:
//!    - **Fast path** - everything fits one request: a single atomic
//!      conditional write that succeeds only if the head still equals the
//!      resolved value, wrapped in the transient-failure retry policy.
//!    - **Large-batch path** - write the pending-head marker (the crash
//!      recovery breadcrumb), append each size/count-bounded batch at its
//!      absolute start position, renewing the lease every 5 batches, then
//!      commit the head. Any failure mid-flight rolls back every written
//!      position (each deletion retried), retires the marker, and re-raises
//!      the original failure.
//!
//! ## Large-Batch State Machine
//!
//! ```text
//! NoPending ──► PendingWritten ──► AllBatchesWritten ──► Committed
//!                     │
//!                     └──────────► Failure ──────────► RolledBack
//! ```
//!
//! `Committed` and `RolledBack` are terminal and leave no pending marker. A
//! crash (or a lost lease) between `PendingWritten` and a terminal state is
//! resolved by the recovery service on the next access to the stream.
//!
//! A lost lease is the one failure that does *not* roll back in-line:
//! exclusivity is gone, so writing anything further - deletions included -
//! risks corrupting a concurrent writer's work. The marker stays behind and
//! recovery resolves it under a fresh lease.

use std::sync::Arc;

use tracing::{debug, error};

use crate::api::EngineConfig;
use crate::error::{Error, Result};
use crate::estimator::BatchSizeEstimator;
use crate::lock::{LockHandle, LockManager};
use crate::recovery::RecoveryService;
use crate::retry::RetryPolicy;
use crate::storage::StorageRepository;
use crate::types::{Event, Position, StreamKey};

/// The lease is renewed after every this many batches on the large path.
const RENEW_EVERY_BATCHES: usize = 5;

/// The write path for one engine instance.
#[derive(Clone)]
pub struct StreamAppender {
    storage: Arc<dyn StorageRepository>,
    locks: LockManager,
    recovery: RecoveryService,
    estimator: BatchSizeEstimator,
    retry: RetryPolicy,
    config: EngineConfig,
}

impl StreamAppender {
    /// Creates an appender.
    pub fn new(
        storage: Arc<dyn StorageRepository>,
        locks: LockManager,
        recovery: RecoveryService,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            locks,
            recovery,
            estimator: BatchSizeEstimator::new(),
            retry: RetryPolicy::default(),
            config,
        }
    }

    /// Appends `events` to the stream, returning the new head position.
    ///
    /// With `expected_version` set, the append succeeds only if the resolved
    /// head equals it; otherwise [`Error::Conflict`] is returned and nothing
    /// is written.
    pub async fn append_events(
        &self,
        key: &StreamKey,
        events: Vec<Event>,
        expected_version: Option<Position>,
    ) -> Result<Position> {
        if events.is_empty() {
            return Err(Error::InvalidArgument(
                "append requires at least one event".into(),
            ));
        }

        let mut lock = self
            .locks
            .acquire(&key.to_string(), self.config.lock_duration)
            .await?;
        let result = self
            .append_under_lock(key, events, expected_version, &mut lock)
            .await;
        lock.release().await;
        result
    }

    async fn append_under_lock(
        &self,
        key: &StreamKey,
        events: Vec<Event>,
        expected_version: Option<Position>,
        lock: &mut LockHandle,
    ) -> Result<Position> {
        let current_head = self.recovery.resolve_head_under_lock(key, lock).await?;

        if let Some(expected) = expected_version {
            if expected != current_head {
                return Err(Error::Conflict {
                    stream: key.to_string(),
                    expected: expected.as_raw(),
                    actual: current_head.as_raw(),
                });
            }
        }

        let final_position = current_head.add(events.len() as i64);
        let estimated_size = self.estimator.estimate_batch_size(&events)?;

        if events.len() <= self.config.max_events_per_batch
            && estimated_size <= self.config.max_request_bytes
        {
            debug!(
                stream = %key,
                count = events.len(),
                estimated_size,
                "single-batch append"
            );
            lock.renew().await?;
            self.retry
                .run(|| {
                    self.storage
                        .execute_conditional_batch(key, &events, current_head, final_position)
                })
                .await?;
            return Ok(final_position);
        }

        self.append_multi_batch(key, events, current_head, final_position, lock)
            .await
    }

    /// The two-phase large-batch path: pending marker, batches, commit.
    async fn append_multi_batch(
        &self,
        key: &StreamKey,
        events: Vec<Event>,
        current_head: Position,
        final_position: Position,
        lock: &mut LockHandle,
    ) -> Result<Position> {
        // Split before writing the marker: an unbatchable event is a
        // configuration error and must leave no trace behind.
        let batches = self.estimator.create_size_limited_batches(
            events,
            self.config.max_events_per_batch,
            self.config.max_request_bytes,
        )?;

        debug!(
            stream = %key,
            batches = batches.len(),
            from = current_head.as_raw(),
            to = final_position.as_raw(),
            "multi-batch append"
        );

        self.storage
            .create_pending_head(key, current_head, final_position)
            .await?;

        match self.write_batches(key, &batches, current_head.next(), lock).await {
            Ok(()) => {
                // Commit advances the head and implicitly retires the marker.
                self.storage
                    .commit_head_position(key, final_position)
                    .await?;
                Ok(final_position)
            }
            Err(err @ Error::LeaseLost { .. }) => {
                // No rollback writes without exclusivity; recovery owns this
                // marker now.
                Err(err)
            }
            Err(err) => {
                self.roll_back_written(key, current_head, final_position)
                    .await;
                Err(err)
            }
        }
    }

    /// Writes each batch at its absolute starting position, sequentially.
    async fn write_batches(
        &self,
        key: &StreamKey,
        batches: &[Vec<Event>],
        start: Position,
        lock: &mut LockHandle,
    ) -> Result<()> {
        let mut position = start;
        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && index % RENEW_EVERY_BATCHES == 0 {
                lock.renew().await?;
            }
            self.retry
                .run(|| self.storage.append_event_batch(key, batch, position))
                .await?;
            position = position.add(batch.len() as i64);
        }
        Ok(())
    }

    /// Deletes every position in `(original, final_position]` and retires the
    /// pending marker. Rollback failures are logged, not raised - the caller
    /// re-raises the original append failure, and a leftover marker is healed
    /// by recovery on the next access.
    async fn roll_back_written(
        &self,
        key: &StreamKey,
        original: Position,
        final_position: Position,
    ) {
        for raw in (original.as_raw() + 1)..=final_position.as_raw() {
            let position = Position::from_raw(raw);
            if let Err(err) = self
                .retry
                .run(|| self.storage.delete_event(key, position))
                .await
            {
                error!(stream = %key, position = raw, %err, "rollback deletion failed");
                return;
            }
        }
        if let Err(err) = self
            .retry
            .run(|| self.storage.delete_pending_head(key))
            .await
        {
            error!(stream = %key, %err, "rollback could not retire pending marker");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
