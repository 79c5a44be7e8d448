//! # Storage Repository
//!
//! The abstract storage collaborator the engine is written against. The
//! engine owns the algorithms (concurrency checks, two-phase appends, crash
//! recovery); the repository owns durability. Two implementations ship with
//! the crate: [`crate::memory::InMemoryStorage`] and
//! [`crate::sqlite::SqliteStorage`].
//!
//! ## Head and Pending Views
//!
//! Each stream has one metadata record `{ head, pending }`:
//!
//! - While **no** pending marker exists, [`get_head_document`] reports the
//!   committed head and [`get_pending_head_document`] reports nothing.
//! - While a pending marker exists (a multi-batch append is in flight or was
//!   interrupted), the head view reports **nothing** and the pending view
//!   reports `{ original, target }`. The committed head is still `original`.
//! - [`delete_pending_head`] clears the marker, leaving the head at
//!   `original` (removing the record entirely when `original` is −1).
//! - [`commit_head_position`] sets the head and clears any marker in one
//!   step.
//!
//! This masking is what lets the recovery service treat "head view present"
//! as "nothing to recover" (see [`crate::recovery`]).
//!
//! [`get_head_document`]: StorageRepository::get_head_document
//! [`get_pending_head_document`]: StorageRepository::get_pending_head_document
//! [`delete_pending_head`]: StorageRepository::delete_pending_head
//! [`commit_head_position`]: StorageRepository::commit_head_position

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Event, PendingHead, Position, RangeKey, RecordedEvent, StreamKey};

/// Durable storage operations for streams, events and head metadata.
///
/// All mutation of the head/pending record happens through the appender (and
/// the recovery service, under lock); the repository itself enforces only the
/// conditional-write semantics of [`execute_conditional_batch`].
///
/// [`execute_conditional_batch`]: StorageRepository::execute_conditional_batch
#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// The committed head of `key`, or `None` if the stream is empty **or**
    /// a pending marker currently masks the head view.
    async fn get_head_document(&self, key: &StreamKey) -> Result<Option<Position>>;

    /// The pending-head marker of `key`, if a multi-batch append is in
    /// flight or was interrupted.
    async fn get_pending_head_document(&self, key: &StreamKey) -> Result<Option<PendingHead>>;

    /// Atomically appends `events` at positions `expected_head + 1 ..` and
    /// commits the head to `new_head`, but only if the stream's committed
    /// head still equals `expected_head` and no pending marker exists.
    ///
    /// # Errors
    ///
    /// [`crate::error::Error::Conflict`] if the condition fails; nothing is
    /// written in that case.
    async fn execute_conditional_batch(
        &self,
        key: &StreamKey,
        events: &[Event],
        expected_head: Position,
        new_head: Position,
    ) -> Result<()>;

    /// Writes the pending-head marker `{ original, target }`, masking the
    /// head view until commit or rollback.
    async fn create_pending_head(
        &self,
        key: &StreamKey,
        original: Position,
        target: Position,
    ) -> Result<()>;

    /// Appends `events` at absolute positions `start_position ..`
    /// unconditionally. Used by the large-batch path, which carries its own
    /// pending-head breadcrumb instead of a per-write condition.
    async fn append_event_batch(
        &self,
        key: &StreamKey,
        events: &[Event],
        start_position: Position,
    ) -> Result<()>;

    /// Commits the head to `target` and clears any pending marker.
    async fn commit_head_position(&self, key: &StreamKey, target: Position) -> Result<()>;

    /// Clears the pending marker, leaving the head at its `original` value.
    /// A no-op if no marker exists.
    async fn delete_pending_head(&self, key: &StreamKey) -> Result<()>;

    /// Deletes the event at `position`, if present.
    async fn delete_event(&self, key: &StreamKey, position: Position) -> Result<()>;

    /// Whether an event exists at `position`.
    async fn event_exists(&self, key: &StreamKey, position: Position) -> Result<bool>;

    /// The set of positions in `[from, to]` (inclusive) holding an event.
    async fn get_existing_positions(
        &self,
        key: &StreamKey,
        from: Position,
        to: Position,
    ) -> Result<HashSet<Position>>;

    /// One page of events inside `range`, starting at `from` (inclusive),
    /// at most `page_size` long, in position order. An empty page means the
    /// stream holds nothing at or after `from` within the range.
    async fn query_events(
        &self,
        range: &RangeKey,
        from: Position,
        page_size: usize,
    ) -> Result<Vec<RecordedEvent>>;
}
