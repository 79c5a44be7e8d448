//! # BrookDB - Event Stream Engine
//!
//! BrookDB is an embeddable event-sourcing storage engine. Each entity owns a
//! **brook**: an append-only, position-ordered event log addressed by a
//! `"type|id"` stream key. It provides:
//!
//! - **Optimistic concurrency**: appends can demand an expected head version
//! - **Crash-safe large appends**: multi-batch writes behind a write-ahead
//!   intent marker, with deterministic recovery on the next access
//! - **Distributed writer exclusivity**: lease-based stream locks with
//!   renewal and fatal lease-loss semantics
//! - **Bounded-cost reads**: lazy paged streaming plus a per-range slice
//!   cache with a two-tier (cached/confirmed) cursor
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          BrookDb                                │
//! │             (append, read, head, cursor, slice)                 │
//! └───────┬─────────────────────┬───────────────────┬───────────────┘
//!         │ writes              │ head lookups      │ reads
//!         ▼                     ▼                   ▼
//! ┌───────────────┐    ┌────────────────┐   ┌──────────────────────┐
//! │   Appender    │───►│   Recovery     │   │  Reader / Slices     │
//! │ single-batch  │    │  complete or   │   │  paged streaming,    │
//! │ or two-phase  │    │  roll back     │   │  cursor-validated    │
//! │ multi-batch   │    │  interrupted   │   │  in-memory cache     │
//! └───────┬───────┘    │  appends       │   └──────────┬───────────┘
//!         │            └───────┬────────┘              │
//!         │ lease              │ lease                 │ lock-free
//!         ▼                    ▼                       │
//! ┌────────────────────────────────┐                   │
//! │          Lock Manager          │                   │
//! │ acquire / renew / release over │                   │
//! │    an abstract lease provider  │                   │
//! └───────┬────────────────────────┘                   │
//!         ▼                                            ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            StorageRepository (SQLite or in-memory)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Contiguity**: event positions within one stream are contiguous from 0
//! 2. **Head arithmetic**: after every successful append,
//!    `head = previous head + event count`
//! 3. **Single marker**: at most one pending-head marker exists per stream
//! 4. **Monotonic head**: a head never decreases except by rolling back an
//!    orphaned multi-batch write
//! 5. **No half-committed reads**: an interrupted append is completed or
//!    rolled back before any caller observes the stream's head
//!
//! ## Module Organization
//!
//! - [`error`]: the error taxonomy and transience classification
//! - [`types`]: domain types (StreamKey, Position, RangeKey, Event, etc.)
//! - [`estimator`]: batch size estimation and size-limited batch splitting
//! - [`retry`]: the bounded retry policy for transient storage failures
//! - [`lock`]: lease-based distributed locks (acquire/renew/release)
//! - [`storage`]: the abstract storage repository contract
//! - [`memory`]: in-memory storage and lease provider
//! - [`schema`]: SQLite DDL and database initialization
//! - [`sqlite`]: the SQLite storage repository
//! - [`recovery`]: head resolution and interrupted-append recovery
//! - [`appender`]: the write path (single- and multi-batch)
//! - [`reader`]: the lazy paged read path
//! - [`slice`]: the slice cache and two-tier cursor
//! - [`api`]: the public engine surface (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for engine operations.
///
/// A single enum covering the whole failure taxonomy, with a transience
/// classification driving the retry policy.
pub mod error;

/// Domain types for event streams.
///
/// Stream keys, positions, range keys, and events. Uses the newtype pattern
/// for type safety.
pub mod types;

/// Batch size estimation.
///
/// Decides how many storage requests an append needs and splits oversized
/// appends into size/count-bounded batches.
pub mod estimator;

/// Bounded retries for transient storage failures.
pub mod retry;

/// Lease-based distributed locks.
///
/// Serializes writers on a stream across processes. Acquisition retries with
/// capped backoff and jitter; a failed renewal is fatal to the operation
/// holding the lease.
pub mod lock;

/// The abstract storage contract the engine runs against.
pub mod storage;

/// In-memory storage and lease provider (tests, prototyping).
pub mod memory;

/// SQLite schema definitions and database initialization.
pub mod schema;

/// SQLite-backed storage repository.
pub mod sqlite;

/// Head resolution and crash recovery.
///
/// Completes or rolls back interrupted multi-batch appends so no caller ever
/// observes a half-committed stream.
pub mod recovery;

/// The write path.
///
/// Validates optimistic-concurrency expectations and appends events, taking
/// the single-batch fast path or the two-phase multi-batch path under the
/// stream's lease.
pub mod appender;

/// The lazy, paged read path.
pub mod reader;

/// Slice cache and stream cursor.
///
/// Per-range in-memory caching with a two-tier (cached/confirmed) latest
/// position tracker deciding cache validity.
pub mod slice;

/// The public engine surface.
///
/// The main entry point is [`BrookDb`](api::BrookDb).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::{BrookDb, EngineConfig};
pub use error::{Error, Result};
pub use lock::{LeaseProvider, LockHandle, LockManager};
pub use schema::Database;
pub use storage::StorageRepository;

// Commonly used domain types at the crate root.
pub use types::{Event, PendingHead, Position, RangeKey, RecordedEvent, StreamKey};

// Read-side building blocks.
pub use reader::StreamReader;
pub use slice::{SliceReader, StreamCursor};
