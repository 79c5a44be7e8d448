//! # Error Handling for BrookDB
//!
//! This module defines the error types used throughout BrookDB. We use a single
//! error enum ([`Error`]) to represent all failure modes, which simplifies
//! error handling for library users.
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Conflict | Expected version mismatch | Re-read head, retry |
//! | Lock | Lease unavailable, lease lost | Retry whole operation / abort |
//! | Configuration | Single event larger than any batch | Fix limits |
//! | Caller defect | Malformed key, missing argument | Fix the call site |
//! | Transient | Storage hiccup | Bounded retry, then propagate |

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in BrookDB operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Conflict Errors (client can retry with updated data)
    // =========================================================================
    /// Optimistic concurrency conflict: the stream moved since the caller
    /// last read its head.
    ///
    /// # Recovery
    ///
    /// 1. Re-read the stream head
    /// 2. Re-apply business logic against the new state
    /// 3. Retry the append with the updated expected version
    #[error("conflict on stream '{stream}': expected head {expected}, but found {actual}")]
    Conflict {
        /// The stream where the conflict occurred.
        stream: String,
        /// The head position the caller expected.
        expected: i64,
        /// The actual current head position.
        actual: i64,
    },

    // =========================================================================
    // Lock Errors
    // =========================================================================
    /// Another holder owns the lease right now.
    ///
    /// This is the conflict signal a [`LeaseProvider`](crate::lock::LeaseProvider)
    /// raises on `acquire`. The lock manager retries it with backoff; callers
    /// normally observe [`Error::LockUnavailable`] instead, once retries are
    /// exhausted.
    #[error("lease on '{resource}' is held by another owner")]
    LeaseHeld {
        /// The lock resource identifier.
        resource: String,
    },

    /// Lock acquisition retries were exhausted.
    ///
    /// The whole operation may be retried later; no mutation has occurred.
    #[error("could not acquire lock on '{resource}' after {attempts} attempts")]
    LockUnavailable {
        /// The lock resource identifier.
        resource: String,
        /// How many acquisition attempts were made.
        attempts: u32,
    },

    /// The lease was lost (or its record vanished) during renewal.
    ///
    /// Fatal: exclusivity can no longer be guaranteed, so the in-flight
    /// operation must abort immediately. This variant is never retried.
    #[error("lease on '{resource}' was lost during renewal")]
    LeaseLost {
        /// The lock resource identifier.
        resource: String,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A single event's estimated size exceeds the configured request limit;
    /// no batch can ever hold it.
    #[error(
        "event of estimated size {estimated_bytes} bytes cannot fit in any batch \
         (max {max_bytes} bytes including overhead)"
    )]
    BatchTooLarge {
        /// Estimated serialized size of the event plus batch overhead.
        estimated_bytes: usize,
        /// Configured per-request size limit.
        max_bytes: usize,
    },

    // =========================================================================
    // Caller Defects (fail fast at the boundary, non-retryable)
    // =========================================================================
    /// A stream or range key failed to parse or violated its constraints.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// A required argument was missing or invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Storage Errors (transient, wrapped by the retry policy)
    // =========================================================================
    /// A storage operation failed transiently.
    #[error("storage error: {0}")]
    Storage(String),

    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serializing the representative storage document failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the retry policy may re-attempt the failed operation.
    ///
    /// Only storage-level failures are transient. Conflicts, lock exhaustion,
    /// lease loss, oversized events and caller defects propagate unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Sqlite(_))
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let conflict = Error::Conflict {
            stream: "order|42".to_string(),
            expected: 5,
            actual: 7,
        };
        assert_eq!(
            conflict.to_string(),
            "conflict on stream 'order|42': expected head 5, but found 7"
        );

        let unavailable = Error::LockUnavailable {
            resource: "order|42".to_string(),
            attempts: 5,
        };
        assert_eq!(
            unavailable.to_string(),
            "could not acquire lock on 'order|42' after 5 attempts"
        );

        let lost = Error::LeaseLost {
            resource: "order|42".to_string(),
        };
        assert_eq!(lost.to_string(), "lease on 'order|42' was lost during renewal");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Storage("blip".into()).is_transient());
        assert!(!Error::LeaseLost { resource: "r".into() }.is_transient());
        assert!(!Error::Conflict {
            stream: "s".into(),
            expected: 1,
            actual: 2
        }
        .is_transient());
        assert!(!Error::MalformedKey("x".into()).is_transient());
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();
        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.is_transient());
    }
}
