//! # Distributed Lock Manager
//!
//! Cross-process writer exclusivity is provided by a time-bounded lease per
//! stream key. The lease itself is an abstract collaborator
//! ([`LeaseProvider`]): anything offering `acquire`/`renew`/`release` with a
//! TTL works - a key-value store with expiry, a dedicated lock service, or
//! table storage with conditional writes. An in-memory provider ships in
//! [`crate::memory`].
//!
//! ## Acquisition
//!
//! A held lease is a *conflict signal*, not a hard failure: acquisition
//! retries up to 5 times with capped exponential backoff
//! (`min(2000ms, 100ms * 2^attempt)`) plus 0-100ms of jitter. Exhausting the
//! retries surfaces [`Error::LockUnavailable`].
//!
//! ## Renewal
//!
//! [`LockHandle::renew`] is called liberally by long-running operations; it
//! no-ops until elapsed time exceeds `duration - renewal_threshold - 1s`, so
//! renewal calls are minimized while still completing before lease expiry
//! under normal latency. A renewal that reports the lease lost or its record
//! missing is **fatal**: exclusivity can no longer be guaranteed, so the
//! caller must abort its in-flight operation immediately. This is the one
//! failure the engine never retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};

// =============================================================================
// Constants
// =============================================================================

/// Acquisition attempts before giving up.
pub const MAX_ACQUIRE_ATTEMPTS: u32 = 5;

/// Base backoff between acquisition attempts.
const BACKOFF_BASE_MS: u64 = 100;

/// Cap on the backoff between acquisition attempts.
const BACKOFF_CAP_MS: u64 = 2000;

/// Upper bound of the random jitter added to each backoff.
const JITTER_MAX_MS: u64 = 100;

/// Safety buffer subtracted from the renewal deadline so the renewal call
/// itself completes before the lease expires.
const RENEWAL_SAFETY_BUFFER: Duration = Duration::from_secs(1);

// =============================================================================
// Lease Provider
// =============================================================================

/// Abstract lease primitive: time-bounded mutual exclusion over a resource id.
///
/// # Contract
///
/// - `acquire` returns an opaque lease id, or [`Error::LeaseHeld`] while
///   another holder's unexpired lease exists.
/// - `renew` extends an existing lease for another `duration`;
///   [`Error::LeaseLost`] if the lease expired, changed hands, or its record
///   is missing.
/// - `release` removes the lease; releasing an already-gone lease is `Ok`.
#[async_trait]
pub trait LeaseProvider: Send + Sync {
    /// Acquires a lease on `resource` for `duration`, returning its lease id.
    async fn acquire(&self, resource: &str, duration: Duration) -> Result<String>;

    /// Extends the identified lease for another `duration`.
    async fn renew(&self, resource: &str, lease_id: &str, duration: Duration) -> Result<()>;

    /// Releases the identified lease.
    async fn release(&self, resource: &str, lease_id: &str) -> Result<()>;
}

// =============================================================================
// Lock Manager
// =============================================================================

/// Acquires per-stream leases with bounded, jittered retries.
#[derive(Clone)]
pub struct LockManager {
    provider: Arc<dyn LeaseProvider>,
    renewal_threshold: Duration,
}

impl LockManager {
    /// Creates a lock manager over a lease provider.
    ///
    /// `renewal_threshold` is how long before expiry a renewal must land;
    /// see [`LockHandle::renew`].
    pub fn new(provider: Arc<dyn LeaseProvider>, renewal_threshold: Duration) -> Self {
        Self {
            provider,
            renewal_threshold,
        }
    }

    /// Acquires the lock on `resource` for `duration`.
    ///
    /// Retries a held lease up to [`MAX_ACQUIRE_ATTEMPTS`] times with capped
    /// exponential backoff plus jitter.
    ///
    /// # Errors
    ///
    /// [`Error::LockUnavailable`] once retries are exhausted; any other
    /// provider failure propagates immediately.
    pub async fn acquire(&self, resource: &str, duration: Duration) -> Result<LockHandle> {
        for attempt in 0..MAX_ACQUIRE_ATTEMPTS {
            match self.provider.acquire(resource, duration).await {
                Ok(lease_id) => {
                    return Ok(LockHandle {
                        provider: Arc::clone(&self.provider),
                        resource: resource.to_string(),
                        lease_id,
                        duration,
                        renewal_threshold: self.renewal_threshold,
                        last_renewal: Instant::now(),
                        released: false,
                    });
                }
                Err(Error::LeaseHeld { .. }) => {
                    if attempt + 1 < MAX_ACQUIRE_ATTEMPTS {
                        let backoff = backoff_with_jitter(attempt);
                        debug!(
                            resource,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            "lease held, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }

        Err(Error::LockUnavailable {
            resource: resource.to_string(),
            attempts: MAX_ACQUIRE_ATTEMPTS,
        })
    }
}

/// `min(2000ms, 100ms * 2^attempt)` plus 0-100ms of jitter.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(BACKOFF_CAP_MS);
    // Scoped so the thread-local RNG is not held across an await point.
    let jitter = { rand::thread_rng().gen_range(0..=JITTER_MAX_MS) };
    Duration::from_millis(base + jitter)
}

// =============================================================================
// Lock Handle
// =============================================================================

/// An acquired lease. Renewable, released explicitly or best-effort on drop.
pub struct LockHandle {
    provider: Arc<dyn LeaseProvider>,
    resource: String,
    lease_id: String,
    duration: Duration,
    renewal_threshold: Duration,
    last_renewal: Instant,
    released: bool,
}

impl LockHandle {
    /// The resource this lease covers.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Renews the lease if it is close enough to expiry to need it.
    ///
    /// No-ops unless elapsed time since the last renewal exceeds
    /// `duration - renewal_threshold - 1s`.
    ///
    /// # Errors
    ///
    /// Any renewal failure is mapped to [`Error::LeaseLost`] and is fatal:
    /// the caller must stop writing immediately. Renewal is never retried -
    /// a retry that happened to succeed after the lease had lapsed could let
    /// two writers proceed at once.
    pub async fn renew(&mut self) -> Result<()> {
        let due_after = self
            .duration
            .saturating_sub(self.renewal_threshold + RENEWAL_SAFETY_BUFFER);
        if self.last_renewal.elapsed() <= due_after {
            return Ok(());
        }

        match self
            .provider
            .renew(&self.resource, &self.lease_id, self.duration)
            .await
        {
            Ok(()) => {
                self.last_renewal = Instant::now();
                Ok(())
            }
            Err(err) => {
                warn!(resource = %self.resource, %err, "lease renewal failed, aborting");
                // The lease is gone as far as we are concerned; don't try to
                // release it on drop.
                self.released = true;
                Err(Error::LeaseLost {
                    resource: self.resource.clone(),
                })
            }
        }
    }

    /// Releases the lease, swallowing "already gone" outcomes.
    pub async fn release(mut self) {
        self.release_inner().await;
    }

    async fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self
            .provider
            .release(&self.resource, &self.lease_id)
            .await
        {
            debug!(resource = %self.resource, %err, "best-effort lease release failed");
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let provider = Arc::clone(&self.provider);
        let resource = std::mem::take(&mut self.resource);
        let lease_id = std::mem::take(&mut self.lease_id);
        // Drop is synchronous; hand the release to the runtime if one is
        // still running, otherwise let the lease expire on its own.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = provider.release(&resource, &lease_id).await {
                    debug!(resource = %resource, %err, "lease release on drop failed");
                }
            });
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
