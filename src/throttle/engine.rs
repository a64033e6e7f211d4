//! Core admission engine.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::key::StorageKey;
use super::memory::InMemoryThrottleStore;
use super::policy::Policy;
use super::store::ThrottleStore;
use crate::error::{Result, TurnstileError};

/// Outcome of one admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Enforcement was bypassed; no quota was evaluated
    pub skipped: bool,
    /// Effective limit
    pub limit: u64,
    /// Slots left after this decision
    pub remaining: u64,
    /// Seconds until the earliest live slot expires
    pub reset_secs: u64,
}

impl Verdict {
    fn skipped(policy: &Policy) -> Self {
        Self {
            admitted: true,
            skipped: true,
            limit: policy.limit,
            remaining: policy.limit,
            reset_secs: 0,
        }
    }

    /// Turn a rejection into `ThrottlingExceeded`.
    pub fn into_result(self) -> Result<Self> {
        if self.admitted {
            Ok(self)
        } else {
            Err(TurnstileError::ThrottlingExceeded {
                reset_secs: self.reset_secs,
            })
        }
    }
}

/// Admission engine deciding requests against a throttle store.
///
/// The store and clock are explicit handles; clones of a `Throttler` share
/// both.
#[derive(Clone)]
pub struct Throttler {
    store: Arc<dyn ThrottleStore>,
    clock: Arc<dyn Clock>,
}

impl Throttler {
    /// Create an engine over the given store and clock.
    pub fn new(store: Arc<dyn ThrottleStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create an engine over a fresh in-memory store and the system clock.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryThrottleStore::new()), Arc::new(SystemClock))
    }

    /// Replace the store, keeping the clock.
    pub fn with_store(mut self, store: Arc<dyn ThrottleStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the clock, keeping the store.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Decide whether one more request under `key` fits `policy`.
    ///
    /// An admitted request consumes a slot for `policy.ttl_secs`; a rejected
    /// one does not. Store failures are returned as errors and never turned
    /// into a verdict.
    pub async fn check(&self, key: &StorageKey, policy: &Policy) -> Result<Verdict> {
        if policy.skip {
            trace!(key = %key, "Throttling skipped");
            return Ok(Verdict::skipped(policy));
        }

        let now = self.clock.now();
        let usage = self
            .store
            .try_acquire(key, policy.limit, policy.ttl(), now)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Throttle store failed");
                e
            })?;

        let reset_secs = usage
            .earliest_expiry
            .map(|expiry| ceil_secs(expiry, now))
            .unwrap_or(0);

        if !usage.admitted {
            debug!(
                key = %key,
                limit = policy.limit,
                live = usage.live,
                reset_secs = reset_secs,
                "Rate limit exceeded"
            );
            return Ok(Verdict {
                admitted: false,
                skipped: false,
                limit: policy.limit,
                remaining: 0,
                reset_secs,
            });
        }

        let remaining = policy.limit.saturating_sub(usage.live as u64 + 1);
        trace!(
            key = %key,
            limit = policy.limit,
            remaining = remaining,
            "Request admitted"
        );

        Ok(Verdict {
            admitted: true,
            skipped: false,
            limit: policy.limit,
            remaining,
            reset_secs,
        })
    }
}

fn ceil_secs(expiry: Instant, now: Instant) -> u64 {
    let left = expiry.saturating_duration_since(now);
    if left.subsec_nanos() > 0 {
        left.as_secs() + 1
    } else {
        left.as_secs()
    }
}

impl std::fmt::Debug for Throttler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
