//! Store trait for abstracting where slot records live.

use async_trait::async_trait;
use std::time::{Duration, Instant};

use super::key::StorageKey;
use crate::error::Result;

/// Outcome of an atomic check-then-add on one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotUsage {
    /// Whether a new slot was recorded
    pub admitted: bool,
    /// Live slots for the key before this decision
    pub live: usize,
    /// Expiry of the earliest live slot before this decision
    pub earliest_expiry: Option<Instant>,
}

/// Counting store of slot expiries per key.
///
/// Implementations own every record set. Entries whose expiry is at or
/// before `now` are dead: they are never returned or counted, and stores
/// should drop them when they come across them.
#[async_trait]
pub trait ThrottleStore: Send + Sync {
    /// Live slot expiries for `key`, earliest first.
    async fn get_record(&self, key: &StorageKey, now: Instant) -> Result<Vec<Instant>>;

    /// Record one slot expiring at `now + ttl`.
    async fn add_record(&self, key: &StorageKey, ttl: Duration, now: Instant) -> Result<()>;

    /// Count live slots and record a new one only if fewer than `limit` exist.
    ///
    /// Must be atomic with respect to other calls for the same key: two
    /// concurrent callers may never both observe the last free slot.
    async fn try_acquire(
        &self,
        key: &StorageKey,
        limit: u64,
        ttl: Duration,
        now: Instant,
    ) -> Result<SlotUsage>;
}
