//! In-process throttle store backed by a sharded concurrent map.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

use super::key::StorageKey;
use super::store::{SlotUsage, ThrottleStore};
use crate::error::{Result, TurnstileError};

/// Reference store keeping slot expiries in process memory.
///
/// Each key maps to its expiries in ascending order. Dead entries are
/// pruned lazily whenever a key is read or acquired; there is no background
/// sweep and no cap on the number of distinct keys.
///
/// The DashMap shard lock held by an entry guard is the critical section
/// for `try_acquire`, so keys in different shards never contend.
#[derive(Debug, Default)]
pub struct InMemoryThrottleStore {
    records: DashMap<StorageKey, VecDeque<Instant>>,
}

impl InMemoryThrottleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding a record set.
    pub fn key_count(&self) -> usize {
        self.records.len()
    }

    /// Drop every record set.
    pub fn clear(&self) {
        self.records.clear();
    }

    fn drop_if_empty(&self, key: &StorageKey) {
        self.records.remove_if(key, |_, slots| slots.is_empty());
    }
}

fn expiry_at(now: Instant, ttl: Duration) -> Result<Instant> {
    now.checked_add(ttl)
        .ok_or_else(|| TurnstileError::Config(format!("ttl of {}s overflows the clock", ttl.as_secs())))
}

fn prune(slots: &mut VecDeque<Instant>, now: Instant) {
    while slots.front().is_some_and(|expiry| *expiry <= now) {
        slots.pop_front();
    }
}

fn insert_sorted(slots: &mut VecDeque<Instant>, expiry: Instant) {
    let pos = slots.partition_point(|existing| *existing <= expiry);
    slots.insert(pos, expiry);
}

#[async_trait]
impl ThrottleStore for InMemoryThrottleStore {
    async fn get_record(&self, key: &StorageKey, now: Instant) -> Result<Vec<Instant>> {
        let live: Vec<Instant> = match self.records.get_mut(key) {
            Some(mut slots) => {
                prune(&mut slots, now);
                slots.iter().copied().collect()
            }
            None => return Ok(Vec::new()),
        };

        if live.is_empty() {
            self.drop_if_empty(key);
        }
        Ok(live)
    }

    async fn add_record(&self, key: &StorageKey, ttl: Duration, now: Instant) -> Result<()> {
        let expiry = expiry_at(now, ttl)?;
        let mut slots = self.records.entry(*key).or_default();
        insert_sorted(&mut slots, expiry);
        Ok(())
    }

    async fn try_acquire(
        &self,
        key: &StorageKey,
        limit: u64,
        ttl: Duration,
        now: Instant,
    ) -> Result<SlotUsage> {
        let expiry = expiry_at(now, ttl)?;

        let usage = {
            let mut slots = self.records.entry(*key).or_default();
            prune(&mut slots, now);

            let live = slots.len();
            let earliest_expiry = slots.front().copied();
            let admitted = (live as u64) < limit;
            if admitted {
                insert_sorted(&mut slots, expiry);
            }

            SlotUsage {
                admitted,
                live,
                earliest_expiry,
            }
        };

        trace!(key = %key, live = usage.live, admitted = usage.admitted, "Slot acquisition");

        if usage.live == 0 && !usage.admitted {
            self.drop_if_empty(key);
        }
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    fn key(identity: &str) -> StorageKey {
        StorageKey::derive(identity, "group-op")
    }

    #[test]
    fn test_get_record_missing_key() {
        let store = InMemoryThrottleStore::new();
        let records = block_on(store.get_record(&key("a"), Instant::now())).unwrap();
        assert!(records.is_empty());
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_records_sorted_and_pruned() {
        let store = InMemoryThrottleStore::new();
        let k = key("a");
        let now = Instant::now();

        block_on(store.add_record(&k, Duration::from_secs(30), now)).unwrap();
        block_on(store.add_record(&k, Duration::from_secs(10), now)).unwrap();
        block_on(store.add_record(&k, Duration::from_secs(20), now)).unwrap();

        let records = block_on(store.get_record(&k, now)).unwrap();
        assert_eq!(
            records,
            vec![
                now + Duration::from_secs(10),
                now + Duration::from_secs(20),
                now + Duration::from_secs(30),
            ]
        );

        // An entry expiring exactly at `now` is already dead
        let later = now + Duration::from_secs(20);
        let records = block_on(store.get_record(&k, later)).unwrap();
        assert_eq!(records, vec![now + Duration::from_secs(30)]);
    }

    #[test]
    fn test_empty_record_sets_are_dropped() {
        let store = InMemoryThrottleStore::new();
        let k = key("a");
        let now = Instant::now();

        block_on(store.add_record(&k, Duration::from_secs(5), now)).unwrap();
        assert_eq!(store.key_count(), 1);

        let records = block_on(store.get_record(&k, now + Duration::from_secs(5))).unwrap();
        assert!(records.is_empty());
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_try_acquire_respects_limit() {
        let store = InMemoryThrottleStore::new();
        let k = key("a");
        let now = Instant::now();
        let ttl = Duration::from_secs(60);

        let first = block_on(store.try_acquire(&k, 2, ttl, now)).unwrap();
        assert!(first.admitted);
        assert_eq!(first.live, 0);
        assert_eq!(first.earliest_expiry, None);

        let second = block_on(store.try_acquire(&k, 2, ttl, now)).unwrap();
        assert!(second.admitted);
        assert_eq!(second.live, 1);
        assert_eq!(second.earliest_expiry, Some(now + ttl));

        let third = block_on(store.try_acquire(&k, 2, ttl, now)).unwrap();
        assert!(!third.admitted);
        assert_eq!(third.live, 2);

        // Rejections do not consume a slot
        assert_eq!(block_on(store.get_record(&k, now)).unwrap().len(), 2);
    }

    #[test]
    fn test_zero_limit_leaves_no_entry() {
        let store = InMemoryThrottleStore::new();
        let usage =
            block_on(store.try_acquire(&key("a"), 0, Duration::from_secs(60), Instant::now()))
                .unwrap();
        assert!(!usage.admitted);
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_ttl_overflow_is_an_error() {
        let store = InMemoryThrottleStore::new();
        let result = block_on(store.add_record(&key("a"), Duration::MAX, Instant::now()));
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_clear() {
        let store = InMemoryThrottleStore::new();
        let now = Instant::now();
        block_on(store.add_record(&key("a"), Duration::from_secs(5), now)).unwrap();
        block_on(store.add_record(&key("b"), Duration::from_secs(5), now)).unwrap();
        assert_eq!(store.key_count(), 2);

        store.clear();
        assert_eq!(store.key_count(), 0);
    }
}
