//! Notification dedup store - at-most-one notification per entry episode
//!
//! The single correctness-critical operation in the engine is the
//! atomic check-and-set on a (user, region) key: of N concurrent
//! updates all reporting "inside" for the first time, exactly one may
//! proceed to notify. The store shards its keys across independently
//! locked maps so updates for different keys never contend on a global
//! lock; serialization exists only per key, which is exactly what the
//! invariant needs.
//!
//! A persistence-backed implementation (unique-constraint insert-or-
//! reject) can stand in behind the same trait; it signals transaction
//! failure as `DedupStoreUnavailable` and the engine fails closed.

use crate::domain::types::{EngineError, RegionId, UserId};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Atomic per-key episode gate
pub trait EpisodeStore: Send + Sync {
    /// Atomically open an episode if none is open for the key.
    ///
    /// Returns `Ok(true)` when the caller may notify, `Ok(false)` when
    /// an episode is already open (or was closed within the re-notify
    /// cool-down) and the caller must suppress.
    fn try_open(
        &self,
        user_id: UserId,
        region_id: RegionId,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError>;

    /// Close the open episode for the key, if any.
    fn close(
        &self,
        user_id: UserId,
        region_id: RegionId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Revert a `try_open` whose side effects never happened.
    ///
    /// Unlike `close`, no close time is stamped, so the re-notify
    /// cool-down cannot gate the retry.
    fn rollback(&self, user_id: UserId, region_id: RegionId) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy)]
struct EpisodeSlot {
    open: bool,
    closed_at: Option<DateTime<Utc>>,
}

/// In-memory episode store with sharded per-key locking
pub struct ShardedDedupStore {
    shards: Vec<Mutex<FxHashMap<(UserId, RegionId), EpisodeSlot>>>,
    /// Minimum gap between closing an episode and opening the next one
    /// for the same key; zero disables the cool-down.
    renotify_cooldown: Duration,
}

impl ShardedDedupStore {
    pub fn new(shard_count: usize, renotify_cooldown: Duration) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect();
        Self { shards, renotify_cooldown }
    }

    fn shard(&self, user_id: UserId, region_id: RegionId) -> &Mutex<FxHashMap<(UserId, RegionId), EpisodeSlot>> {
        let mut hasher = rustc_hash::FxHasher::default();
        (user_id, region_id).hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Number of currently open episodes (test/metrics visibility)
    pub fn open_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().values().filter(|slot| slot.open).count())
            .sum()
    }
}

impl EpisodeStore for ShardedDedupStore {
    fn try_open(
        &self,
        user_id: UserId,
        region_id: RegionId,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let mut map = self.shard(user_id, region_id).lock();
        let slot = map
            .entry((user_id, region_id))
            .or_insert(EpisodeSlot { open: false, closed_at: None });

        if slot.open {
            return Ok(false);
        }
        if !self.renotify_cooldown.is_zero() {
            if let Some(closed_at) = slot.closed_at {
                if now - closed_at < self.renotify_cooldown {
                    debug!(user_id = %user_id, region_id = %region_id, "episode_in_cooldown");
                    return Ok(false);
                }
            }
        }

        slot.open = true;
        Ok(true)
    }

    fn close(
        &self,
        user_id: UserId,
        region_id: RegionId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut map = self.shard(user_id, region_id).lock();
        if let Some(slot) = map.get_mut(&(user_id, region_id)) {
            if slot.open {
                slot.open = false;
                slot.closed_at = Some(now);
            }
        }
        Ok(())
    }

    fn rollback(&self, user_id: UserId, region_id: RegionId) -> Result<(), EngineError> {
        let mut map = self.shard(user_id, region_id).lock();
        if let Some(slot) = map.get_mut(&(user_id, region_id)) {
            // Any earlier close time is kept; only the open is undone
            slot.open = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    fn key() -> (UserId, RegionId) {
        (UserId(Uuid::new_v4()), RegionId(Uuid::new_v4()))
    }

    #[test]
    fn test_first_open_succeeds_second_suppressed() {
        let store = ShardedDedupStore::new(16, Duration::zero());
        let (user, region) = key();
        let now = Utc::now();

        assert!(store.try_open(user, region, now).unwrap());
        assert!(!store.try_open(user, region, now).unwrap());
        assert_eq!(store.open_count(), 1);
    }

    #[test]
    fn test_close_allows_reopen() {
        let store = ShardedDedupStore::new(16, Duration::zero());
        let (user, region) = key();
        let now = Utc::now();

        assert!(store.try_open(user, region, now).unwrap());
        store.close(user, region, now).unwrap();
        assert!(store.try_open(user, region, now).unwrap());
    }

    #[test]
    fn test_close_without_open_is_noop() {
        let store = ShardedDedupStore::new(16, Duration::zero());
        let (user, region) = key();

        store.close(user, region, Utc::now()).unwrap();
        assert!(store.try_open(user, region, Utc::now()).unwrap());
    }

    #[test]
    fn test_cooldown_suppresses_reopen() {
        let store = ShardedDedupStore::new(16, Duration::seconds(60));
        let (user, region) = key();
        let t0 = Utc::now();

        assert!(store.try_open(user, region, t0).unwrap());
        store.close(user, region, t0).unwrap();

        // 30s after the close: still in cool-down
        assert!(!store.try_open(user, region, t0 + Duration::seconds(30)).unwrap());
        // 61s after: cool-down elapsed
        assert!(store.try_open(user, region, t0 + Duration::seconds(61)).unwrap());
    }

    #[test]
    fn test_rollback_not_gated_by_cooldown() {
        let store = ShardedDedupStore::new(16, Duration::seconds(60));
        let (user, region) = key();
        let t0 = Utc::now();

        assert!(store.try_open(user, region, t0).unwrap());
        store.rollback(user, region).unwrap();
        assert_eq!(store.open_count(), 0);

        // Immediately reopenable: rollback stamped no close time
        assert!(store.try_open(user, region, t0 + Duration::seconds(1)).unwrap());
    }

    #[test]
    fn test_rollback_keeps_earlier_close_time() {
        let store = ShardedDedupStore::new(16, Duration::seconds(60));
        let (user, region) = key();
        let t0 = Utc::now();

        assert!(store.try_open(user, region, t0).unwrap());
        store.close(user, region, t0).unwrap();

        // A later open past the cool-down, rolled back
        let t1 = t0 + Duration::seconds(61);
        assert!(store.try_open(user, region, t1).unwrap());
        store.rollback(user, region).unwrap();

        // The original close time still stands; t1 retry is not gated
        assert!(store.try_open(user, region, t1 + Duration::seconds(1)).unwrap());
    }

    #[test]
    fn test_keys_are_independent() {
        let store = ShardedDedupStore::new(16, Duration::zero());
        let (user, region_a) = key();
        let region_b = RegionId(Uuid::new_v4());
        let now = Utc::now();

        assert!(store.try_open(user, region_a, now).unwrap());
        assert!(store.try_open(user, region_b, now).unwrap());
        assert_eq!(store.open_count(), 2);
    }

    #[test]
    fn test_concurrent_opens_exactly_one_winner() {
        let store = Arc::new(ShardedDedupStore::new(16, Duration::zero()));
        let (user, region) = key();
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.try_open(user, region, now).unwrap()
            }));
        }

        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }
}
