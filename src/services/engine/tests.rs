//! Engine loop tests with in-memory collaborators

use super::*;
use crate::domain::geo::Coordinate;
use crate::domain::types::{EngineError, ExperienceId, UserId};
use crate::io::delivery::RecordingDelivery;
use crate::io::persistence::{InMemoryNotificationStore, InMemoryRegionStore, NotificationStore};
use crate::services::dedup::{EpisodeStore, ShardedDedupStore};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

struct Harness {
    engine: Engine,
    notifications: Arc<InMemoryNotificationStore>,
    delivery: Arc<RecordingDelivery>,
    episodes: Arc<ShardedDedupStore>,
}

fn harness_with(
    episodes: Arc<dyn EpisodeStore>,
    notifications: Arc<InMemoryNotificationStore>,
    delivery: Arc<RecordingDelivery>,
    concrete_episodes: Arc<ShardedDedupStore>,
) -> Harness {
    let config = Config::default();
    let index = Arc::new(RegionIndex::new(config.cell_floor_m()));
    let engine = Engine::new(
        &config,
        index,
        episodes,
        Arc::new(InMemoryRegionStore::new()),
        notifications.clone(),
        delivery.clone(),
        None,
        Arc::new(Metrics::new()),
    );
    Harness { engine, notifications, delivery, episodes: concrete_episodes }
}

fn harness() -> Harness {
    let episodes = Arc::new(ShardedDedupStore::new(16, chrono::Duration::zero()));
    harness_with(
        episodes.clone(),
        Arc::new(InMemoryNotificationStore::new()),
        Arc::new(RecordingDelivery::new()),
        episodes,
    )
}

fn origin_region() -> GeofenceRegion {
    GeofenceRegion::new(
        ExperienceId(Uuid::new_v4()),
        Coordinate::new(0.0, 0.0).unwrap(),
        100,
        UserId(Uuid::new_v4()),
    )
    .unwrap()
}

fn location(user: UserId, lon: f64, seq: i64) -> EngineCommand {
    EngineCommand::Location(LocationUpdate {
        user_id: user,
        coordinate: Coordinate::new(0.0, lon).unwrap(),
        timestamp: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
    })
}

#[tokio::test]
async fn test_entry_exit_reentry_scenario() {
    let mut h = harness();
    let region = origin_region();
    let user = UserId(Uuid::new_v4());

    h.engine.process(EngineCommand::UpsertRegion(region.clone())).await;

    // ~100m away: outside
    h.engine.process(location(user, 0.0009, 0)).await;
    assert!(h.notifications.records().is_empty());

    // ~44m: inside, notification #1
    h.engine.process(location(user, 0.0004, 1)).await;
    assert_eq!(h.notifications.records().len(), 1);

    // ~33m: still inside, no new notification
    h.engine.process(location(user, 0.0003, 2)).await;
    assert_eq!(h.notifications.records().len(), 1);

    // ~167m: beyond the 110m hysteresis line, episode closed
    h.engine.process(location(user, 0.0015, 3)).await;
    assert_eq!(h.episodes.open_count(), 0);

    // ~22m: re-entry, notification #2
    h.engine.process(location(user, 0.0002, 4)).await;
    assert_eq!(h.notifications.records().len(), 2);

    let records = h.notifications.records();
    for rec in &records {
        assert_eq!(rec.user_id, user);
        assert_eq!(rec.region_id, region.id);
        assert!(rec.distance_m <= region.radius_m as f64);
        assert!(rec.notified);
    }
    assert_eq!(h.delivery.sent().len(), 2);
}

#[tokio::test]
async fn test_single_stay_single_notification() {
    let mut h = harness();
    let region = origin_region();
    let user = UserId(Uuid::new_v4());

    h.engine.process(EngineCommand::UpsertRegion(region)).await;

    // A long uninterrupted stay inside, with boundary jitter
    let walk = [0.0004, 0.0003, 0.00085, 0.00094, 0.0005, 0.0001, 0.0008];
    for (i, lon) in walk.iter().enumerate() {
        h.engine.process(location(user, *lon, i as i64)).await;
    }

    assert_eq!(h.notifications.records().len(), 1);
    assert_eq!(h.delivery.sent().len(), 1);
}

#[tokio::test]
async fn test_delivery_failure_keeps_persisted_record() {
    let episodes = Arc::new(ShardedDedupStore::new(16, chrono::Duration::zero()));
    let mut h = harness_with(
        episodes.clone(),
        Arc::new(InMemoryNotificationStore::new()),
        Arc::new(RecordingDelivery::failing()),
        episodes,
    );
    let region = origin_region();
    let user = UserId(Uuid::new_v4());

    h.engine.process(EngineCommand::UpsertRegion(region)).await;
    h.engine.process(location(user, 0.0004, 0)).await;

    // Record persisted with notified=true; only delivery failed
    let records = h.notifications.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].notified);
    assert!(h.delivery.sent().is_empty());

    // Episode stays open: no duplicate on the next update
    h.engine.process(location(user, 0.0003, 1)).await;
    assert_eq!(h.notifications.records().len(), 1);
}

/// Episode store that fails its first try_open, then delegates
struct FlakyEpisodeStore {
    inner: ShardedDedupStore,
    failed_once: AtomicBool,
}

impl EpisodeStore for FlakyEpisodeStore {
    fn try_open(
        &self,
        user_id: UserId,
        region_id: crate::domain::types::RegionId,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(EngineError::DedupStoreUnavailable("transaction aborted".to_string()));
        }
        self.inner.try_open(user_id, region_id, now)
    }

    fn close(
        &self,
        user_id: UserId,
        region_id: crate::domain::types::RegionId,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.inner.close(user_id, region_id, now)
    }

    fn rollback(
        &self,
        user_id: UserId,
        region_id: crate::domain::types::RegionId,
    ) -> Result<(), EngineError> {
        self.inner.rollback(user_id, region_id)
    }
}

#[tokio::test]
async fn test_dedup_unavailable_fails_closed_then_retries() {
    let flaky = Arc::new(FlakyEpisodeStore {
        inner: ShardedDedupStore::new(16, chrono::Duration::zero()),
        failed_once: AtomicBool::new(false),
    });
    let episodes = Arc::new(ShardedDedupStore::new(16, chrono::Duration::zero()));
    let mut h = harness_with(
        flaky,
        Arc::new(InMemoryNotificationStore::new()),
        Arc::new(RecordingDelivery::new()),
        episodes,
    );
    let region = origin_region();
    let user = UserId(Uuid::new_v4());

    h.engine.process(EngineCommand::UpsertRegion(region)).await;

    // First inside update hits the store failure: no notification
    h.engine.process(location(user, 0.0004, 0)).await;
    assert!(h.notifications.records().is_empty());

    // The next update retries the whole entry and succeeds
    h.engine.process(location(user, 0.0004, 1)).await;
    assert_eq!(h.notifications.records().len(), 1);
}

/// Notification store whose inserts always fail
struct FailingNotificationStore;

#[async_trait]
impl NotificationStore for FailingNotificationStore {
    async fn insert(
        &self,
        _record: crate::domain::region::ProximityNotification,
    ) -> Result<(), EngineError> {
        Err(EngineError::Persistence("disk full".to_string()))
    }
}

#[tokio::test]
async fn test_persist_failure_rolls_back_episode() {
    let episodes = Arc::new(ShardedDedupStore::new(16, chrono::Duration::zero()));
    let config = Config::default();
    let index = Arc::new(RegionIndex::new(config.cell_floor_m()));
    let delivery = Arc::new(RecordingDelivery::new());
    let mut engine = Engine::new(
        &config,
        index,
        episodes.clone(),
        Arc::new(InMemoryRegionStore::new()),
        Arc::new(FailingNotificationStore),
        delivery.clone(),
        None,
        Arc::new(Metrics::new()),
    );
    let region = origin_region();
    let user = UserId(Uuid::new_v4());

    engine.process(EngineCommand::UpsertRegion(region)).await;
    engine.process(location(user, 0.0004, 0)).await;

    // Nothing delivered and the episode was rolled back for retry
    assert!(delivery.sent().is_empty());
    assert_eq!(episodes.open_count(), 0);
}

/// Notification store that fails only its first insert
struct FailOnceNotificationStore {
    inner: InMemoryNotificationStore,
    failed_once: AtomicBool,
}

#[async_trait]
impl NotificationStore for FailOnceNotificationStore {
    async fn insert(
        &self,
        record: crate::domain::region::ProximityNotification,
    ) -> Result<(), EngineError> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Persistence("disk full".to_string()));
        }
        self.inner.insert(record).await
    }
}

#[tokio::test]
async fn test_persist_retry_not_gated_by_cooldown() {
    let cooldown_secs: u64 = 300;
    let config = Config::default().with_renotify_cooldown_secs(cooldown_secs);
    let episodes = Arc::new(ShardedDedupStore::new(
        16,
        chrono::Duration::seconds(cooldown_secs as i64),
    ));
    let store = Arc::new(FailOnceNotificationStore {
        inner: InMemoryNotificationStore::new(),
        failed_once: AtomicBool::new(false),
    });
    let index = Arc::new(RegionIndex::new(config.cell_floor_m()));
    let delivery = Arc::new(RecordingDelivery::new());
    let mut engine = Engine::new(
        &config,
        index,
        episodes.clone(),
        Arc::new(InMemoryRegionStore::new()),
        store.clone(),
        delivery,
        None,
        Arc::new(Metrics::new()),
    );
    let region = origin_region();
    let user = UserId(Uuid::new_v4());

    engine.process(EngineCommand::UpsertRegion(region)).await;

    // First inside update: persist fails, episode rolled back
    engine.process(location(user, 0.0004, 0)).await;
    assert!(store.inner.records().is_empty());
    assert_eq!(episodes.open_count(), 0);

    // A few seconds later, still inside: the retry must not be
    // treated as a re-entry within the cool-down
    engine.process(location(user, 0.0004, 5)).await;
    assert_eq!(store.inner.records().len(), 1);
    assert_eq!(episodes.open_count(), 1);
}

#[tokio::test]
async fn test_remove_unknown_region_reports_not_found() {
    let mut h = harness();
    let id = crate::domain::types::RegionId(Uuid::new_v4());

    let err = h.engine.deactivate_region(id).await.unwrap_err();
    assert!(matches!(err, EngineError::RegionNotFound(_)));

    // The remove command itself tolerates the unknown id
    h.engine.process(EngineCommand::RemoveRegion(id)).await;
}

#[tokio::test]
async fn test_region_removed_while_user_inside() {
    let mut h = harness();
    let region = origin_region();
    let user = UserId(Uuid::new_v4());

    h.engine.process(EngineCommand::UpsertRegion(region.clone())).await;
    h.engine.process(location(user, 0.0004, 0)).await;
    assert_eq!(h.episodes.open_count(), 1);

    h.engine.process(EngineCommand::RemoveRegion(region.id)).await;

    // Next update synthesizes a silent close
    h.engine.process(location(user, 0.0004, 1)).await;
    assert_eq!(h.episodes.open_count(), 0);
    assert_eq!(h.notifications.records().len(), 1);
}

#[tokio::test]
async fn test_deactivated_region_stops_matching() {
    let mut h = harness();
    let mut region = origin_region();
    let user = UserId(Uuid::new_v4());

    h.engine.process(EngineCommand::UpsertRegion(region.clone())).await;
    region.active = false;
    h.engine.process(EngineCommand::UpsertRegion(region)).await;

    h.engine.process(location(user, 0.0004, 0)).await;
    assert!(h.notifications.records().is_empty());
}

#[tokio::test]
async fn test_updates_for_different_users_independent() {
    let mut h = harness();
    let region = origin_region();
    let alice = UserId(Uuid::new_v4());
    let bob = UserId(Uuid::new_v4());

    h.engine.process(EngineCommand::UpsertRegion(region)).await;
    h.engine.process(location(alice, 0.0004, 0)).await;
    h.engine.process(location(bob, 0.0004, 1)).await;

    assert_eq!(h.notifications.records().len(), 2);
    assert_eq!(h.episodes.open_count(), 2);
}
