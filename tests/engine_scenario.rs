//! End-to-end engine scenarios with in-memory collaborators

use chrono::{Duration, TimeZone, Utc};
use proximity_engine::domain::geo::Coordinate;
use proximity_engine::domain::region::GeofenceRegion;
use proximity_engine::domain::types::{ExperienceId, LocationUpdate, UserId};
use proximity_engine::infra::{Config, Metrics};
use proximity_engine::io::{
    InMemoryNotificationStore, InMemoryRegionStore, RecordingDelivery,
};
use proximity_engine::services::{Engine, EngineCommand, EpisodeStore, RegionIndex, ShardedDedupStore};
use std::sync::Arc;
use uuid::Uuid;

fn build_engine(
    config: Config,
    episodes: Arc<ShardedDedupStore>,
    notifications: Arc<InMemoryNotificationStore>,
    delivery: Arc<RecordingDelivery>,
) -> Engine {
    Engine::new(
        &config,
        Arc::new(RegionIndex::new(config.cell_floor_m())),
        episodes,
        Arc::new(InMemoryRegionStore::new()),
        notifications,
        delivery,
        None,
        Arc::new(Metrics::new()),
    )
}

fn origin_region(radius_m: u32) -> GeofenceRegion {
    GeofenceRegion::new(
        ExperienceId(Uuid::new_v4()),
        Coordinate::new(0.0, 0.0).unwrap(),
        radius_m,
        UserId(Uuid::new_v4()),
    )
    .unwrap()
}

fn at(user: UserId, lon: f64, seq: i64) -> EngineCommand {
    EngineCommand::Location(LocationUpdate {
        user_id: user,
        coordinate: Coordinate::new(0.0, lon).unwrap(),
        timestamp: Utc.timestamp_opt(1_750_000_000, 0).unwrap() + Duration::seconds(seq),
    })
}

/// The full reference walk: approach, enter, dwell, leave past the
/// hysteresis line, and re-enter for a second notification.
#[tokio::test]
async fn test_reference_walk_produces_two_notifications() {
    let episodes = Arc::new(ShardedDedupStore::new(16, Duration::zero()));
    let notifications = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::new());
    let mut engine = build_engine(
        Config::default(),
        episodes.clone(),
        notifications.clone(),
        delivery.clone(),
    );

    let region = origin_region(100);
    let user = UserId(Uuid::new_v4());
    engine.process(EngineCommand::UpsertRegion(region.clone())).await;

    let walk: &[(f64, usize)] = &[
        (0.0009, 0), // ~100m: outside
        (0.0004, 1), // ~44m: inside, notification #1
        (0.0003, 1), // ~33m: inside, suppressed
        (0.0015, 1), // ~167m: outside past hysteresis, episode closed
        (0.0002, 2), // ~22m: re-entry, notification #2
    ];

    for (seq, (lon, expected_total)) in walk.iter().enumerate() {
        engine.process(at(user, *lon, seq as i64)).await;
        assert_eq!(
            notifications.records().len(),
            *expected_total,
            "after lon {lon}"
        );
    }

    let records = notifications.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.notified && r.distance_m <= 100.0));
    assert_eq!(delivery.sent().len(), 2);
    // Both deliveries reference the experience the region is anchored to
    assert!(delivery.sent().iter().all(|(u, e, _)| *u == user && *e == region.experience_id));
}

/// Cool-down: a fast exit/re-entry does not re-notify until the
/// configured gap has passed.
#[tokio::test]
async fn test_renotify_cooldown_gates_reentry() {
    let cooldown_secs = 300;
    let config = Config::default().with_renotify_cooldown_secs(cooldown_secs);
    let episodes = Arc::new(ShardedDedupStore::new(
        16,
        Duration::seconds(cooldown_secs as i64),
    ));
    let notifications = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::new());
    let mut engine = build_engine(config, episodes, notifications.clone(), delivery);

    let region = origin_region(100);
    let user = UserId(Uuid::new_v4());
    engine.process(EngineCommand::UpsertRegion(region)).await;

    engine.process(at(user, 0.0004, 0)).await; // enter: notification #1
    engine.process(at(user, 0.0015, 10)).await; // exit
    engine.process(at(user, 0.0004, 20)).await; // re-enter 10s later: gated
    assert_eq!(notifications.records().len(), 1);

    engine.process(at(user, 0.0015, 30)).await; // exit again
    engine.process(at(user, 0.0004, 400)).await; // re-enter after cool-down
    assert_eq!(notifications.records().len(), 2);
}

/// Concurrency: many racing first-entry attempts on the same key get
/// exactly one open; everyone else is suppressed.
#[test]
fn test_concurrent_first_entries_single_winner() {
    let episodes = Arc::new(ShardedDedupStore::new(16, Duration::zero()));
    let user = UserId(Uuid::new_v4());
    let region = origin_region(100);
    let now = Utc::now();

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let episodes = episodes.clone();
            let region_id = region.id;
            std::thread::spawn(move || episodes.try_open(user, region_id, now).unwrap())
        })
        .collect();

    let wins: usize = handles.into_iter().map(|h| h.join().unwrap() as usize).sum();
    assert_eq!(wins, 1);
    assert_eq!(episodes.open_count(), 1);
}

/// Many users, many regions: each pair notifies independently and
/// exactly once per stay.
#[tokio::test]
async fn test_many_users_many_regions() {
    let episodes = Arc::new(ShardedDedupStore::new(16, Duration::zero()));
    let notifications = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::new());
    let mut engine = build_engine(
        Config::default(),
        episodes.clone(),
        notifications.clone(),
        delivery,
    );

    // Two overlapping regions around the origin
    let near = origin_region(100);
    let wide = origin_region(200);
    engine.process(EngineCommand::UpsertRegion(near.clone())).await;
    engine.process(EngineCommand::UpsertRegion(wide.clone())).await;

    let users: Vec<UserId> = (0..5).map(|_| UserId(Uuid::new_v4())).collect();
    for (i, user) in users.iter().enumerate() {
        // ~44m from the shared center: inside both regions
        engine.process(at(*user, 0.0004, i as i64)).await;
        // Repeat update changes nothing
        engine.process(at(*user, 0.0004, 100 + i as i64)).await;
    }

    // 5 users x 2 regions, one notification each
    assert_eq!(notifications.records().len(), 10);
    assert_eq!(episodes.open_count(), 10);

    // Region-scoped counts
    let for_near = notifications.records().iter().filter(|r| r.region_id == near.id).count();
    assert_eq!(for_near, 5);
}
