//! Persistence collaborators
//!
//! The engine never talks to a database directly; it goes through
//! these traits. `RegionStore` feeds the spatial index (warm-up and
//! lifecycle writes); `NotificationStore` takes append-only inserts of
//! dispatched notification records. In-memory implementations back
//! tests and local runs.

use crate::domain::region::{GeofenceRegion, ProximityNotification};
use crate::domain::types::{EngineError, RegionId};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// CRUD over persisted geofence regions
#[async_trait]
pub trait RegionStore: Send + Sync {
    /// All active regions, for index warm-up at startup
    async fn load_active(&self) -> Result<Vec<GeofenceRegion>, EngineError>;

    async fn upsert(&self, region: GeofenceRegion) -> Result<(), EngineError>;

    async fn get(&self, id: RegionId) -> Result<Option<GeofenceRegion>, EngineError>;
}

/// Append-only insert of notification records
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, record: ProximityNotification) -> Result<(), EngineError>;
}

/// In-memory region store
#[derive(Default)]
pub struct InMemoryRegionStore {
    regions: Mutex<FxHashMap<RegionId, GeofenceRegion>>,
}

impl InMemoryRegionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_regions(regions: Vec<GeofenceRegion>) -> Self {
        let store = Self::new();
        let mut map = store.regions.lock();
        for region in regions {
            map.insert(region.id, region);
        }
        drop(map);
        store
    }
}

#[async_trait]
impl RegionStore for InMemoryRegionStore {
    async fn load_active(&self) -> Result<Vec<GeofenceRegion>, EngineError> {
        Ok(self.regions.lock().values().filter(|r| r.active).cloned().collect())
    }

    async fn upsert(&self, region: GeofenceRegion) -> Result<(), EngineError> {
        self.regions.lock().insert(region.id, region);
        Ok(())
    }

    async fn get(&self, id: RegionId) -> Result<Option<GeofenceRegion>, EngineError> {
        Ok(self.regions.lock().get(&id).cloned())
    }
}

/// In-memory notification store; keeps records for test assertions
#[derive(Default)]
pub struct InMemoryNotificationStore {
    records: Mutex<Vec<ProximityNotification>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ProximityNotification> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, record: ProximityNotification) -> Result<(), EngineError> {
        self.records.lock().push(record);
        Ok(())
    }
}
