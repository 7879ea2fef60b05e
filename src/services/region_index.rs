//! In-memory spatial index of active geofence regions
//!
//! A uniform grid bucketed by roughly radius-sized cells. The cell size
//! is `max(largest active radius, cell_floor_m)` so a region's center
//! always lands within one cell-neighbourhood of any point it can
//! contain, which bounds bucket fan-out at query time.
//!
//! Region writes are rare and reads are hot, so the whole index is a
//! copy-on-write snapshot: writers rebuild a fresh `Arc<IndexSnapshot>`
//! under the lock, readers clone the `Arc` and query without holding
//! anything. An in-flight query can never observe a torn entry.
//!
//! The query returns a superset of the regions that might contain the
//! point; the evaluator re-checks the exact `distance <= radius`
//! condition. That two-phase split keeps this structure swappable
//! without touching evaluator logic.

use crate::domain::geo::{Coordinate, METERS_PER_DEGREE};
use crate::domain::region::GeofenceRegion;
use crate::domain::types::{ExperienceId, RegionId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

/// Spatial entry for one active region
#[derive(Debug, Clone)]
pub struct RegionEntry {
    pub id: RegionId,
    pub experience_id: ExperienceId,
    pub center: Coordinate,
    pub radius_m: u32,
}

impl RegionEntry {
    fn from_region(region: &GeofenceRegion) -> Self {
        Self {
            id: region.id,
            experience_id: region.experience_id,
            center: region.center,
            radius_m: region.radius_m,
        }
    }
}

/// Immutable view of the index at one point in time
pub struct IndexSnapshot {
    regions: FxHashMap<RegionId, RegionEntry>,
    buckets: FxHashMap<(i32, i32), SmallVec<[RegionId; 4]>>,
    /// Cell edge length in meters
    cell_m: f64,
    /// Cell edge length in degrees (square cells)
    cell_deg: f64,
    /// Number of longitude cells around the globe, for wraparound
    lon_cells: i32,
    max_radius_m: f64,
}

impl IndexSnapshot {
    fn build(regions: FxHashMap<RegionId, RegionEntry>, cell_floor_m: f64) -> Self {
        let max_radius_m =
            regions.values().map(|e| e.radius_m as f64).fold(0.0, f64::max);
        let cell_m = max_radius_m.max(cell_floor_m);
        let cell_deg = cell_m / METERS_PER_DEGREE;
        let lon_cells = (360.0 / cell_deg).ceil() as i32;

        let mut buckets: FxHashMap<(i32, i32), SmallVec<[RegionId; 4]>> =
            FxHashMap::default();
        for entry in regions.values() {
            let key = cell_of(entry.center, cell_deg, lon_cells);
            buckets.entry(key).or_default().push(entry.id);
        }

        Self { regions, buckets, cell_m, cell_deg, lon_cells, max_radius_m }
    }

    /// Active regions whose center might be within `hint_m` of `point`
    ///
    /// Superset semantics: callers must re-check exact distance.
    pub fn query(&self, point: Coordinate, hint_m: f64) -> SmallVec<[RegionId; 8]> {
        let mut out = SmallVec::new();
        if self.regions.is_empty() {
            return out;
        }

        let (lat_cell, lon_cell) = cell_of(point, self.cell_deg, self.lon_cells);
        let d_lat = (hint_m / self.cell_m).ceil() as i32;

        // Longitude degrees shrink with latitude, so widen the scan there.
        let lat_cos = point.lat().to_radians().cos().max(1e-6);
        let hint_deg_lon = hint_m / (METERS_PER_DEGREE * lat_cos);
        let d_lon = ((hint_deg_lon / self.cell_deg).ceil() as i32).min(self.lon_cells / 2);

        for lat_off in -d_lat..=d_lat {
            for lon_off in -d_lon..=d_lon {
                let key = (
                    lat_cell + lat_off,
                    (lon_cell + lon_off).rem_euclid(self.lon_cells),
                );
                if let Some(ids) = self.buckets.get(&key) {
                    out.extend_from_slice(ids);
                }
            }
        }
        out
    }

    pub fn get(&self, id: RegionId) -> Option<&RegionEntry> {
        self.regions.get(&id)
    }

    pub fn max_radius_m(&self) -> f64 {
        self.max_radius_m
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Grid cell for a coordinate; longitude wraps modulo the globe
fn cell_of(point: Coordinate, cell_deg: f64, lon_cells: i32) -> (i32, i32) {
    let lat_cell = (point.lat() / cell_deg).floor() as i32;
    let lon_cell = ((point.lon() / cell_deg).floor() as i32).rem_euclid(lon_cells);
    (lat_cell, lon_cell)
}

/// Copy-on-write grid index over active regions
pub struct RegionIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    cell_floor_m: f64,
}

impl RegionIndex {
    pub fn new(cell_floor_m: f64) -> Self {
        let empty = IndexSnapshot::build(FxHashMap::default(), cell_floor_m);
        Self { snapshot: RwLock::new(Arc::new(empty)), cell_floor_m }
    }

    /// Replace the whole index from persisted region records (warm-up)
    pub fn rebuild(&self, regions: &[GeofenceRegion]) {
        let mut map = FxHashMap::default();
        for region in regions.iter().filter(|r| r.active) {
            map.insert(region.id, RegionEntry::from_region(region));
        }
        let next = Arc::new(IndexSnapshot::build(map, self.cell_floor_m));
        debug!(regions = %next.len(), cell_m = %next.cell_m, "region_index_rebuilt");
        *self.snapshot.write() = next;
    }

    /// Insert or replace a region's spatial entry
    ///
    /// An inactive region is dropped from the index (retained only in
    /// persistence for audit).
    pub fn upsert(&self, region: &GeofenceRegion) {
        let mut guard = self.snapshot.write();
        let mut map = guard.regions.clone();
        if region.active {
            map.insert(region.id, RegionEntry::from_region(region));
        } else {
            map.remove(&region.id);
        }
        *guard = Arc::new(IndexSnapshot::build(map, self.cell_floor_m));
    }

    pub fn remove(&self, id: RegionId) {
        let mut guard = self.snapshot.write();
        if !guard.regions.contains_key(&id) {
            return;
        }
        let mut map = guard.regions.clone();
        map.remove(&id);
        *guard = Arc::new(IndexSnapshot::build(map, self.cell_floor_m));
    }

    /// Cheap consistent view for one evaluation
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.read().clone()
    }
}
