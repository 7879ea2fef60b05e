//! Geofence region and notification records

use crate::domain::geo::Coordinate;
use crate::domain::types::{EngineError, ExperienceId, RegionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A circular geofence region anchored to an experience
///
/// Immutable once created except for `active`, `center` and `radius_m`;
/// any of those edits must be pushed through the region index so the
/// cached spatial entry is invalidated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceRegion {
    pub id: RegionId,
    pub experience_id: ExperienceId,
    pub center: Coordinate,
    pub radius_m: u32,
    pub active: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeofenceRegion {
    /// Create a region, enforcing `radius_m > 0`
    pub fn new(
        experience_id: ExperienceId,
        center: Coordinate,
        radius_m: u32,
        created_by: UserId,
    ) -> Result<Self, EngineError> {
        if radius_m == 0 {
            return Err(EngineError::InvalidRegion("radius_m must be positive".to_string()));
        }
        let now = Utc::now();
        Ok(Self {
            id: RegionId(Uuid::now_v7()),
            experience_id,
            center,
            radius_m,
            active: true,
            created_by,
            created_at: now,
            updated_at: now,
        })
    }
}

/// The append-only notification record, one per dispatched entry episode
///
/// `notified` means "accepted for processing" by the delivery channel;
/// delivery-level retries are the channel's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityNotification {
    pub id: Uuid,
    pub user_id: UserId,
    pub region_id: RegionId,
    pub experience_id: ExperienceId,
    pub distance_m: f64,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

impl ProximityNotification {
    pub fn new(
        user_id: UserId,
        region_id: RegionId,
        experience_id: ExperienceId,
        distance_m: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            region_id,
            experience_id,
            distance_m,
            notified: true,
            created_at,
        }
    }
}
