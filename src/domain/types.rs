//! Shared types for the proximity engine

use crate::domain::geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Newtype wrapper for user IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UserId(pub Uuid);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for geofence region IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RegionId(pub Uuid);

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for experience IDs (the entity a region is anchored to)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ExperienceId(pub Uuid);

impl std::fmt::Display for ExperienceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One user position report, with the identity already verified upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub user_id: UserId,
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
}

/// Containment classification for a (user, region) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    Outside,
    Inside,
}

impl Containment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Containment::Outside => "outside",
            Containment::Inside => "inside",
        }
    }
}

/// A new entry episode: the user crossed from outside to inside
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySignal {
    pub user_id: UserId,
    pub region_id: RegionId,
    pub experience_id: ExperienceId,
    pub distance_m: f64,
}

/// An episode close: the user left the region (or the region vanished)
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignal {
    pub user_id: UserId,
    pub region_id: RegionId,
    /// True when the close was synthesized because the region was
    /// removed or deactivated while the user was inside it.
    pub region_gone: bool,
}

/// Engine error classification
///
/// Every error is local to one update or one region operation; the
/// engine loop never aborts on any of these.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid coordinate: lat={lat} lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("region not found: {0}")]
    RegionNotFound(RegionId),

    #[error("dedup store unavailable: {0}")]
    DedupStoreUnavailable(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("delivery channel error: {0}")]
    DeliveryChannel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containment_as_str() {
        assert_eq!(Containment::Inside.as_str(), "inside");
        assert_eq!(Containment::Outside.as_str(), "outside");
    }

    #[test]
    fn test_id_display_roundtrip() {
        let raw = Uuid::new_v4();
        let id = RegionId(raw);
        assert_eq!(id.to_string(), raw.to_string());
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::InvalidCoordinate { lat: 91.0, lon: 0.0 };
        assert!(err.to_string().contains("lat=91"));
    }
}
