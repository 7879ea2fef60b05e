//! Domain models - core types for the proximity engine
//!
//! This module contains the canonical data types used throughout the system:
//! - `Coordinate` / `haversine_m` - spherical geometry primitives
//! - `GeofenceRegion` - a circular region anchored to an experience
//! - `ProximityNotification` - the append-only dedup/audit record
//! - `LocationUpdate` - one user position report
//! - `EngineError` - error classification for engine operations

pub mod geo;
pub mod region;
pub mod types;
