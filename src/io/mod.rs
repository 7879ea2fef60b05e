//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `ingest` - HTTP ingress for location updates (verified identity)
//! - `persistence` - Region and notification store collaborators
//! - `delivery` - Push/in-app delivery channel collaborator
//! - `audit` - Notification audit trail (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod audit;
pub mod delivery;
pub mod ingest;
pub mod persistence;
pub mod prometheus;

// Re-export commonly used types
pub use audit::AuditLog;
pub use delivery::{DeliveryChannel, LogDelivery, RecordingDelivery};
pub use ingest::{start_ingest_server, AuthVerifier, IngestServerConfig, StaticTokenAuth};
pub use persistence::{
    InMemoryNotificationStore, InMemoryRegionStore, NotificationStore, RegionStore,
};
