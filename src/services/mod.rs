//! Services - business logic and state management
//!
//! This module contains the core engine services:
//! - `engine` - Central command loop and side-effect orchestration
//! - `evaluator` - Containment classification and transition detection
//! - `region_index` - Copy-on-write grid index over active regions
//! - `dedup` - Atomic per-key episode gate (at-most-one notification)

pub mod dedup;
pub mod engine;
pub mod evaluator;
pub mod region_index;

// Re-export commonly used types
pub use dedup::{EpisodeStore, ShardedDedupStore};
pub use engine::{Engine, EngineCommand};
pub use evaluator::Evaluator;
pub use region_index::RegionIndex;
