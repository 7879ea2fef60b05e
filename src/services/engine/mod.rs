//! Engine loop - orchestrates evaluation, dedup, delivery, persistence
//!
//! The engine is the single consumer of the command channel. For each
//! location update it drives: index snapshot -> evaluator -> episode
//! close for exits -> atomic episode open for entries -> persist the
//! notification record -> delivery channel -> audit trail. Region
//! lifecycle commands ride the same channel, so index writes are
//! serialized with this consumer while query readers stay on
//! copy-on-write snapshots.
//!
//! Every failure is local to one update or one region operation; the
//! loop never aborts on a per-command error.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::region::GeofenceRegion;
use crate::domain::types::{LocationUpdate, RegionId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::audit::AuditLog;
use crate::io::delivery::DeliveryChannel;
use crate::io::persistence::{NotificationStore, RegionStore};
use crate::services::dedup::EpisodeStore;
use crate::services::evaluator::Evaluator;
use crate::services::region_index::RegionIndex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::info;

/// Commands consumed by the engine loop
#[derive(Debug)]
pub enum EngineCommand {
    /// One verified location update
    Location(LocationUpdate),
    /// Region created or edited (center/radius/active changes included)
    UpsertRegion(GeofenceRegion),
    /// Region deleted; deactivates the persisted record
    RemoveRegion(RegionId),
}

/// Central processor for location updates and region lifecycle
pub struct Engine {
    /// Per-(user, region) containment working memory
    pub(crate) evaluator: Evaluator,
    /// Spatial index over active regions
    pub(crate) index: Arc<RegionIndex>,
    /// Atomic per-key episode gate
    pub(crate) episodes: Arc<dyn EpisodeStore>,
    /// Region persistence collaborator
    pub(crate) regions: Arc<dyn RegionStore>,
    /// Append-only notification persistence
    pub(crate) notifications: Arc<dyn NotificationStore>,
    /// Push/in-app delivery collaborator
    pub(crate) delivery: Arc<dyn DeliveryChannel>,
    /// Optional JSONL audit trail
    pub(crate) audit: Option<AuditLog>,
    /// Metrics collector
    pub(crate) metrics: Arc<Metrics>,
    metrics_interval_secs: u64,
}

impl Engine {
    pub fn new(
        config: &Config,
        index: Arc<RegionIndex>,
        episodes: Arc<dyn EpisodeStore>,
        regions: Arc<dyn RegionStore>,
        notifications: Arc<dyn NotificationStore>,
        delivery: Arc<dyn DeliveryChannel>,
        audit: Option<AuditLog>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            evaluator: Evaluator::new(config.exit_factor(), config.hint_cap_m()),
            index,
            episodes,
            regions,
            notifications,
            delivery,
            audit,
            metrics,
            metrics_interval_secs: config.metrics_interval_secs(),
        }
    }

    /// Rebuild the spatial index from persisted regions
    pub async fn warm_up(&mut self) -> Result<(), crate::domain::types::EngineError> {
        let regions = self.regions.load_active().await?;
        info!(regions = %regions.len(), "engine_warm_up");
        self.index.rebuild(&regions);
        Ok(())
    }

    /// Consume commands until the channel closes
    pub async fn run(&mut self, mut command_rx: mpsc::Receiver<EngineCommand>) {
        let mut report_interval = interval(Duration::from_secs(self.metrics_interval_secs.max(1)));

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(c) => self.process(c).await,
                        None => break,
                    }
                }
                _ = report_interval.tick() => {
                    let summary = self
                        .metrics
                        .report(self.index.snapshot().len(), self.evaluator.tracked_pairs());
                    summary.log();
                }
            }
        }

        info!("engine_channel_closed");
    }

    /// Process a single command, dispatching to the appropriate handler
    pub async fn process(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Location(update) => self.handle_location(update).await,
            EngineCommand::UpsertRegion(region) => self.handle_upsert_region(region).await,
            EngineCommand::RemoveRegion(id) => self.handle_remove_region(id).await,
        }
    }
}
