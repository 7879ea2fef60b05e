//! Command handlers for the Engine
//!
//! Each handler processes one command kind, updating presence state,
//! the episode gate, and triggering side effects (persistence,
//! delivery, audit).

use super::Engine;
use crate::domain::region::{GeofenceRegion, ProximityNotification};
use crate::domain::types::{EngineError, EntrySignal, LocationUpdate, RegionId};
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, error, info, warn};

impl Engine {
    /// Handle one location update
    pub(crate) async fn handle_location(&mut self, update: LocationUpdate) {
        let process_start = Instant::now();

        let snapshot = self.index.snapshot();
        let evaluation = self.evaluator.evaluate(&update, &snapshot);

        for exit in &evaluation.exits {
            match self.episodes.close(exit.user_id, exit.region_id, update.timestamp) {
                Ok(()) => {
                    self.metrics.record_episode_closed();
                    info!(
                        user_id = %exit.user_id,
                        region_id = %exit.region_id,
                        region_gone = %exit.region_gone,
                        "episode_closed"
                    );
                }
                Err(e) => {
                    warn!(
                        user_id = %exit.user_id,
                        region_id = %exit.region_id,
                        error = %e,
                        "episode_close_failed"
                    );
                }
            }
        }

        for entry in &evaluation.entries {
            self.handle_entry(entry, update.timestamp).await;
        }

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_update_processed(latency_us);
    }

    /// Handle one new-entry signal: gate, persist, deliver, audit
    async fn handle_entry(&mut self, entry: &EntrySignal, timestamp: DateTime<Utc>) {
        match self.episodes.try_open(entry.user_id, entry.region_id, timestamp) {
            Ok(true) => {}
            Ok(false) => {
                self.metrics.record_suppressed();
                debug!(
                    user_id = %entry.user_id,
                    region_id = %entry.region_id,
                    "notification_suppressed"
                );
                return;
            }
            Err(e) => {
                // Fail closed: no notification, and forget the inside
                // state so the next update retries the whole entry.
                self.metrics.record_dedup_failure();
                self.evaluator.reset_pair(entry.user_id, entry.region_id);
                warn!(
                    user_id = %entry.user_id,
                    region_id = %entry.region_id,
                    error = %e,
                    "dedup_store_unavailable"
                );
                return;
            }
        }

        let record = ProximityNotification::new(
            entry.user_id,
            entry.region_id,
            entry.experience_id,
            entry.distance_m,
            timestamp,
        );

        if let Err(e) = self.notifications.insert(record.clone()).await {
            // Roll back the episode so a later update can retry; a
            // close would stamp a close time and the cool-down would
            // gate that retry.
            self.metrics.record_persistence_failure();
            self.evaluator.reset_pair(entry.user_id, entry.region_id);
            let _ = self.episodes.rollback(entry.user_id, entry.region_id);
            error!(
                user_id = %entry.user_id,
                region_id = %entry.region_id,
                error = %e,
                "notification_persist_failed"
            );
            return;
        }

        if let Err(e) = self
            .delivery
            .deliver(entry.user_id, entry.experience_id, entry.distance_m)
            .await
        {
            // The record stays persisted; delivery retries are the
            // channel's responsibility.
            self.metrics.record_delivery_failure();
            warn!(
                user_id = %entry.user_id,
                experience_id = %entry.experience_id,
                error = %e,
                "delivery_channel_failed"
            );
        }

        if let Some(ref audit) = self.audit {
            audit.write(&record);
        }

        self.metrics.record_notification_sent();
        info!(
            user_id = %entry.user_id,
            region_id = %entry.region_id,
            experience_id = %entry.experience_id,
            distance_m = %format!("{:.1}", entry.distance_m),
            "notification_sent"
        );
    }

    /// Handle a region create or edit
    pub(crate) async fn handle_upsert_region(&mut self, region: GeofenceRegion) {
        if let Err(e) = self.regions.upsert(region.clone()).await {
            error!(region_id = %region.id, error = %e, "region_persist_failed");
            return;
        }
        self.index.upsert(&region);
        info!(
            region_id = %region.id,
            experience_id = %region.experience_id,
            radius_m = %region.radius_m,
            active = %region.active,
            "region_upserted"
        );
    }

    /// Handle a region removal: drop the index entry and deactivate
    /// the persisted record (retained for audit)
    pub(crate) async fn handle_remove_region(&mut self, region_id: RegionId) {
        self.index.remove(region_id);

        match self.deactivate_region(region_id).await {
            Ok(()) => {}
            Err(EngineError::RegionNotFound(_)) => {
                // Tolerated: removal of an unknown or already-removed id
                debug!(region_id = %region_id, "region_remove_unknown_id");
            }
            Err(e) => {
                error!(region_id = %region_id, error = %e, "region_deactivate_failed");
            }
        }

        info!(region_id = %region_id, "region_removed");
    }

    /// Deactivate the persisted record for a removed region
    pub(crate) async fn deactivate_region(&mut self, region_id: RegionId) -> Result<(), EngineError> {
        let Some(mut region) = self.regions.get(region_id).await? else {
            return Err(EngineError::RegionNotFound(region_id));
        };
        region.active = false;
        region.updated_at = Utc::now();
        self.regions.upsert(region).await
    }
}
