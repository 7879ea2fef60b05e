//! Delivery channel collaborator
//!
//! The engine's obligation ends at a successful "accepted for
//! delivery" call; push retries and backoff belong to the channel.

use crate::domain::types::{EngineError, ExperienceId, UserId};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Hand a notification to the channel for delivery
    async fn deliver(
        &self,
        user_id: UserId,
        experience_id: ExperienceId,
        distance_m: f64,
    ) -> Result<(), EngineError>;
}

/// Delivery backed by structured logging only, for local runs
#[derive(Default)]
pub struct LogDelivery;

impl LogDelivery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeliveryChannel for LogDelivery {
    async fn deliver(
        &self,
        user_id: UserId,
        experience_id: ExperienceId,
        distance_m: f64,
    ) -> Result<(), EngineError> {
        info!(
            user_id = %user_id,
            experience_id = %experience_id,
            distance_m = %format!("{distance_m:.1}"),
            "notification_delivered"
        );
        Ok(())
    }
}

/// Records deliveries for test assertions; optionally fails every call
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(UserId, ExperienceId, f64)>>,
    fail: bool,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { sent: Mutex::new(Vec::new()), fail: true }
    }

    pub fn sent(&self) -> Vec<(UserId, ExperienceId, f64)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingDelivery {
    async fn deliver(
        &self,
        user_id: UserId,
        experience_id: ExperienceId,
        distance_m: f64,
    ) -> Result<(), EngineError> {
        if self.fail {
            return Err(EngineError::DeliveryChannel("simulated failure".to_string()));
        }
        self.sent.lock().push((user_id, experience_id, distance_m));
        Ok(())
    }
}
