//! Manual operator actions on deliveries.
//!
//! Retry, force-dead, and cancel are synchronous calls from the API adapter.
//! Resets and their fresh outbox entries commit atomically, and every action
//! triggers the event status roll-up afterwards.

use tracing::info;

use crate::{
    error::{CoreError, Result},
    models::{DeliveryId, DeliveryStatus, EventId},
    storage::Storage,
};

/// Reason recorded when an operator cancels a delivery.
const CANCELLED_REASON: &str = "cancelled";

/// Operator-facing delivery operations.
pub struct Operations {
    storage: Storage,
}

impl Operations {
    /// Creates operations over the given storage.
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Retries a single delivery.
    ///
    /// Allowed only from DEAD or FAILED: resets to PENDING with zero
    /// attempts, an immediate next run, cleared error state, and a fresh
    /// outbox entry, all in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown IDs and
    /// `CoreError::InvalidState` when the delivery is not retryable.
    pub async fn retry_delivery(&self, id: DeliveryId) -> Result<u32> {
        let delivery = self
            .storage
            .deliveries
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("delivery {id} not found")))?;

        if delivery.status != DeliveryStatus::Dead && delivery.status != DeliveryStatus::Failed {
            return Err(CoreError::InvalidState(
                "only DEAD or FAILED deliveries can be retried".to_string(),
            ));
        }

        let mut tx = self.storage.pool().begin().await?;
        self.storage.deliveries.reset_for_retry_in_tx(&mut tx, id).await?;
        self.storage.outbox.create_in_tx(&mut tx, id, chrono::Utc::now()).await?;
        tx.commit().await?;

        self.storage.events.recompute_status(delivery.event_id).await?;

        info!(delivery_id = %id, "delivery reset for retry");
        Ok(1)
    }

    /// Retries every dead delivery of an event.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown events and
    /// `CoreError::InvalidState` when the event has no dead deliveries.
    pub async fn retry_event(&self, event_id: EventId) -> Result<u32> {
        self.storage
            .events
            .find_by_id(event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {event_id} not found")))?;

        let dead = self.storage.deliveries.find_dead_by_event(event_id).await?;
        if dead.is_empty() {
            return Err(CoreError::InvalidState(
                "no DEAD deliveries to retry".to_string(),
            ));
        }

        let mut tx = self.storage.pool().begin().await?;
        for delivery in &dead {
            self.storage.deliveries.reset_for_retry_in_tx(&mut tx, delivery.id).await?;
            self.storage.outbox.create_in_tx(&mut tx, delivery.id, chrono::Utc::now()).await?;
        }
        tx.commit().await?;

        self.storage.events.recompute_status(event_id).await?;

        let retried = u32::try_from(dead.len()).unwrap_or(u32::MAX);
        info!(event_id = %event_id, retried, "dead deliveries reset for retry");
        Ok(retried)
    }

    /// Force-marks a delivery dead with an operator-supplied reason.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown IDs.
    pub async fn mark_dead(&self, id: DeliveryId, reason: &str) -> Result<()> {
        let delivery = self
            .storage
            .deliveries
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("delivery {id} not found")))?;

        self.storage.deliveries.force_dead(id, reason).await?;
        self.storage.events.recompute_status(delivery.event_id).await?;

        info!(delivery_id = %id, reason, "delivery force-marked dead");
        Ok(())
    }

    /// Cancels a delivery: force-dead with a fixed reason.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown IDs.
    pub async fn cancel(&self, id: DeliveryId) -> Result<()> {
        self.mark_dead(id, CANCELLED_REASON).await
    }
}
