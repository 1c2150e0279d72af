//! Event ingestion with idempotent fan-out.
//!
//! Creating an event resolves its matching enabled subscriptions and writes
//! the event, one delivery per match, and one outbox entry per delivery in a
//! single transaction. Duplicate submissions (same idempotency key) return
//! the existing event unchanged with no new side effects.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    error::{CoreError, Result},
    models::{
        Delivery, DeliveryId, Event, EventId, EventPayload, EventStatus, DeliveryStatus,
    },
    storage::Storage,
    time::Clock,
};

/// Inbound event creation request.
#[derive(Debug, Clone)]
pub struct CreateEvent {
    /// Event type used for subscription matching.
    pub event_type: String,

    /// Client-supplied event ID, usable as the idempotency key when no
    /// explicit key is given.
    pub event_id: Option<String>,

    /// When the event occurred. Defaults to ingestion time.
    pub created_at: Option<DateTime<Utc>>,

    /// Business payload.
    pub data: Value,

    /// Optional caller metadata.
    pub metadata: Option<Value>,
}

/// Result of an ingestion call.
///
/// `status` reflects the just-computed state, not the asynchronously-visible
/// database value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// ID of the created (or previously existing) event.
    pub event_id: EventId,

    /// Roll-up status at creation time.
    pub status: EventStatus,

    /// Whether an existing event was returned instead of creating one.
    pub deduplicated: bool,
}

/// Resolves the idempotency key from an explicit key or the client event ID.
///
/// The explicit key wins when both are present. Whitespace-only values count
/// as absent.
pub fn resolve_event_key(
    idempotency_key: Option<&str>,
    client_event_id: Option<&str>,
) -> Option<String> {
    idempotency_key
        .or(client_event_id)
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// Idempotently creates events and fans them out into deliveries and outbox
/// entries.
pub struct EventIngestor {
    storage: Storage,
    clock: Arc<dyn Clock>,
}

impl EventIngestor {
    /// Creates a new ingestor over the given storage.
    pub fn new(storage: Storage, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Creates an event and fans it out to matching subscriptions.
    ///
    /// Requires an idempotency key: either `idempotency_key` or the request's
    /// `event_id`. A previously seen key returns the existing event with
    /// `deduplicated = true` and no new writes. Concurrent duplicate
    /// submissions race on the unique key; the loser re-reads the winner's
    /// event.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when no key is resolvable, or a
    /// database error when the transaction fails.
    pub async fn create_event(
        &self,
        request: CreateEvent,
        idempotency_key: Option<&str>,
    ) -> Result<IngestOutcome> {
        let event_key = resolve_event_key(idempotency_key, request.event_id.as_deref())
            .ok_or_else(|| {
                CoreError::InvalidInput(
                    "provide an Idempotency-Key header or eventId in the body".to_string(),
                )
            })?;

        if let Some(existing) = self.storage.events.find_by_key(&event_key).await? {
            debug!(event_id = %existing.id, event_key = %event_key, "duplicate event key, returning existing");
            return Ok(IngestOutcome {
                event_id: existing.id,
                status: existing.status,
                deduplicated: true,
            });
        }

        let subscriptions =
            self.storage.subscriptions.find_enabled_matching(&request.event_type).await?;

        let now = self.clock.now_utc();
        let event = Event {
            id: EventId::new(),
            event_key: event_key.clone(),
            event_type: request.event_type.clone(),
            payload: sqlx::types::Json(EventPayload {
                data: request.data,
                metadata: request.metadata,
            }),
            status: EventStatus::Pending,
            created_at: request.created_at.unwrap_or(now),
            updated_at: now,
        };

        let mut tx = self.storage.pool().begin().await?;

        if let Err(err) = self.storage.events.create_in_tx(&mut tx, &event).await {
            tx.rollback().await?;
            if err.is_unique_violation() {
                // Lost the race against a concurrent duplicate; the winner's
                // row is now visible.
                let existing = self
                    .storage
                    .events
                    .find_by_key(&event_key)
                    .await?
                    .ok_or(err)?;
                return Ok(IngestOutcome {
                    event_id: existing.id,
                    status: existing.status,
                    deduplicated: true,
                });
            }
            return Err(err);
        }

        for subscription in &subscriptions {
            let delivery = Delivery {
                id: DeliveryId::new(),
                event_id: event.id,
                subscription_id: subscription.id,
                status: DeliveryStatus::Pending,
                attempts: 0,
                next_run_at: Some(now),
                last_error: None,
                last_status_code: None,
                created_at: now,
                updated_at: now,
            };

            self.storage.deliveries.create_in_tx(&mut tx, &delivery).await?;
            self.storage.outbox.create_in_tx(&mut tx, delivery.id, now).await?;
        }

        // Nothing to deliver counts as fully handled; otherwise the event
        // would sit PENDING forever.
        if subscriptions.is_empty() {
            self.storage.events.update_status_in_tx(&mut tx, event.id, EventStatus::Delivered).await?;
        }

        tx.commit().await?;

        let status = if subscriptions.is_empty() {
            EventStatus::Delivered
        } else {
            EventStatus::Pending
        };

        info!(
            event_id = %event.id,
            event_type = %request.event_type,
            fan_out = subscriptions.len(),
            "event ingested"
        );

        Ok(IngestOutcome { event_id: event.id, status, deduplicated: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_key_wins_over_event_id() {
        assert_eq!(
            resolve_event_key(Some("key-1"), Some("evt-1")),
            Some("key-1".to_string())
        );
    }

    #[test]
    fn event_id_used_when_no_explicit_key() {
        assert_eq!(resolve_event_key(None, Some("evt-1")), Some("evt-1".to_string()));
    }

    #[test]
    fn keys_are_trimmed() {
        assert_eq!(resolve_event_key(Some("  k1  "), None), Some("k1".to_string()));
    }

    #[test]
    fn absent_or_blank_keys_resolve_to_none() {
        assert_eq!(resolve_event_key(None, None), None);
        assert_eq!(resolve_event_key(Some("   "), None), None);
        assert_eq!(resolve_event_key(Some(""), Some("")), None);
    }
}
