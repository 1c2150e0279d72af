//! Event ingestion and query handlers.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use fanout_core::{
    models::{Delivery, DeliveryLog, DeliveryStatus, Event},
    CoreError, CreateEvent, EventId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// Request body for event creation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    /// Event type used for subscription matching.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Client event ID, usable as the idempotency key.
    pub event_id: Option<String>,

    /// When the event occurred; defaults to ingestion time.
    pub created_at: Option<DateTime<Utc>>,

    /// Business payload.
    pub data: Value,

    /// Optional caller metadata.
    pub metadata: Option<Value>,
}

/// Response from event creation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventResponse {
    /// ID of the created or existing event.
    pub event_id: String,
    /// Roll-up status at creation time.
    pub status: String,
    /// Whether an existing event was returned.
    pub deduplicated: bool,
}

/// One delivery with its attempt history.
#[derive(Debug, Serialize)]
pub struct DeliveryDetail {
    /// The delivery record.
    #[serde(flatten)]
    pub delivery: Delivery,
    /// Attempt audit log, newest first.
    pub logs: Vec<DeliveryLog>,
}

/// Full event detail including deliveries and their logs.
#[derive(Debug, Serialize)]
pub struct EventDetailResponse {
    /// The event record.
    #[serde(flatten)]
    pub event: Event,
    /// All deliveries for the event.
    pub deliveries: Vec<DeliveryDetail>,
}

/// Per-status delivery counts for an event.
#[derive(Debug, Default, Serialize)]
#[allow(clippy::struct_field_names)]
pub struct DeliveryCounts {
    /// Deliveries that reached their endpoint.
    #[serde(rename = "SENT")]
    pub sent: i64,
    /// Deliveries awaiting retry.
    #[serde(rename = "FAILED")]
    pub failed: i64,
    /// Dead-lettered deliveries.
    #[serde(rename = "DEAD")]
    pub dead: i64,
    /// Deliveries awaiting their first attempt.
    #[serde(rename = "PENDING")]
    pub pending: i64,
}

/// Compact event summary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummaryResponse {
    /// Event ID.
    pub id: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Roll-up status.
    pub status: String,
    /// When the event occurred.
    pub created_at: DateTime<Utc>,
    /// When the roll-up last changed.
    pub updated_at: DateTime<Utc>,
    /// Per-status delivery counts.
    pub deliveries: DeliveryCounts,
    /// Earliest scheduled run among retryable deliveries, ISO-8601.
    pub next_run_at: Option<String>,
}

/// Creates an event and fans it out to matching subscriptions.
///
/// The idempotency key comes from the `Idempotency-Key` header or the
/// `eventId` body field; absence of both is a caller error.
#[instrument(name = "create_event", skip_all, fields(event_type = %request.event_type))]
pub async fn create_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateEventRequest>,
) -> Result<Json<CreateEventResponse>, ApiError> {
    if request.event_type.trim().is_empty() {
        return Err(CoreError::InvalidInput("type must be a non-empty string".to_string()).into());
    }

    let idempotency_key =
        headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string);

    let outcome = state
        .ingestor
        .create_event(
            CreateEvent {
                event_type: request.event_type,
                event_id: request.event_id,
                created_at: request.created_at,
                data: request.data,
                metadata: request.metadata,
            },
            idempotency_key.as_deref(),
        )
        .await?;

    Ok(Json(CreateEventResponse {
        event_id: outcome.event_id.to_string(),
        status: outcome.status.to_string(),
        deduplicated: outcome.deduplicated,
    }))
}

/// Returns an event with its deliveries and attempt logs.
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EventDetailResponse>, ApiError> {
    let event_id = EventId::from(id);
    let event = state
        .storage
        .events
        .find_by_id(event_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("event not found".to_string()))?;

    let deliveries = state.storage.deliveries.find_by_event(event_id).await?;
    let mut details = Vec::with_capacity(deliveries.len());
    for delivery in deliveries {
        let logs = state.storage.delivery_logs.find_by_delivery(delivery.id).await?;
        details.push(DeliveryDetail { delivery, logs });
    }

    Ok(Json(EventDetailResponse { event, deliveries: details }))
}

/// Returns a compact event summary with per-status delivery counts.
pub async fn event_summary(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EventSummaryResponse>, ApiError> {
    let event_id = EventId::from(id);
    let event = state
        .storage
        .events
        .find_by_id(event_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("event not found".to_string()))?;

    let mut counts = DeliveryCounts::default();
    for (status, count) in state.storage.events.delivery_status_counts(event_id).await? {
        match status {
            DeliveryStatus::Sent => counts.sent = count,
            DeliveryStatus::Failed => counts.failed = count,
            DeliveryStatus::Dead => counts.dead = count,
            DeliveryStatus::Pending => counts.pending = count,
        }
    }

    let next_run_at = state
        .storage
        .events
        .next_pending_run_at(event_id)
        .await?
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true));

    Ok(Json(EventSummaryResponse {
        id: event.id.to_string(),
        event_type: event.event_type,
        status: event.status.to_string(),
        created_at: event.created_at,
        updated_at: event.updated_at,
        deliveries: counts,
        next_run_at,
    }))
}
