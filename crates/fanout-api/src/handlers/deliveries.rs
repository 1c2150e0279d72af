//! Delivery query and operator action handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use fanout_core::{
    models::{Delivery, DeliveryStatus},
    CoreError, DeliveryId, EventId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

const LIST_LIMIT: i64 = 200;

/// Query parameters for the delivery listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Optional status filter: PENDING, FAILED, SENT, or DEAD.
    pub status: Option<String>,
}

/// Request body for force-marking a delivery dead.
#[derive(Debug, Default, Deserialize)]
pub struct MarkDeadRequest {
    /// Operator-supplied reason recorded on the delivery.
    pub reason: Option<String>,
}

/// Response for retry actions.
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    /// Number of deliveries reset for retry.
    pub retried: u32,
}

fn parse_status(status: &str) -> Result<DeliveryStatus, ApiError> {
    match status {
        "PENDING" => Ok(DeliveryStatus::Pending),
        "FAILED" => Ok(DeliveryStatus::Failed),
        "SENT" => Ok(DeliveryStatus::Sent),
        "DEAD" => Ok(DeliveryStatus::Dead),
        other => {
            Err(CoreError::InvalidInput(format!("unknown delivery status: {other}")).into())
        },
    }
}

/// Lists recent deliveries, optionally filtered by status.
pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Delivery>>, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let deliveries = state.storage.deliveries.list_recent(status, LIST_LIMIT).await?;

    Ok(Json(deliveries))
}

/// Retries a single DEAD or FAILED delivery.
pub async fn retry_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RetryResponse>, ApiError> {
    let retried = state.operations.retry_delivery(DeliveryId::from(id)).await?;

    Ok(Json(RetryResponse { retried }))
}

/// Retries every DEAD delivery of an event.
pub async fn retry_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RetryResponse>, ApiError> {
    let retried = state.operations.retry_event(EventId::from(id)).await?;

    Ok(Json(RetryResponse { retried }))
}

/// Force-marks a delivery dead with an operator-supplied reason.
pub async fn mark_dead(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<MarkDeadRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let reason = request
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "manually marked dead".to_string());

    state.operations.mark_dead(DeliveryId::from(id), &reason).await?;

    Ok(Json(serde_json::json!({ "updated": true })))
}

/// Cancels a delivery.
pub async fn cancel_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.operations.cancel(DeliveryId::from(id)).await?;

    Ok(Json(serde_json::json!({ "cancelled": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_parses_known_values() {
        assert_eq!(parse_status("PENDING").unwrap(), DeliveryStatus::Pending);
        assert_eq!(parse_status("FAILED").unwrap(), DeliveryStatus::Failed);
        assert_eq!(parse_status("SENT").unwrap(), DeliveryStatus::Sent);
        assert_eq!(parse_status("DEAD").unwrap(), DeliveryStatus::Dead);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(parse_status("delivered").is_err());
        assert!(parse_status("").is_err());
    }
}
