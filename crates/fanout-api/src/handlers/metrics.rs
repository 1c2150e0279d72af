//! Metrics exposition and aggregate statistics handlers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use fanout_core::models::DeliveryStatus;
use serde::Serialize;
use tracing::error;

use crate::{error::ApiError, state::AppState};

/// Content type for the OpenMetrics text exposition format.
const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Aggregate event and delivery counts.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Total events ingested.
    pub events_total: i64,
    /// Total deliveries created.
    pub deliveries_total: i64,
    /// Deliveries that reached their endpoint.
    pub deliveries_sent: i64,
    /// Deliveries awaiting retry.
    pub deliveries_failed: i64,
    /// Dead-lettered deliveries.
    pub deliveries_dead: i64,
}

/// Renders the metric registry in Prometheus text format.
pub async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = String::new();
    match prometheus_client::encoding::text::encode(&mut body, &state.registry) {
        Ok(()) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body)
                .into_response()
        },
        Err(err) => {
            error!(error = %err, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

/// Returns aggregate event/delivery counts from the store.
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let events_total = state.storage.events.count_total().await?;
    let deliveries_total = state.storage.deliveries.count_total().await?;

    let mut sent = 0;
    let mut failed = 0;
    let mut dead = 0;
    for (status, count) in state.storage.deliveries.counts_by_status().await? {
        match status {
            DeliveryStatus::Sent => sent = count,
            DeliveryStatus::Failed => failed = count,
            DeliveryStatus::Dead => dead = count,
            DeliveryStatus::Pending => {},
        }
    }

    Ok(Json(StatsResponse {
        events_total,
        deliveries_total,
        deliveries_sent: sent,
        deliveries_failed: failed,
        deliveries_dead: dead,
    }))
}
