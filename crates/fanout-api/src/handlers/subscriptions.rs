//! Subscription CRUD handlers.
//!
//! Subscriptions are configuration for the delivery pipeline; the matcher
//! only ever reads enabled rows.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use fanout_core::{models::Subscription, CoreError, SubscriptionId};
use fanout_core::storage::subscriptions::{NewSubscription, SubscriptionUpdate};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// Request body for subscription registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    /// Target URL for webhook delivery.
    pub endpoint_url: String,
    /// Optional shared secret for request signing.
    pub secret: Option<String>,
    /// Event types to subscribe to. Must be non-empty.
    pub event_types: Vec<String>,
}

/// Request body for subscription updates. Missing fields stay unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionRequest {
    /// New target URL.
    pub endpoint_url: Option<String>,
    /// New signing secret.
    pub secret: Option<String>,
    /// New event-type set.
    pub event_types: Option<Vec<String>>,
    /// Enable or disable the subscription.
    pub is_enabled: Option<bool>,
}

/// Query parameters for the subscription listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Optional enablement filter.
    pub enabled: Option<bool>,
}

/// Registers a new subscription.
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let subscription = state
        .storage
        .subscriptions
        .create(NewSubscription {
            endpoint_url: request.endpoint_url,
            secret: request.secret,
            event_types: request.event_types,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

/// Lists subscriptions, optionally filtered by enablement.
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    let subscriptions = state.storage.subscriptions.list(query.enabled).await?;

    Ok(Json(subscriptions))
}

/// Returns a subscription by ID.
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription = state
        .storage
        .subscriptions
        .find_by_id(SubscriptionId::from(id))
        .await?
        .ok_or_else(|| CoreError::NotFound("subscription not found".to_string()))?;

    Ok(Json(subscription))
}

/// Applies a partial update to a subscription.
pub async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription = state
        .storage
        .subscriptions
        .update(SubscriptionId::from(id), SubscriptionUpdate {
            endpoint_url: request.endpoint_url,
            secret: request.secret,
            event_types: request.event_types,
            is_enabled: request.is_enabled,
        })
        .await?;

    Ok(Json(subscription))
}
