//! Repository for subscription database operations.
//!
//! Subscriptions are owned by the CRUD surface; the delivery pipeline only
//! reads enabled rows through [`Repository::find_enabled_matching`].

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{Subscription, SubscriptionId},
};

const SUBSCRIPTION_COLUMNS: &str =
    "id, endpoint_url, secret, event_types, is_enabled, created_at";

/// New subscription registration.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// Target URL for webhook delivery.
    pub endpoint_url: String,
    /// Optional shared secret for request signing.
    pub secret: Option<String>,
    /// Event types this subscriber wants. Must be non-empty.
    pub event_types: Vec<String>,
}

/// Partial subscription update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    /// New target URL.
    pub endpoint_url: Option<String>,
    /// New signing secret.
    pub secret: Option<String>,
    /// New event-type set.
    pub event_types: Option<Vec<String>>,
    /// Enable or disable the subscription.
    pub is_enabled: Option<bool>,
}

/// Repository for subscription database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Registers a new subscription.
    ///
    /// A registration duplicating an existing subscription's endpoint URL and
    /// event-type set is a conflict, distinct from idempotent event dedup.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for an empty event-type set and
    /// `CoreError::Conflict` for duplicate registrations.
    pub async fn create(&self, new: NewSubscription) -> Result<Subscription> {
        if new.event_types.is_empty() {
            return Err(CoreError::InvalidInput(
                "subscription requires at least one event type".to_string(),
            ));
        }

        let existing: Option<(sqlx::types::Uuid,)> = sqlx::query_as(
            "SELECT id FROM subscriptions WHERE endpoint_url = $1 AND event_types = $2",
        )
        .bind(&new.endpoint_url)
        .bind(&new.event_types)
        .fetch_optional(&*self.pool)
        .await?;

        if existing.is_some() {
            return Err(CoreError::Conflict(
                "subscription already exists for the same endpoint_url and event_types"
                    .to_string(),
            ));
        }

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (id, endpoint_url, secret, event_types, is_enabled, created_at)
            VALUES ($1, $2, $3, $4, TRUE, NOW())
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(SubscriptionId::new().0)
        .bind(&new.endpoint_url)
        .bind(&new.secret)
        .bind(&new.event_types)
        .fetch_one(&*self.pool)
        .await?;

        Ok(subscription)
    }

    /// Finds a subscription by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(subscription)
    }

    /// Lists subscriptions, newest first, optionally filtered by enablement.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list(&self, enabled: Option<bool>) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
            WHERE ($1::BOOLEAN IS NULL OR is_enabled = $1)
            ORDER BY created_at DESC
            "#
        ))
        .bind(enabled)
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Applies a partial update to a subscription.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the subscription does not exist.
    pub async fn update(
        &self,
        id: SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET endpoint_url = COALESCE($2, endpoint_url),
                secret = COALESCE($3, secret),
                event_types = COALESCE($4, event_types),
                is_enabled = COALESCE($5, is_enabled)
            WHERE id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(update.endpoint_url)
        .bind(update.secret)
        .bind(update.event_types)
        .bind(update.is_enabled)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("subscription {id} not found")))?;

        Ok(subscription)
    }

    /// Enabled subscriptions whose event-type set contains `event_type`.
    ///
    /// Ordered oldest-created first for a stable, deterministic fan-out
    /// order. Pure read, no side effects.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_enabled_matching(&self, event_type: &str) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
            WHERE is_enabled = TRUE AND $1 = ANY(event_types)
            ORDER BY created_at ASC
            "#
        ))
        .bind(event_type)
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }
}
