//! Repository for delivery state transitions.
//!
//! Attempt transitions are written through the `_in_tx` variants so that the
//! delivery update, its audit log entry, and any new outbox entry commit as
//! one atomic unit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::{CoreError, Result},
    models::{Delivery, DeliveryId, DeliveryStatus, EventId},
};

const DELIVERY_COLUMNS: &str = "id, event_id, subscription_id, status, attempts, next_run_at, \
                                last_error, last_status_code, created_at, updated_at";

/// Repository for delivery database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates a delivery within a transaction.
    ///
    /// Called during ingestion fan-out; one delivery per matched
    /// subscription, unique on (event_id, subscription_id).
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or the uniqueness constraint is
    /// violated.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        delivery: &Delivery,
    ) -> Result<DeliveryId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO deliveries (
                id, event_id, subscription_id, status, attempts, next_run_at,
                last_error, last_status_code, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(delivery.id.0)
        .bind(delivery.event_id.0)
        .bind(delivery.subscription_id.0)
        .bind(delivery.status)
        .bind(delivery.attempts)
        .bind(delivery.next_run_at)
        .bind(&delivery.last_error)
        .bind(delivery.last_status_code)
        .fetch_one(&mut **tx)
        .await?;

        Ok(DeliveryId(id))
    }

    /// Finds a delivery by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(delivery)
    }

    /// Recent deliveries, newest-updated first, optionally filtered by
    /// status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_recent(
        &self,
        status: Option<DeliveryStatus>,
        limit: i64,
    ) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(&format!(
            r#"
            SELECT {DELIVERY_COLUMNS} FROM deliveries
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY updated_at DESC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }

    /// All deliveries for an event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_event(&self, event_id: EventId) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE event_id = $1 ORDER BY created_at ASC"
        ))
        .bind(event_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }

    /// Dead deliveries for an event, candidates for a batch operator retry.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_dead_by_event(&self, event_id: EventId) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE event_id = $1 AND status = 'DEAD'"
        ))
        .bind(event_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }

    /// Marks a delivery as sent after a 2xx response. Terminal.
    ///
    /// Clears the last error and records the response status code.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_sent_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: DeliveryId,
        attempts: i32,
        status_code: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'SENT', attempts = $2, last_error = NULL,
                last_status_code = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(attempts)
        .bind(status_code)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Marks a delivery as dead. Terminal.
    ///
    /// `next_run_at` is left at its last known value: no further attempt will
    /// be scheduled.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_dead_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: DeliveryId,
        attempts: i32,
        error: &str,
        status_code: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'DEAD', attempts = $2, last_error = $3,
                last_status_code = COALESCE($4, last_status_code), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(attempts)
        .bind(error)
        .bind(status_code)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Marks a delivery as transiently failed and schedules the next attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: DeliveryId,
        attempts: i32,
        error: &str,
        status_code: Option<i32>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'FAILED', attempts = $2, last_error = $3,
                last_status_code = COALESCE($4, last_status_code),
                next_run_at = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(attempts)
        .bind(error)
        .bind(status_code)
        .bind(next_run_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Resets a delivery for an operator retry.
    ///
    /// Back to PENDING with zero attempts, immediate next run, and cleared
    /// error state. Callers insert the fresh outbox entry in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn reset_for_retry_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: DeliveryId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'PENDING', attempts = 0, next_run_at = NOW(),
                last_error = NULL, last_status_code = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Force-marks a delivery dead with an operator-supplied reason.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the delivery does not exist.
    pub async fn force_dead(&self, id: DeliveryId, reason: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'DEAD', last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(reason)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("delivery {id} not found")));
        }

        Ok(())
    }

    /// Per-status delivery counts across the whole table.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn counts_by_status(&self) -> Result<Vec<(DeliveryStatus, i64)>> {
        let rows: Vec<(DeliveryStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM deliveries GROUP BY status")
                .fetch_all(&*self.pool)
                .await?;

        Ok(rows)
    }

    /// Total number of deliveries.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_total(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM deliveries").fetch_one(&*self.pool).await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }
}
