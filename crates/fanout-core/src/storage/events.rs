//! Repository for event database operations.
//!
//! Handles event creation, idempotency lookups, and the status roll-up that
//! keeps an event consistent with its deliveries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{rollup_status, DeliveryStatus, Event, EventId, EventStatus},
};

const EVENT_COLUMNS: &str =
    "id, event_key, event_type, payload, status, created_at, updated_at";

/// Repository for event database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Creates an event within a transaction.
    ///
    /// Part of the ingestion fan-out: the event row, its deliveries, and
    /// their outbox entries commit as one unit.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Conflict` when the event key already exists.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &Event,
    ) -> Result<EventId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO events (id, event_key, event_type, payload, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING id
            "#,
        )
        .bind(event.id.0)
        .bind(&event.event_key)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status)
        .bind(event.created_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(EventId(id))
    }

    /// Finds an event by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, event_id: EventId) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(event_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Finds an event by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_key(&self, event_key: &str) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE event_key = $1"
        ))
        .bind(event_key)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Updates the roll-up status of an event.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_status(&self, event_id: EventId, status: EventStatus) -> Result<()> {
        self.update_status_impl(&*self.pool, event_id, status).await
    }

    /// Updates the roll-up status of an event within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_status_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
        status: EventStatus,
    ) -> Result<()> {
        self.update_status_impl(&mut **tx, event_id, status).await
    }

    async fn update_status_impl<'e, E>(
        &self,
        executor: E,
        event_id: EventId,
        status: EventStatus,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE events SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status)
            .bind(event_id.0)
            .execute(executor)
            .await?;

        Ok(())
    }

    /// Recomputes the event's roll-up status from its delivery states.
    ///
    /// Reads all delivery statuses, folds them through [`rollup_status`], and
    /// writes the result. Idempotent and safe to call concurrently: the value
    /// is a deterministic function of current delivery states, so repeated
    /// calls converge.
    ///
    /// # Errors
    ///
    /// Returns error if the read or the write fails.
    pub async fn recompute_status(&self, event_id: EventId) -> Result<EventStatus> {
        let statuses: Vec<DeliveryStatus> =
            sqlx::query_scalar("SELECT status FROM deliveries WHERE event_id = $1")
                .bind(event_id.0)
                .fetch_all(&*self.pool)
                .await?;

        let status = rollup_status(&statuses);
        self.update_status(event_id, status).await?;

        Ok(status)
    }

    /// Per-status delivery counts for an event summary.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn delivery_status_counts(
        &self,
        event_id: EventId,
    ) -> Result<Vec<(DeliveryStatus, i64)>> {
        let rows: Vec<(DeliveryStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM deliveries WHERE event_id = $1 GROUP BY status",
        )
        .bind(event_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows)
    }

    /// Earliest scheduled run among the event's still-retryable deliveries.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn next_pending_run_at(
        &self,
        event_id: EventId,
    ) -> Result<Option<DateTime<Utc>>> {
        let next: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            r#"
            SELECT next_run_at FROM deliveries
            WHERE event_id = $1 AND status IN ('PENDING', 'FAILED')
            ORDER BY next_run_at ASC
            LIMIT 1
            "#,
        )
        .bind(event_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(next.flatten())
    }

    /// Total number of events.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_total(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM events").fetch_one(&*self.pool).await?;

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
