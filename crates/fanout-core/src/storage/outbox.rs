//! Repository for the outbox schedule log.
//!
//! The outbox decouples durable scheduling from the in-memory work queue.
//! Entries are created in the same transaction as the delivery state they
//! refer to, claimed exactly once by the dispatcher, and never touched again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{DeliveryId, OutboxEntry},
};

/// Repository for outbox database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Schedules a delivery by inserting an outbox entry within a
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        delivery_id: DeliveryId,
        available_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox (id, delivery_id, available_at, status)
            VALUES ($1, $2, $3, 'PENDING')
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(delivery_id.0)
        .bind(available_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Schedules a delivery outside any caller transaction.
    ///
    /// Used by the worker's premature-job path, which re-arms the schedule
    /// without touching delivery state.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(
        &self,
        delivery_id: DeliveryId,
        available_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox (id, delivery_id, available_at, status)
            VALUES ($1, $2, $3, 'PENDING')
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(delivery_id.0)
        .bind(available_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Claims up to `batch_size` due entries, oldest-due first.
    ///
    /// Selection and claim happen in one transaction using
    /// `FOR UPDATE SKIP LOCKED`, so concurrent dispatcher instances never
    /// claim the same row: contended rows are skipped, not waited on. A
    /// plain read-then-update would dispatch duplicates under horizontal
    /// scaling.
    ///
    /// Returns the delivery IDs of the claimed entries in due order. Claims
    /// are irreversible.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<Vec<DeliveryId>> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT id, delivery_id FROM outbox
            WHERE status = 'PENDING' AND available_at <= $1
            ORDER BY available_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|(id, _)| *id).collect();

        sqlx::query(
            "UPDATE outbox SET status = 'PROCESSED', processed_at = $2 WHERE id = ANY($1)",
        )
        .bind(&ids)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(rows.into_iter().map(|(_, delivery_id)| DeliveryId(delivery_id)).collect())
    }

    /// All schedule entries for a delivery, oldest first.
    ///
    /// The outbox is append-only, so this is the delivery's full scheduling
    /// history: one row per scheduling decision, claimed or not.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_delivery(&self, delivery_id: DeliveryId) -> Result<Vec<OutboxEntry>> {
        let entries = sqlx::query_as::<_, OutboxEntry>(
            r#"
            SELECT id, delivery_id, available_at, status, processed_at
            FROM outbox
            WHERE delivery_id = $1
            ORDER BY available_at ASC
            "#,
        )
        .bind(delivery_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(entries)
    }

    /// Whether a delivery has an unclaimed outbox entry.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn has_pending(&self, delivery_id: DeliveryId) -> Result<bool> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM outbox WHERE delivery_id = $1 AND status = 'PENDING'",
        )
        .bind(delivery_id.0)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0 > 0)
    }

    /// Re-arms deliveries whose scheduled work was lost.
    ///
    /// A claimed entry whose job never completed (worker crash between claim
    /// and processing) leaves its delivery non-terminal with a past-due
    /// `next_run_at` and no pending outbox row. This sweep inserts a fresh
    /// entry for each such delivery so the dispatcher picks it up again.
    /// Only deliveries overdue since before `stuck_before` are touched, to
    /// avoid racing jobs that are merely in flight.
    ///
    /// Returns the number of deliveries re-armed.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn rearm_stuck(&self, stuck_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO outbox (id, delivery_id, available_at, status)
            SELECT gen_random_uuid(), d.id, NOW(), 'PENDING'
            FROM deliveries d
            WHERE d.status IN ('PENDING', 'FAILED')
              AND d.next_run_at IS NOT NULL
              AND d.next_run_at <= $1
              AND NOT EXISTS (
                  SELECT 1 FROM outbox o
                  WHERE o.delivery_id = d.id AND o.status = 'PENDING'
              )
            "#,
        )
        .bind(stuck_before)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
