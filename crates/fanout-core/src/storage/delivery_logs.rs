//! Repository for the append-only delivery attempt audit log.
//!
//! Log rows are written in the same transaction as the delivery transition
//! they record, and are never mutated or deleted.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{DeliveryId, DeliveryLog},
};

/// Repository for delivery log database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Appends an attempt record within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn append_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        log: &DeliveryLog,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_logs (
                delivery_id, attempt, status, status_code, error, response_time_ms, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(log.delivery_id.0)
        .bind(log.attempt)
        .bind(log.status)
        .bind(log.status_code)
        .bind(&log.error)
        .bind(log.response_time_ms)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// All attempt records for a delivery, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_delivery(&self, delivery_id: DeliveryId) -> Result<Vec<DeliveryLog>> {
        let logs = sqlx::query_as::<_, DeliveryLog>(
            r#"
            SELECT delivery_id, attempt, status, status_code, error, response_time_ms, created_at
            FROM delivery_logs
            WHERE delivery_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(delivery_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(logs)
    }

    /// Number of recorded attempts for a delivery.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_for_delivery(&self, delivery_id: DeliveryId) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM delivery_logs WHERE delivery_id = $1")
                .bind(delivery_id.0)
                .fetch_one(&*self.pool)
                .await?;

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
