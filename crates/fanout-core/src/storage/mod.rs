//! Database access layer implementing the repository pattern.
//!
//! The repository layer translates between domain models and database rows.
//! All database operations go through these repositories; the core invariants
//! (atomic fan-out, exactly-once claim, atomic attempt transitions) are
//! enforced by their transactions.

use std::sync::Arc;

use sqlx::PgPool;

pub mod deliveries;
pub mod delivery_logs;
pub mod events;
pub mod outbox;
pub mod schema;
pub mod subscriptions;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
///
/// Manages a shared connection pool and provides type-safe access to each
/// domain repository.
#[derive(Clone)]
pub struct Storage {
    /// Repository for event operations.
    pub events: Arc<events::Repository>,

    /// Repository for subscription configuration.
    pub subscriptions: Arc<subscriptions::Repository>,

    /// Repository for delivery state transitions.
    pub deliveries: Arc<deliveries::Repository>,

    /// Repository for the append-only attempt audit log.
    pub delivery_logs: Arc<delivery_logs::Repository>,

    /// Repository for the outbox schedule log.
    pub outbox: Arc<outbox::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            events: Arc::new(events::Repository::new(pool.clone())),
            subscriptions: Arc::new(subscriptions::Repository::new(pool.clone())),
            deliveries: Arc::new(deliveries::Repository::new(pool.clone())),
            delivery_logs: Arc::new(delivery_logs::Repository::new(pool.clone())),
            outbox: Arc::new(outbox::Repository::new(pool)),
        }
    }

    /// Returns the shared connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.events.pool()
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool()).await?;

        Ok(())
    }
}
