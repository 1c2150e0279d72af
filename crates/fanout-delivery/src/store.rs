//! Storage abstraction layer for the delivery engine.
//!
//! Provides trait-based abstractions over the store operations the dispatcher
//! and workers need, so delivery logic can be tested without a database.
//! Production uses the concrete `fanout_core::storage::Storage`; tests use
//! the in-memory mock.

use std::{future::Future, pin::Pin};

use chrono::{DateTime, Utc};
use fanout_core::{
    error::Result,
    models::{Delivery, DeliveryId, DeliveryLog, DeliveryStatus, Event, EventId, EventStatus,
             Subscription},
    storage::Storage,
};

/// Everything the worker needs to attempt one delivery.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    /// The delivery being attempted.
    pub delivery: Delivery,
    /// Its parent event.
    pub event: Event,
    /// The destination subscription.
    pub subscription: Subscription,
}

/// Store operations required by the delivery engine.
///
/// Every `record_*` method commits the delivery update, its audit log entry,
/// and any new outbox entry as one atomic unit, so a crash cannot leave a
/// delivery updated without its audit trail or a retry scheduled without a
/// corresponding outbox row.
pub trait DeliveryStore: Send + Sync + 'static {
    /// Claims up to `batch_size` due outbox entries, oldest-due first.
    ///
    /// Concurrent claims over the same rows must be mutually exclusive; each
    /// due entry is dispatched exactly once.
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DeliveryId>>> + Send + '_>>;

    /// Loads a delivery with its parent event and subscription.
    ///
    /// Returns `None` for unknown IDs; the worker treats that as a no-op.
    fn load_context(
        &self,
        id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DeliveryContext>>> + Send + '_>>;

    /// Records a terminal success: delivery SENT plus its log entry.
    fn record_sent(
        &self,
        id: DeliveryId,
        attempt: i32,
        status_code: i32,
        duration_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Records a terminal failure: delivery DEAD plus its log entry. No
    /// further outbox entry is created.
    fn record_dead(
        &self,
        id: DeliveryId,
        attempt: i32,
        error: String,
        status_code: Option<i32>,
        duration_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Records a retryable failure: delivery FAILED with the next run time,
    /// its log entry, and a new outbox entry at `next_run_at`.
    fn record_failed(
        &self,
        id: DeliveryId,
        attempt: i32,
        error: String,
        status_code: Option<i32>,
        duration_ms: i64,
        next_run_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Re-inserts an outbox entry without touching delivery state.
    ///
    /// Used when a job arrives before the delivery's `next_run_at`.
    fn rearm(
        &self,
        id: DeliveryId,
        available_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Recomputes the parent event's roll-up status from its deliveries.
    fn recompute_event_status(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<EventStatus>> + Send + '_>>;

    /// Re-arms non-terminal deliveries stuck past due with no pending outbox
    /// entry. Returns the number re-armed.
    fn rearm_stuck(
        &self,
        stuck_before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;
}

/// Production store implementation over PostgreSQL.
///
/// Wraps the concrete `fanout_core::storage::Storage`; each `record_*`
/// method opens one transaction covering the delivery update, the log
/// insert, and any outbox insert.
pub struct PostgresDeliveryStore {
    storage: Storage,
}

impl PostgresDeliveryStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl DeliveryStore for PostgresDeliveryStore {
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DeliveryId>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox.claim_due(now, batch_size).await })
    }

    fn load_context(
        &self,
        id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DeliveryContext>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            let Some(delivery) = storage.deliveries.find_by_id(id).await? else {
                return Ok(None);
            };
            let Some(event) = storage.events.find_by_id(delivery.event_id).await? else {
                return Ok(None);
            };
            let Some(subscription) =
                storage.subscriptions.find_by_id(delivery.subscription_id).await?
            else {
                return Ok(None);
            };

            Ok(Some(DeliveryContext { delivery, event, subscription }))
        })
    }

    fn record_sent(
        &self,
        id: DeliveryId,
        attempt: i32,
        status_code: i32,
        duration_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            let mut tx = storage.pool().begin().await?;

            storage.deliveries.mark_sent_in_tx(&mut tx, id, attempt, status_code).await?;
            storage
                .delivery_logs
                .append_in_tx(&mut tx, &attempt_log(
                    id,
                    attempt,
                    DeliveryStatus::Sent,
                    Some(status_code),
                    None,
                    duration_ms,
                ))
                .await?;

            tx.commit().await?;
            Ok(())
        })
    }

    fn record_dead(
        &self,
        id: DeliveryId,
        attempt: i32,
        error: String,
        status_code: Option<i32>,
        duration_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            let mut tx = storage.pool().begin().await?;

            storage.deliveries.mark_dead_in_tx(&mut tx, id, attempt, &error, status_code).await?;
            storage
                .delivery_logs
                .append_in_tx(&mut tx, &attempt_log(
                    id,
                    attempt,
                    DeliveryStatus::Dead,
                    status_code,
                    Some(error),
                    duration_ms,
                ))
                .await?;

            tx.commit().await?;
            Ok(())
        })
    }

    fn record_failed(
        &self,
        id: DeliveryId,
        attempt: i32,
        error: String,
        status_code: Option<i32>,
        duration_ms: i64,
        next_run_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            let mut tx = storage.pool().begin().await?;

            storage
                .deliveries
                .mark_failed_in_tx(&mut tx, id, attempt, &error, status_code, next_run_at)
                .await?;
            storage
                .delivery_logs
                .append_in_tx(&mut tx, &attempt_log(
                    id,
                    attempt,
                    DeliveryStatus::Failed,
                    status_code,
                    Some(error),
                    duration_ms,
                ))
                .await?;
            storage.outbox.create_in_tx(&mut tx, id, next_run_at).await?;

            tx.commit().await?;
            Ok(())
        })
    }

    fn rearm(
        &self,
        id: DeliveryId,
        available_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox.create(id, available_at).await })
    }

    fn recompute_event_status(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<EventStatus>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.events.recompute_status(event_id).await })
    }

    fn rearm_stuck(
        &self,
        stuck_before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox.rearm_stuck(stuck_before).await })
    }
}

fn attempt_log(
    id: DeliveryId,
    attempt: i32,
    status: DeliveryStatus,
    status_code: Option<i32>,
    error: Option<String>,
    duration_ms: i64,
) -> DeliveryLog {
    DeliveryLog {
        delivery_id: id,
        attempt,
        status,
        status_code,
        error,
        response_time_ms: duration_ms,
        created_at: Utc::now(),
    }
}

pub mod mock {
    //! In-memory store for testing delivery logic without a database.
    //!
    //! Applies the same state transitions as the PostgreSQL implementation so
    //! repeated worker invocations observe updated delivery state, and keeps
    //! a record of every transition for verification.

    use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

    use chrono::{DateTime, Utc};
    use fanout_core::{
        error::Result,
        models::{rollup_status, DeliveryStatus, EventStatus},
    };
    use tokio::sync::RwLock;

    use super::{DeliveryContext, DeliveryId, DeliveryStore, EventId};

    /// A delivery state transition applied through the mock.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Transition {
        /// `record_sent` was called.
        Sent {
            /// Delivery that was marked sent.
            delivery_id: DeliveryId,
            /// Attempt number recorded.
            attempt: i32,
            /// Response status code.
            status_code: i32,
        },
        /// `record_dead` was called.
        Dead {
            /// Delivery that was dead-lettered.
            delivery_id: DeliveryId,
            /// Attempt number recorded.
            attempt: i32,
            /// Error text recorded.
            error: String,
            /// Response status code, when one was received.
            status_code: Option<i32>,
        },
        /// `record_failed` was called.
        Failed {
            /// Delivery that was scheduled for retry.
            delivery_id: DeliveryId,
            /// Attempt number recorded.
            attempt: i32,
            /// Error text recorded.
            error: String,
            /// Next scheduled run.
            next_run_at: DateTime<Utc>,
        },
    }

    /// Mock store with deterministic in-memory state.
    #[derive(Default)]
    pub struct MockDeliveryStore {
        contexts: Arc<RwLock<HashMap<DeliveryId, DeliveryContext>>>,
        due: Arc<RwLock<Vec<DeliveryId>>>,
        transitions: Arc<RwLock<Vec<Transition>>>,
        rearmed: Arc<RwLock<Vec<(DeliveryId, DateTime<Utc>)>>>,
        recomputed: Arc<RwLock<Vec<EventId>>>,
    }

    impl MockDeliveryStore {
        /// Creates a new empty mock store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers a delivery context the worker can load.
        pub async fn add_context(&self, context: DeliveryContext) {
            self.contexts.write().await.insert(context.delivery.id, context);
        }

        /// Marks a delivery as due for the dispatcher.
        pub async fn push_due(&self, id: DeliveryId) {
            self.due.write().await.push(id);
        }

        /// All transitions applied so far, in order.
        pub async fn transitions(&self) -> Vec<Transition> {
            self.transitions.read().await.clone()
        }

        /// All premature-job re-arms, in order.
        pub async fn rearmed(&self) -> Vec<(DeliveryId, DateTime<Utc>)> {
            self.rearmed.read().await.clone()
        }

        /// Events whose roll-up was recomputed, in order.
        pub async fn recomputed(&self) -> Vec<EventId> {
            self.recomputed.read().await.clone()
        }

        /// Current state of a registered delivery.
        pub async fn delivery_state(
            &self,
            id: DeliveryId,
        ) -> Option<(DeliveryStatus, i32, Option<DateTime<Utc>>)> {
            self.contexts
                .read()
                .await
                .get(&id)
                .map(|c| (c.delivery.status, c.delivery.attempts, c.delivery.next_run_at))
        }
    }

    impl DeliveryStore for MockDeliveryStore {
        fn claim_due(
            &self,
            _now: DateTime<Utc>,
            batch_size: i64,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<DeliveryId>>> + Send + '_>> {
            let due = self.due.clone();
            Box::pin(async move {
                let mut due = due.write().await;
                let take = usize::try_from(batch_size).unwrap_or(usize::MAX).min(due.len());
                Ok(due.drain(..take).collect())
            })
        }

        fn load_context(
            &self,
            id: DeliveryId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<DeliveryContext>>> + Send + '_>> {
            let contexts = self.contexts.clone();
            Box::pin(async move { Ok(contexts.read().await.get(&id).cloned()) })
        }

        fn record_sent(
            &self,
            id: DeliveryId,
            attempt: i32,
            status_code: i32,
            _duration_ms: i64,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let contexts = self.contexts.clone();
            let transitions = self.transitions.clone();
            Box::pin(async move {
                if let Some(context) = contexts.write().await.get_mut(&id) {
                    context.delivery.status = DeliveryStatus::Sent;
                    context.delivery.attempts = attempt;
                    context.delivery.last_error = None;
                    context.delivery.last_status_code = Some(status_code);
                }
                transitions.write().await.push(Transition::Sent {
                    delivery_id: id,
                    attempt,
                    status_code,
                });
                Ok(())
            })
        }

        fn record_dead(
            &self,
            id: DeliveryId,
            attempt: i32,
            error: String,
            status_code: Option<i32>,
            _duration_ms: i64,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let contexts = self.contexts.clone();
            let transitions = self.transitions.clone();
            Box::pin(async move {
                if let Some(context) = contexts.write().await.get_mut(&id) {
                    context.delivery.status = DeliveryStatus::Dead;
                    context.delivery.attempts = attempt;
                    context.delivery.last_error = Some(error.clone());
                    if status_code.is_some() {
                        context.delivery.last_status_code = status_code;
                    }
                }
                transitions.write().await.push(Transition::Dead {
                    delivery_id: id,
                    attempt,
                    error,
                    status_code,
                });
                Ok(())
            })
        }

        fn record_failed(
            &self,
            id: DeliveryId,
            attempt: i32,
            error: String,
            status_code: Option<i32>,
            _duration_ms: i64,
            next_run_at: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let contexts = self.contexts.clone();
            let transitions = self.transitions.clone();
            let due = self.due.clone();
            Box::pin(async move {
                if let Some(context) = contexts.write().await.get_mut(&id) {
                    context.delivery.status = DeliveryStatus::Failed;
                    context.delivery.attempts = attempt;
                    context.delivery.last_error = Some(error.clone());
                    if status_code.is_some() {
                        context.delivery.last_status_code = status_code;
                    }
                    context.delivery.next_run_at = Some(next_run_at);
                }
                // A retryable failure schedules a new outbox entry.
                due.write().await.push(id);
                transitions.write().await.push(Transition::Failed {
                    delivery_id: id,
                    attempt,
                    error,
                    next_run_at,
                });
                Ok(())
            })
        }

        fn rearm(
            &self,
            id: DeliveryId,
            available_at: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let rearmed = self.rearmed.clone();
            Box::pin(async move {
                rearmed.write().await.push((id, available_at));
                Ok(())
            })
        }

        fn recompute_event_status(
            &self,
            event_id: EventId,
        ) -> Pin<Box<dyn Future<Output = Result<EventStatus>> + Send + '_>> {
            let contexts = self.contexts.clone();
            let recomputed = self.recomputed.clone();
            Box::pin(async move {
                recomputed.write().await.push(event_id);
                let statuses: Vec<DeliveryStatus> = contexts
                    .read()
                    .await
                    .values()
                    .filter(|c| c.event.id == event_id)
                    .map(|c| c.delivery.status)
                    .collect();
                Ok(rollup_status(&statuses))
            })
        }

        fn rearm_stuck(
            &self,
            _stuck_before: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
            Box::pin(async move { Ok(0) })
        }
    }
}
