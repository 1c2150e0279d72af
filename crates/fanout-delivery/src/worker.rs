//! Delivery worker: executes one webhook attempt and transitions state.
//!
//! A worker consumes jobs carrying a delivery ID, builds the signed payload,
//! calls the endpoint, classifies the outcome, persists the transition with
//! its audit log entry (and outbox re-entry on retry) atomically, emits
//! metrics, and triggers the event status roll-up.

use std::sync::Arc;

use chrono::SecondsFormat;
use fanout_core::{Clock, DeliveryId, DeliveryMetrics, EventId};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    backoff::exponential_backoff_seconds,
    client::{classify_status, ResponseKind, WebhookClient, WebhookRequest},
    error::Result,
    signature::sign_payload,
    store::{DeliveryContext, DeliveryStore},
};

/// A unit of work handed from the dispatcher to the worker pool.
///
/// Carries only the delivery ID; everything else is re-derived from the
/// store, so a lost job is recoverable from delivery state alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryJob {
    /// Delivery to attempt.
    pub delivery_id: DeliveryId,
}

/// Shared end of the job queue a pool of workers consumes from.
///
/// Each job is received by exactly one worker.
pub type JobReceiver = Arc<Mutex<mpsc::Receiver<DeliveryJob>>>;

/// Retry limits for the delivery worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum attempts per delivery, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff, in seconds.
    pub backoff_base_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_attempts: 10, backoff_base_seconds: 5 }
    }
}

/// Outbound webhook body.
///
/// Field order and names are part of the wire contract: the signature is
/// computed over this exact serialization.
#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(rename = "eventId")]
    event_id: String,
    #[serde(rename = "createdAt")]
    created_at: String,
    data: &'a Value,
    metadata: &'a Option<Value>,
}

/// Individual worker that processes webhook deliveries.
pub struct DeliveryWorker {
    id: usize,
    store: Arc<dyn DeliveryStore>,
    client: WebhookClient,
    config: WorkerConfig,
    metrics: DeliveryMetrics,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    /// Creates a new delivery worker.
    pub fn new(
        id: usize,
        store: Arc<dyn DeliveryStore>,
        client: WebhookClient,
        config: WorkerConfig,
        metrics: DeliveryMetrics,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, store, client, config, metrics, clock }
    }

    /// Consumes jobs until the queue closes or cancellation is signalled.
    ///
    /// Processing errors are logged and do not stop the worker; the store is
    /// the source of truth and a failed job is recoverable from delivery
    /// state.
    pub async fn run(&self, jobs: JobReceiver, cancel: CancellationToken) {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            let job = {
                let mut receiver = jobs.lock().await;
                tokio::select! {
                    job = receiver.recv() => job,
                    () = cancel.cancelled() => None,
                }
            };

            let Some(job) = job else {
                break;
            };

            if let Err(err) = self.process(job.delivery_id).await {
                error!(
                    worker_id = self.id,
                    delivery_id = %job.delivery_id,
                    error = %err,
                    "delivery processing failed"
                );
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
    }

    /// Executes one delivery attempt.
    ///
    /// Safe to re-invoke: a missing or already-terminal delivery is a no-op,
    /// and a premature job (scheduled run still in the future) re-arms the
    /// outbox without mutating the delivery.
    ///
    /// # Errors
    ///
    /// Returns an error only when a store operation fails; delivery failures
    /// are absorbed into the retry state machine.
    pub async fn process(&self, delivery_id: DeliveryId) -> Result<()> {
        let Some(context) = self.store.load_context(delivery_id).await? else {
            debug!(delivery_id = %delivery_id, "delivery not found, skipping");
            return Ok(());
        };

        if context.delivery.status.is_terminal() {
            debug!(
                delivery_id = %delivery_id,
                status = %context.delivery.status,
                "delivery already resolved, skipping"
            );
            return Ok(());
        }

        let now = self.clock.now_utc();
        if let Some(next_run_at) = context.delivery.next_run_at {
            if next_run_at > now {
                // Early or duplicate job: put the schedule back and let the
                // dispatcher pick it up when due.
                debug!(
                    delivery_id = %delivery_id,
                    next_run_at = %next_run_at,
                    "premature delivery job, re-arming outbox"
                );
                self.store.rearm(delivery_id, next_run_at).await?;
                return Ok(());
            }
        }

        let attempt = context.delivery.attempts + 1;
        let body = serialize_body(&context)?;
        let signature =
            context.subscription.secret.as_deref().map(|s| sign_payload(s, body.as_bytes()));

        let request = WebhookRequest {
            url: context.subscription.endpoint_url.clone(),
            event_id: context.event.id,
            event_type: context.event.event_type.clone(),
            body,
            signature,
        };

        debug!(
            worker_id = self.id,
            delivery_id = %delivery_id,
            attempt,
            url = %request.url,
            "attempting webhook delivery"
        );

        let started = self.clock.now();
        let outcome = self.client.deliver(&request).await;
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        match outcome {
            Ok(status) => match classify_status(status) {
                ResponseKind::Success => {
                    self.store
                        .record_sent(delivery_id, attempt, i32::from(status), duration_ms)
                        .await?;
                    self.metrics.sent.inc();
                    self.finish_attempt(context.event.id, duration_ms).await?;

                    info!(
                        worker_id = self.id,
                        delivery_id = %delivery_id,
                        status,
                        duration_ms,
                        "webhook delivered"
                    );
                },
                ResponseKind::Permanent => {
                    // Client error is not expected to self-resolve; abandon
                    // without scheduling another outbox entry.
                    let error = format!("non-2xx response: {status}");
                    self.store
                        .record_dead(
                            delivery_id,
                            attempt,
                            error,
                            Some(i32::from(status)),
                            duration_ms,
                        )
                        .await?;
                    self.metrics.dead.inc();
                    self.finish_attempt(context.event.id, duration_ms).await?;

                    warn!(
                        worker_id = self.id,
                        delivery_id = %delivery_id,
                        status,
                        "permanent rejection, delivery dead-lettered"
                    );
                },
                ResponseKind::Retryable => {
                    let error = format!("non-2xx response: {status}");
                    self.handle_retryable(
                        delivery_id,
                        context.event.id,
                        attempt,
                        error,
                        Some(i32::from(status)),
                        duration_ms,
                    )
                    .await?;
                },
            },
            Err(transport) => {
                self.handle_retryable(
                    delivery_id,
                    context.event.id,
                    attempt,
                    transport.to_string(),
                    None,
                    duration_ms,
                )
                .await?;
            },
        }

        Ok(())
    }

    /// Applies the retry decision for a transient failure.
    async fn handle_retryable(
        &self,
        delivery_id: DeliveryId,
        event_id: EventId,
        attempt: i32,
        error: String,
        status_code: Option<i32>,
        duration_ms: i64,
    ) -> Result<()> {
        let attempt_number = u32::try_from(attempt).unwrap_or(u32::MAX);

        if attempt_number >= self.config.max_attempts {
            self.store
                .record_dead(delivery_id, attempt, error.clone(), status_code, duration_ms)
                .await?;
            self.metrics.dead.inc();

            error!(
                worker_id = self.id,
                delivery_id = %delivery_id,
                attempt,
                error = %error,
                "retries exhausted, delivery dead-lettered"
            );
        } else {
            let delay =
                exponential_backoff_seconds(attempt_number, self.config.backoff_base_seconds);
            let next_run_at =
                self.clock.now_utc() + chrono::Duration::seconds(i64::try_from(delay).unwrap_or(i64::MAX));

            self.store
                .record_failed(
                    delivery_id,
                    attempt,
                    error.clone(),
                    status_code,
                    duration_ms,
                    next_run_at,
                )
                .await?;
            self.metrics.failed.inc();

            warn!(
                worker_id = self.id,
                delivery_id = %delivery_id,
                attempt,
                next_run_at = %next_run_at,
                error = %error,
                "delivery failed, retry scheduled"
            );
        }

        self.finish_attempt(event_id, duration_ms).await
    }

    /// Duration metric plus event roll-up, shared by every outcome branch.
    async fn finish_attempt(&self, event_id: EventId, duration_ms: i64) -> Result<()> {
        #[allow(clippy::cast_precision_loss)]
        self.metrics.duration_ms.observe(duration_ms as f64);
        self.store.recompute_event_status(event_id).await?;
        Ok(())
    }
}

/// Serializes the outbound body for a delivery context.
fn serialize_body(context: &DeliveryContext) -> Result<String> {
    let payload = &context.event.payload.0;
    let body = WebhookBody {
        event_type: &context.event.event_type,
        event_id: context.event.id.to_string(),
        created_at: context.event.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        data: &payload.data,
        metadata: &payload.metadata,
    };

    Ok(serde_json::to_string(&body)?)
}
