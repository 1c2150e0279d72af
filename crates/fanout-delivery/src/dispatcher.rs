//! Outbox dispatcher: periodically claims due entries and enqueues jobs.
//!
//! Runs on a fixed poll interval. Each tick claims a batch of due outbox
//! entries (exactly once, even with multiple dispatcher instances) and hands
//! one job per entry to the worker queue. A lower-frequency watchdog sweep
//! re-arms deliveries whose claimed work was lost before processing.

use std::{sync::Arc, time::Duration};

use fanout_core::Clock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    store::DeliveryStore,
    worker::DeliveryJob,
};

/// Configuration for the outbox dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum outbox entries claimed per tick.
    pub batch_size: i64,

    /// Poll interval between ticks.
    pub poll_interval: Duration,

    /// Watchdog sweep cadence, counted in dispatch ticks.
    pub sweep_every_ticks: u32,

    /// How long a delivery must be overdue before the watchdog re-arms it.
    /// Keeps the sweep from racing jobs that are merely in flight.
    pub stuck_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(2000),
            sweep_every_ticks: 30,
            stuck_grace: Duration::from_secs(60),
        }
    }
}

/// Periodic dispatcher claiming due outbox entries for the worker pool.
pub struct OutboxDispatcher {
    store: Arc<dyn DeliveryStore>,
    jobs: mpsc::Sender<DeliveryJob>,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
}

impl OutboxDispatcher {
    /// Creates a new dispatcher.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        jobs: mpsc::Sender<DeliveryJob>,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, jobs, config, clock }
    }

    /// Ticks until cancelled. Dispatch errors are logged, never fatal.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis(),
            "outbox dispatcher starting"
        );

        let mut ticks: u32 = 0;

        loop {
            tokio::select! {
                () = self.clock.sleep(self.config.poll_interval) => {},
                () = cancel.cancelled() => break,
            }

            match self.dispatch_once().await {
                Ok(_) => {},
                Err(DeliveryError::QueueClosed) => {
                    // Workers are gone; nothing left to dispatch to.
                    warn!("job queue closed, dispatcher stopping");
                    break;
                },
                Err(err) => {
                    error!(error = %err, "outbox dispatch tick failed");
                },
            }

            ticks = ticks.wrapping_add(1);
            if self.config.sweep_every_ticks > 0 && ticks % self.config.sweep_every_ticks == 0 {
                if let Err(err) = self.sweep_once().await {
                    error!(error = %err, "watchdog sweep failed");
                }
            }
        }

        info!("outbox dispatcher stopped");
    }

    /// Claims one batch of due entries and enqueues their jobs.
    ///
    /// The claim is irreversible: entries are marked processed in the same
    /// transaction that selects them, before the jobs are enqueued. A job
    /// lost after the claim is recovered through the delivery's own
    /// `next_run_at` by the watchdog sweep, not by un-claiming.
    ///
    /// Returns the number of jobs enqueued. An empty batch is a silent
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::QueueClosed` when the worker queue has shut
    /// down, or a storage error when the claim transaction fails.
    pub async fn dispatch_once(&self) -> Result<usize> {
        let now = self.clock.now_utc();
        let claimed = self.store.claim_due(now, self.config.batch_size).await?;

        if claimed.is_empty() {
            return Ok(0);
        }

        let count = claimed.len();
        for delivery_id in claimed {
            self.jobs
                .send(DeliveryJob { delivery_id })
                .await
                .map_err(|_| DeliveryError::QueueClosed)?;
        }

        info!(dispatched = count, "dispatched outbox batch");
        Ok(count)
    }

    /// Re-arms deliveries stuck past due with no pending outbox entry.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the sweep query fails.
    pub async fn sweep_once(&self) -> Result<u64> {
        let grace = chrono::Duration::from_std(self.config.stuck_grace)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let stuck_before = self.clock.now_utc() - grace;

        let rearmed = self.store.rearm_stuck(stuck_before).await?;
        if rearmed > 0 {
            warn!(rearmed, "watchdog re-armed stuck deliveries");
        } else {
            debug!("watchdog sweep found nothing stuck");
        }

        Ok(rearmed)
    }
}
