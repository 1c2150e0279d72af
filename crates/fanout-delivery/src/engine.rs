//! Delivery engine: wires the dispatcher and worker pool together.
//!
//! The engine owns the job queue, spawns one dispatcher task and a pool of
//! worker tasks, and coordinates graceful shutdown: cancellation is
//! signalled, the queue drains, and workers finish in-flight deliveries
//! within a bounded grace period.

use std::{sync::Arc, time::Duration};

use fanout_core::{Clock, DeliveryMetrics};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::{ClientConfig, WebhookClient},
    dispatcher::{DispatcherConfig, OutboxDispatcher},
    error::{DeliveryError, Result},
    store::DeliveryStore,
    worker::{DeliveryWorker, JobReceiver, WorkerConfig},
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Capacity of the in-memory job queue.
    pub queue_capacity: usize,

    /// Dispatcher settings.
    pub dispatcher: DispatcherConfig,

    /// Worker retry settings.
    pub worker: WorkerConfig,

    /// Outbound HTTP client settings.
    pub client: ClientConfig,

    /// Maximum time to wait for workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 1024,
            dispatcher: DispatcherConfig::default(),
            worker: WorkerConfig::default(),
            client: ClientConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Coordinates the outbox dispatcher and the delivery worker pool.
pub struct DeliveryEngine {
    store: Arc<dyn DeliveryStore>,
    config: EngineConfig,
    metrics: DeliveryMetrics,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl DeliveryEngine {
    /// Creates a new engine over the given store.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        config: EngineConfig,
        metrics: DeliveryMetrics,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
            clock,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Spawns the dispatcher and worker tasks.
    ///
    /// Returns immediately; use [`DeliveryEngine::shutdown`] to stop
    /// gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.dispatcher.batch_size,
            "starting delivery engine"
        );

        let (sender, receiver) = mpsc::channel(self.config.queue_capacity);
        let receiver: JobReceiver = Arc::new(Mutex::new(receiver));

        let dispatcher = OutboxDispatcher::new(
            self.store.clone(),
            sender,
            self.config.dispatcher.clone(),
            self.clock.clone(),
        );
        let dispatcher_cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            dispatcher.run(dispatcher_cancel).await;
        }));

        let client = WebhookClient::new(self.config.client.clone())?;
        for worker_id in 0..self.config.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.store.clone(),
                client.clone(),
                self.config.worker.clone(),
                self.metrics.clone(),
                self.clock.clone(),
            );
            let jobs = receiver.clone();
            let cancel = self.cancel.clone();
            self.handles.push(tokio::spawn(async move {
                worker.run(jobs, cancel).await;
            }));
        }

        info!("delivery engine started");
        Ok(())
    }

    /// Signals cancellation and waits for all tasks to finish.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` when tasks do not finish
    /// within the configured grace period.
    pub async fn shutdown(mut self) -> Result<()> {
        info!(task_count = self.handles.len(), "shutting down delivery engine");

        self.cancel.cancel();

        let timeout = self.config.shutdown_timeout;
        let join_all = async {
            for (index, handle) in std::mem::take(&mut self.handles).into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(task = index, error = %join_error, "engine task panicked");
                }
            }
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(()) => {
                info!("delivery engine shutdown complete");
                Ok(())
            },
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "engine shutdown timed out");
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        if !self.handles.is_empty() && !self.cancel.is_cancelled() {
            warn!(
                active_tasks = self.handles.len(),
                "delivery engine dropped without shutdown, cancelling tasks"
            );
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use fanout_core::RealClock;

    use super::*;
    use crate::store::mock::MockDeliveryStore;

    #[tokio::test]
    async fn engine_starts_and_shuts_down_with_no_work() {
        let store = Arc::new(MockDeliveryStore::new());
        let config = EngineConfig {
            worker_count: 2,
            dispatcher: DispatcherConfig {
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            shutdown_timeout: Duration::from_secs(5),
            ..Default::default()
        };

        let mut engine = DeliveryEngine::new(
            store,
            config,
            DeliveryMetrics::unregistered(),
            Arc::new(RealClock::new()),
        );

        engine.start().await.expect("engine should start");
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.shutdown().await.expect("engine should shut down");
    }

    #[tokio::test]
    async fn shutdown_without_start_is_immediate() {
        let store = Arc::new(MockDeliveryStore::new());
        let engine = DeliveryEngine::new(
            store,
            EngineConfig::default(),
            DeliveryMetrics::unregistered(),
            Arc::new(RealClock::new()),
        );

        engine.shutdown().await.expect("no tasks to join");
    }
}
