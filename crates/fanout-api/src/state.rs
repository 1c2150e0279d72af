//! Shared application state for the HTTP layer.

use std::sync::Arc;

use fanout_core::{Clock, EventIngestor, Operations, Storage};
use prometheus_client::registry::Registry;

/// State shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository-backed storage.
    pub storage: Storage,

    /// Event ingestion service.
    pub ingestor: Arc<EventIngestor>,

    /// Operator actions on deliveries.
    pub operations: Arc<Operations>,

    /// Metric registry for the exposition endpoint.
    pub registry: Arc<Registry>,

    /// API key required on protected routes; `None` disables authentication.
    pub api_key: Option<String>,
}

impl AppState {
    /// Assembles application state from its parts.
    pub fn new(
        storage: Storage,
        clock: Arc<dyn Clock>,
        registry: Arc<Registry>,
        api_key: Option<String>,
    ) -> Self {
        let ingestor = Arc::new(EventIngestor::new(storage.clone(), clock));
        let operations = Arc::new(Operations::new(storage.clone()));

        Self { storage, ingestor, operations, registry, api_key }
    }
}
