//! Core domain models, storage layer, and ingestion for the fanout service.
//!
//! Provides strongly-typed domain primitives, the repository-pattern database
//! layer whose transactions enforce the pipeline invariants, idempotent event
//! ingestion with transactional fan-out, and the metric handles shared by the
//! delivery workers and the exposition endpoint.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod ops;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use ingest::{CreateEvent, EventIngestor, IngestOutcome};
pub use ops::Operations;
pub use metrics::DeliveryMetrics;
pub use models::{
    rollup_status, Delivery, DeliveryId, DeliveryLog, DeliveryStatus, Event, EventId,
    EventPayload, EventStatus, OutboxEntry, OutboxStatus, Subscription, SubscriptionId,
};
pub use storage::Storage;
pub use time::{Clock, RealClock, TestClock};
