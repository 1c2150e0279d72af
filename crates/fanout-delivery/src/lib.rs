//! Webhook delivery pipeline with at-least-once guarantees.
//!
//! This crate implements the delivery side of the fanout service: a periodic
//! dispatcher claims due outbox entries from PostgreSQL and hands jobs to a
//! pool of workers that attempt signed HTTP delivery with exponential
//! backoff and a dead-letter path.
//!
//! # Architecture
//!
//! 1. **Claim** - the dispatcher claims due outbox entries with
//!    `FOR UPDATE SKIP LOCKED`, exactly once per entry
//! 2. **Enqueue** - one job per entry, carrying only the delivery ID
//! 3. **Attempt** - a worker builds the signed payload and POSTs it with a
//!    bounded timeout
//! 4. **Transition** - the outcome commits atomically: delivery update,
//!    audit log entry, and outbox re-entry on retry
//!
//! The store is the only synchronization point; workers share no mutable
//! state and may scale across processes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod client;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod signature;
pub mod store;
pub mod worker;

pub use backoff::{exponential_backoff_seconds, MAX_BACKOFF_SECONDS};
pub use client::{classify_status, ClientConfig, ResponseKind, WebhookClient};
pub use dispatcher::{DispatcherConfig, OutboxDispatcher};
pub use engine::{DeliveryEngine, EngineConfig};
pub use error::{DeliveryError, Result};
pub use signature::{sign_payload, verify_signature, SIGNATURE_HEADER};
pub use store::{DeliveryContext, DeliveryStore, PostgresDeliveryStore};
pub use worker::{DeliveryJob, DeliveryWorker, WorkerConfig};
