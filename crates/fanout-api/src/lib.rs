//! HTTP adapter layer for the fanout webhook service.
//!
//! Thin axum surface over the core: event ingestion, event and delivery
//! queries, manual operator actions, subscription CRUD, health, aggregate
//! stats, and Prometheus metrics exposition. Configuration loading lives
//! here too; the core treats its values as fixed inputs per run.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, start_server};
pub use state::AppState;
