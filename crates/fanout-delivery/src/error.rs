//! Error types for the delivery pipeline.
//!
//! Transport-level failures (timeouts, connection errors) are always treated
//! as retryable by the worker; HTTP status classification lives in the
//! client. Store failures abort the enclosing operation and surface here.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions in the dispatcher, worker pool, and HTTP client.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Seconds before the request timed out.
        timeout_seconds: u64,
    },

    /// Network-level connectivity failure (connection refused, DNS, TLS).
    #[error("network error: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// Store operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] fanout_core::CoreError),

    /// Request serialization failed.
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid client or engine configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The job queue closed while the dispatcher was enqueueing.
    #[error("delivery job queue closed")]
    QueueClosed,

    /// Workers did not finish within the shutdown grace period.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Grace period that was exceeded.
        timeout: Duration,
    },
}

impl DeliveryError {
    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether this is a transport-level failure that counts as a retryable
    /// delivery outcome rather than a pipeline fault.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. })
    }
}
