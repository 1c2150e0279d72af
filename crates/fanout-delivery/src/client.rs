//! HTTP client for webhook delivery with bounded timeouts.
//!
//! Handles request construction (identity headers, optional signature) and
//! maps transport failures into retryable delivery errors. Status-code
//! classification for the retry decision also lives here.

use std::time::Duration;

use fanout_core::EventId;
use tracing::debug;

use crate::error::{DeliveryError, Result};
use crate::signature::SIGNATURE_HEADER;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout. Bounds every outbound call so a hanging endpoint
    /// becomes a retryable failure instead of a stuck worker.
    pub timeout: Duration,

    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Fanout-Webhook-Delivery/1.0".to_string(),
        }
    }
}

/// Outcome classification of a delivery attempt response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// 2xx: terminal success.
    Success,

    /// 4xx other than 408/429: terminal failure, not expected to
    /// self-resolve.
    Permanent,

    /// 5xx, 408, 429: worth retrying with backoff.
    Retryable,
}

/// Classifies an HTTP status code for the retry decision.
///
/// The permanent-vs-retryable 4xx split is a fixed allowlist: 408 and 429
/// retry, every other 4xx is abandoned.
pub fn classify_status(status: u16) -> ResponseKind {
    match status {
        200..=299 => ResponseKind::Success,
        408 | 429 => ResponseKind::Retryable,
        400..=499 => ResponseKind::Permanent,
        _ => ResponseKind::Retryable,
    }
}

/// A fully prepared outbound webhook call.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Destination URL.
    pub url: String,

    /// Event being delivered, for the identity headers.
    pub event_id: EventId,

    /// Event type, for the identity headers.
    pub event_type: String,

    /// Exact serialized JSON body. The signature, when present, was computed
    /// over these bytes.
    pub body: String,

    /// Precomputed `sha256=<hex>` signature, when the subscription has a
    /// secret.
    pub signature: Option<String>,
}

/// HTTP client optimized for webhook delivery.
///
/// Uses connection pooling and a per-request timeout. No store transaction
/// is ever held across a call.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl WebhookClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// POSTs the webhook and returns the response status code.
    ///
    /// Transport failures map to retryable errors:
    /// - `Timeout` for request timeouts
    /// - `Network` for connection, DNS, and TLS failures
    ///
    /// # Errors
    ///
    /// Returns a transport error when no HTTP response was received. Non-2xx
    /// responses are not errors; classification is the worker's concern.
    pub async fn deliver(&self, request: &WebhookRequest) -> Result<u16> {
        let mut http_request = self
            .client
            .post(&request.url)
            .header("Content-Type", "application/json")
            .header("X-Event-Id", request.event_id.to_string())
            .header("X-Event-Type", &request.event_type)
            .header("X-Event-Version", "1")
            .body(request.body.clone());

        if let Some(signature) = &request.signature {
            http_request = http_request.header(SIGNATURE_HEADER, signature);
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::timeout(self.config.timeout.as_secs())
            } else if e.is_connect() {
                DeliveryError::network(format!("connection failed: {e}"))
            } else {
                DeliveryError::network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        debug!(url = %request.url, status, "webhook response received");

        Ok(status)
    }
}
