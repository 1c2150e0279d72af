//! Core domain models and strongly-typed identifiers.
//!
//! Defines events, subscriptions, deliveries, delivery logs, and outbox
//! entries, plus newtype ID wrappers for compile-time type safety. Includes
//! database serialization traits and the event status roll-up logic.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed event identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Events are immutable
/// once created apart from their roll-up status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for SubscriptionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriptionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriptionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed delivery identifier.
///
/// A delivery tracks one event against one subscription; this ID is the job
/// payload handed from the dispatcher to the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for DeliveryId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Event roll-up status.
///
/// The status is always a deterministic function of the event's delivery
/// states, recomputed by the aggregator after every delivery transition:
///
/// ```text
/// Pending -> Processing -> Delivered
///                       -> PartiallyDelivered
///                       -> Dead
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Accepted and fanned out, no attempt processed yet.
    Pending,

    /// At least one delivery is still in flight (pending or retrying).
    Processing,

    /// Every delivery reached its endpoint, or there was nothing to deliver.
    Delivered,

    /// Mixed terminal outcome: some deliveries sent, some dead.
    PartiallyDelivered,

    /// Every delivery exhausted its retries or was rejected permanently.
    Dead,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Delivered => write!(f, "DELIVERED"),
            Self::PartiallyDelivered => write!(f, "PARTIALLY_DELIVERED"),
            Self::Dead => write!(f, "DEAD"),
        }
    }
}

impl sqlx::Type<PgDb> for EventStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "DELIVERED" => Ok(Self::Delivered),
            "PARTIALLY_DELIVERED" => Ok(Self::PartiallyDelivered),
            "DEAD" => Ok(Self::Dead),
            _ => Err(format!("invalid event status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for EventStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Delivery lifecycle status.
///
/// `Sent` and `Dead` are terminal; only `Pending` and `Failed` deliveries may
/// have further attempts scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Waiting for its first attempt.
    Pending,

    /// Last attempt failed transiently; a retry is scheduled.
    Failed,

    /// Endpoint acknowledged with 2xx. Terminal.
    Sent,

    /// Permanently rejected, retries exhausted, or operator action. Terminal.
    Dead,
}

impl DeliveryStatus {
    /// Whether no further attempts will be made for this delivery.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Dead)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Failed => write!(f, "FAILED"),
            Self::Sent => write!(f, "SENT"),
            Self::Dead => write!(f, "DEAD"),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "PENDING" => Ok(Self::Pending),
            "FAILED" => Ok(Self::Failed),
            "SENT" => Ok(Self::Sent),
            "DEAD" => Ok(Self::Dead),
            _ => Err(format!("invalid delivery status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Outbox entry status.
///
/// Entries are claimed exactly once: `Pending` rows become `Processed` when
/// the dispatcher hands the corresponding job to the work queue. A claim is
/// never reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Due (or scheduled) and not yet dispatched.
    Pending,

    /// Claimed by a dispatcher tick.
    Processed,
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Processed => write!(f, "PROCESSED"),
        }
    }
}

impl sqlx::Type<PgDb> for OutboxStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for OutboxStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSED" => Ok(Self::Processed),
            _ => Err(format!("invalid outbox status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for OutboxStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Opaque event payload: business data plus optional caller metadata.
///
/// Stored as a single JSONB column and forwarded verbatim to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Business payload supplied by the producer.
    pub data: Value,

    /// Optional caller metadata (trace IDs and similar).
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// One ingested occurrence.
///
/// # Idempotency
///
/// Events are deduplicated by `event_key`, which is globally unique. A
/// creation request carrying a previously seen key returns the existing event
/// unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,

    /// Caller-supplied idempotency key. Globally unique.
    pub event_key: String,

    /// Event type used for subscription matching, e.g. `user.created`.
    pub event_type: String,

    /// Opaque payload forwarded to subscribers.
    pub payload: sqlx::types::Json<EventPayload>,

    /// Roll-up of the event's delivery states.
    pub status: EventStatus,

    /// When the event occurred.
    pub created_at: DateTime<Utc>,

    /// When the roll-up status last changed.
    pub updated_at: DateTime<Utc>,
}

/// A webhook endpoint interested in a set of event types.
///
/// Owned by the subscription CRUD surface; the delivery pipeline only reads
/// enabled subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Target URL for webhook delivery.
    pub endpoint_url: String,

    /// Shared secret for HMAC request signing. Unsigned when absent.
    pub secret: Option<String>,

    /// Event types this subscriber wants. Non-empty.
    pub event_types: Vec<String>,

    /// Disabled subscriptions are skipped at fan-out time.
    pub is_enabled: bool,

    /// When this subscription was registered.
    pub created_at: DateTime<Utc>,
}

/// The attempt record of one event against one subscription.
///
/// Exactly one delivery exists per (event, subscription) pair, created at
/// ingestion time. `attempts` increments by exactly one per processed
/// attempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    /// Unique identifier for this delivery.
    pub id: DeliveryId,

    /// Event being delivered.
    pub event_id: EventId,

    /// Destination subscription.
    pub subscription_id: SubscriptionId,

    /// Current lifecycle status.
    pub status: DeliveryStatus,

    /// Number of processed attempts.
    pub attempts: i32,

    /// Earliest instant the next attempt may run. None once terminal states
    /// stop scheduling.
    pub next_run_at: Option<DateTime<Utc>>,

    /// Error text from the most recent failed attempt.
    pub last_error: Option<String>,

    /// HTTP status code from the most recent attempt that got a response.
    pub last_status_code: Option<i32>,

    /// When this delivery was created.
    pub created_at: DateTime<Utc>,

    /// When this delivery last changed.
    pub updated_at: DateTime<Utc>,
}

/// Immutable audit record of one delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryLog {
    /// Delivery this attempt belongs to.
    pub delivery_id: DeliveryId,

    /// Sequential attempt number, 1-based.
    pub attempt: i32,

    /// Delivery status resulting from this attempt.
    pub status: DeliveryStatus,

    /// HTTP status code, when a response was received.
    pub status_code: Option<i32>,

    /// Error text, when the attempt failed.
    pub error: Option<String>,

    /// Wall-clock duration of the attempt in milliseconds.
    pub response_time_ms: i64,

    /// When this attempt was recorded.
    pub created_at: DateTime<Utc>,
}

/// Durable "work due" marker decoupling scheduling from the in-memory queue.
///
/// Created in the same transaction as the delivery state it refers to, at
/// ingestion, retry scheduling, or manual retry. Append-only schedule log:
/// one delivery accumulates one row per scheduling decision.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxEntry {
    /// Unique identifier for this entry.
    pub id: Uuid,

    /// Delivery to attempt when the entry becomes due.
    pub delivery_id: DeliveryId,

    /// Instant from which the entry may be claimed.
    pub available_at: DateTime<Utc>,

    /// Claim state.
    pub status: OutboxStatus,

    /// When the dispatcher claimed this entry.
    pub processed_at: Option<DateTime<Utc>>,
}

/// Recomputes an event's roll-up status from its delivery states.
///
/// First match wins: nothing to deliver counts as fully handled; all-sent is
/// delivered; all-dead is dead; a mix of terminal outcomes is partially
/// delivered; anything still pending or retrying keeps the event processing.
pub fn rollup_status(deliveries: &[DeliveryStatus]) -> EventStatus {
    if deliveries.is_empty() {
        return EventStatus::Delivered;
    }
    if deliveries.iter().all(|s| *s == DeliveryStatus::Sent) {
        return EventStatus::Delivered;
    }
    if deliveries.iter().all(|s| *s == DeliveryStatus::Dead) {
        return EventStatus::Dead;
    }
    let any_dead = deliveries.iter().any(|s| *s == DeliveryStatus::Dead);
    let any_sent = deliveries.iter().any(|s| *s == DeliveryStatus::Sent);
    if any_dead && any_sent {
        return EventStatus::PartiallyDelivered;
    }
    EventStatus::Processing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_status_display_format() {
        assert_eq!(EventStatus::Pending.to_string(), "PENDING");
        assert_eq!(EventStatus::Processing.to_string(), "PROCESSING");
        assert_eq!(EventStatus::Delivered.to_string(), "DELIVERED");
        assert_eq!(EventStatus::PartiallyDelivered.to_string(), "PARTIALLY_DELIVERED");
        assert_eq!(EventStatus::Dead.to_string(), "DEAD");
    }

    #[test]
    fn delivery_status_terminal_states() {
        assert!(DeliveryStatus::Sent.is_terminal());
        assert!(DeliveryStatus::Dead.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::Failed.is_terminal());
    }

    #[test]
    fn rollup_no_deliveries_is_delivered() {
        assert_eq!(rollup_status(&[]), EventStatus::Delivered);
    }

    #[test]
    fn rollup_all_sent_is_delivered() {
        assert_eq!(
            rollup_status(&[DeliveryStatus::Sent, DeliveryStatus::Sent]),
            EventStatus::Delivered
        );
    }

    #[test]
    fn rollup_all_dead_is_dead() {
        assert_eq!(
            rollup_status(&[DeliveryStatus::Dead, DeliveryStatus::Dead]),
            EventStatus::Dead
        );
    }

    #[test]
    fn rollup_mixed_terminal_is_partially_delivered() {
        assert_eq!(
            rollup_status(&[DeliveryStatus::Sent, DeliveryStatus::Dead]),
            EventStatus::PartiallyDelivered
        );
    }

    #[test]
    fn rollup_in_flight_is_processing() {
        assert_eq!(
            rollup_status(&[DeliveryStatus::Pending, DeliveryStatus::Sent]),
            EventStatus::Processing
        );
        assert_eq!(
            rollup_status(&[DeliveryStatus::Failed, DeliveryStatus::Dead]),
            EventStatus::Processing
        );
        assert_eq!(rollup_status(&[DeliveryStatus::Pending]), EventStatus::Processing);
    }

    #[test]
    fn event_payload_round_trips_metadata() {
        let payload = EventPayload {
            data: serde_json::json!({"id": "1"}),
            metadata: Some(serde_json::json!({"trace_id": "abc"})),
        };
        let text = serde_json::to_string(&payload).unwrap();
        let back: EventPayload = serde_json::from_str(&text).unwrap();
        assert_eq!(back, payload);

        let bare: EventPayload = serde_json::from_str(r#"{"data":{"id":"1"}}"#).unwrap();
        assert_eq!(bare.metadata, None);
    }
}
