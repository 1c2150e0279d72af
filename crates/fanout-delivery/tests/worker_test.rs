//! Delivery worker state machine tests.
//!
//! Exercises the full per-attempt state machine against the in-memory mock
//! store and a wiremock endpoint: terminal success, permanent rejection,
//! transient failure with backoff, retry exhaustion, premature jobs, and
//! idempotent no-ops.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use fanout_core::{
    models::{Delivery, DeliveryStatus, Event, EventPayload, EventStatus, Subscription,
             SubscriptionId},
    Clock, DeliveryId, DeliveryMetrics, EventId, TestClock,
};
use fanout_delivery::{
    sign_payload,
    store::{mock::MockDeliveryStore, mock::Transition, DeliveryContext, DeliveryStore},
    ClientConfig, DeliveryWorker, WebhookClient, WorkerConfig,
};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

struct TestHarness {
    store: Arc<MockDeliveryStore>,
    worker: DeliveryWorker,
    metrics: DeliveryMetrics,
    clock: Arc<TestClock>,
}

fn harness_with_config(config: WorkerConfig) -> TestHarness {
    let store = Arc::new(MockDeliveryStore::new());
    let metrics = DeliveryMetrics::unregistered();
    let clock = Arc::new(TestClock::new());
    let client = WebhookClient::new(ClientConfig::default()).expect("client builds");

    let worker = DeliveryWorker::new(
        0,
        store.clone() as Arc<dyn DeliveryStore>,
        client,
        config,
        metrics.clone(),
        clock.clone() as Arc<dyn Clock>,
    );

    TestHarness { store, worker, metrics, clock }
}

fn harness() -> TestHarness {
    harness_with_config(WorkerConfig::default())
}

fn context(clock: &TestClock, endpoint_url: String, secret: Option<String>) -> DeliveryContext {
    let now = clock.now_utc();
    let event_id = EventId::new();
    let subscription_id = SubscriptionId::new();

    DeliveryContext {
        delivery: Delivery {
            id: DeliveryId::new(),
            event_id,
            subscription_id,
            status: DeliveryStatus::Pending,
            attempts: 0,
            next_run_at: Some(now - ChronoDuration::seconds(1)),
            last_error: None,
            last_status_code: None,
            created_at: now,
            updated_at: now,
        },
        event: Event {
            id: event_id,
            event_key: "k1".to_string(),
            event_type: "user.created".to_string(),
            payload: sqlx::types::Json(EventPayload {
                data: serde_json::json!({"id": "1"}),
                metadata: None,
            }),
            status: EventStatus::Pending,
            created_at: now,
            updated_at: now,
        },
        subscription: Subscription {
            id: subscription_id,
            endpoint_url,
            secret,
            event_types: vec!["user.created".to_string()],
            is_enabled: true,
            created_at: now,
        },
    }
}

#[tokio::test]
async fn successful_delivery_marks_sent_and_recomputes() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let harness = harness();
    let ctx = context(&harness.clock, format!("{}/hook", mock_server.uri()), None);
    let delivery_id = ctx.delivery.id;
    let event_id = ctx.event.id;
    harness.store.add_context(ctx).await;

    harness.worker.process(delivery_id).await.expect("process succeeds");

    let transitions = harness.store.transitions().await;
    assert_eq!(
        transitions,
        vec![Transition::Sent { delivery_id, attempt: 1, status_code: 200 }]
    );
    assert_eq!(harness.metrics.sent.get(), 1);
    assert_eq!(harness.metrics.failed.get(), 0);
    assert_eq!(harness.metrics.dead.get(), 0);
    assert_eq!(harness.store.recomputed().await, vec![event_id]);

    let (status, attempts, _) = harness.store.delivery_state(delivery_id).await.unwrap();
    assert_eq!(status, DeliveryStatus::Sent);
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn permanent_4xx_dead_letters_after_one_attempt() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let harness = harness();
    let ctx = context(&harness.clock, format!("{}/hook", mock_server.uri()), None);
    let delivery_id = ctx.delivery.id;
    harness.store.add_context(ctx).await;

    harness.worker.process(delivery_id).await.expect("process succeeds");

    let transitions = harness.store.transitions().await;
    assert_eq!(transitions.len(), 1);
    match &transitions[0] {
        Transition::Dead { attempt, status_code, error, .. } => {
            assert_eq!(*attempt, 1);
            assert_eq!(*status_code, Some(404));
            assert!(error.contains("404"));
        },
        other => panic!("expected Dead transition, got {other:?}"),
    }
    assert_eq!(harness.metrics.dead.get(), 1);

    // Permanent rejection schedules no further work.
    let claimed = harness.store.claim_due(harness.clock.now_utc(), 100).await.unwrap();
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn retryable_5xx_schedules_backoff_and_outbox_entry() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let harness = harness();
    let ctx = context(&harness.clock, format!("{}/hook", mock_server.uri()), None);
    let delivery_id = ctx.delivery.id;
    harness.store.add_context(ctx).await;

    let before = harness.clock.now_utc();
    harness.worker.process(delivery_id).await.expect("process succeeds");

    let transitions = harness.store.transitions().await;
    assert_eq!(transitions.len(), 1);
    match &transitions[0] {
        Transition::Failed { attempt, next_run_at, .. } => {
            assert_eq!(*attempt, 1);
            // First retry waits the base delay (5s by default).
            assert_eq!((*next_run_at - before).num_seconds(), 5);
        },
        other => panic!("expected Failed transition, got {other:?}"),
    }
    assert_eq!(harness.metrics.failed.get(), 1);

    // A retryable failure re-enters the schedule.
    let claimed = harness.store.claim_due(harness.clock.now_utc(), 100).await.unwrap();
    assert_eq!(claimed, vec![delivery_id]);

    let (status, attempts, next_run_at) =
        harness.store.delivery_state(delivery_id).await.unwrap();
    assert_eq!(status, DeliveryStatus::Failed);
    assert_eq!(attempts, 1);
    assert!(next_run_at.unwrap() > before);
}

#[tokio::test]
async fn last_allowed_attempt_dead_letters() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let harness = harness_with_config(WorkerConfig { max_attempts: 3, ..Default::default() });
    let mut ctx = context(&harness.clock, format!("{}/hook", mock_server.uri()), None);
    ctx.delivery.attempts = 2; // next attempt is the third and last
    let delivery_id = ctx.delivery.id;
    harness.store.add_context(ctx).await;

    harness.worker.process(delivery_id).await.expect("process succeeds");

    let (status, attempts, _) = harness.store.delivery_state(delivery_id).await.unwrap();
    assert_eq!(status, DeliveryStatus::Dead);
    assert_eq!(attempts, 3);
    assert_eq!(harness.metrics.dead.get(), 1);
}

#[tokio::test]
async fn transient_failures_exhaust_into_dead_letter() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let max_attempts = 4;
    let harness = harness_with_config(WorkerConfig {
        max_attempts,
        backoff_base_seconds: 5,
    });
    let ctx = context(&harness.clock, format!("{}/hook", mock_server.uri()), None);
    let delivery_id = ctx.delivery.id;
    harness.store.add_context(ctx).await;

    for _ in 0..max_attempts {
        harness.worker.process(delivery_id).await.expect("process succeeds");
        // Step virtual time past whatever backoff was scheduled.
        harness.clock.advance(std::time::Duration::from_secs(3601));
    }

    let (status, attempts, _) = harness.store.delivery_state(delivery_id).await.unwrap();
    assert_eq!(status, DeliveryStatus::Dead);
    assert_eq!(attempts, i32::try_from(max_attempts).unwrap());

    // One audit transition per processed attempt.
    let transitions = harness.store.transitions().await;
    assert_eq!(transitions.len(), max_attempts as usize);
    assert!(matches!(transitions.last(), Some(Transition::Dead { .. })));
    assert_eq!(harness.metrics.failed.get(), u64::from(max_attempts) - 1);
    assert_eq!(harness.metrics.dead.get(), 1);
}

#[tokio::test]
async fn terminal_delivery_is_a_noop() {
    let harness = harness();
    let mut ctx = context(&harness.clock, "http://127.0.0.1:1/hook".to_string(), None);
    ctx.delivery.status = DeliveryStatus::Sent;
    let delivery_id = ctx.delivery.id;
    harness.store.add_context(ctx).await;

    harness.worker.process(delivery_id).await.expect("no-op succeeds");

    assert!(harness.store.transitions().await.is_empty());
    assert!(harness.store.recomputed().await.is_empty());
}

#[tokio::test]
async fn missing_delivery_is_a_noop() {
    let harness = harness();

    harness.worker.process(DeliveryId::new()).await.expect("no-op succeeds");

    assert!(harness.store.transitions().await.is_empty());
}

#[tokio::test]
async fn premature_job_rearms_without_attempting() {
    let harness = harness();
    let mut ctx = context(&harness.clock, "http://127.0.0.1:1/hook".to_string(), None);
    let future_run = harness.clock.now_utc() + ChronoDuration::seconds(300);
    ctx.delivery.next_run_at = Some(future_run);
    let delivery_id = ctx.delivery.id;
    harness.store.add_context(ctx).await;

    harness.worker.process(delivery_id).await.expect("rearm succeeds");

    assert_eq!(harness.store.rearmed().await, vec![(delivery_id, future_run)]);
    assert!(harness.store.transitions().await.is_empty());

    let (status, attempts, _) = harness.store.delivery_state(delivery_id).await.unwrap();
    assert_eq!(status, DeliveryStatus::Pending);
    assert_eq!(attempts, 0);
}

#[tokio::test]
async fn transport_failure_is_retried() {
    // Nothing listens on port 1; the connection is refused.
    let harness = harness();
    let ctx = context(&harness.clock, "http://127.0.0.1:1/hook".to_string(), None);
    let delivery_id = ctx.delivery.id;
    harness.store.add_context(ctx).await;

    harness.worker.process(delivery_id).await.expect("process succeeds");

    let transitions = harness.store.transitions().await;
    assert_eq!(transitions.len(), 1);
    assert!(matches!(&transitions[0], Transition::Failed { attempt: 1, .. }));
    assert_eq!(harness.metrics.failed.get(), 1);
}

#[tokio::test]
async fn secret_subscription_gets_a_valid_signature() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::header_exists("X-Signature"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let harness = harness();
    let ctx = context(
        &harness.clock,
        format!("{}/hook", mock_server.uri()),
        Some("Jefe".to_string()),
    );
    let delivery_id = ctx.delivery.id;
    harness.store.add_context(ctx).await;

    harness.worker.process(delivery_id).await.expect("process succeeds");
    assert_eq!(harness.metrics.sent.get(), 1);

    // The signature must be the HMAC of the exact bytes that were sent.
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let header = request.headers.get("X-Signature").expect("signature header");
    assert_eq!(header.to_str().unwrap(), sign_payload("Jefe", &request.body));
}

#[tokio::test]
async fn unsigned_when_subscription_has_no_secret() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let harness = harness();
    let ctx = context(&harness.clock, format!("{}/hook", mock_server.uri()), None);
    let delivery_id = ctx.delivery.id;
    harness.store.add_context(ctx).await;

    harness.worker.process(delivery_id).await.expect("process succeeds");

    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("X-Signature").is_none());
}
