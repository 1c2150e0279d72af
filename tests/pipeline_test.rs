//! End-to-end pipeline tests against a real PostgreSQL instance.
//!
//! These exercise the full path: ingestion fan-out, outbox claim, worker
//! attempt, and event status roll-up. They need a reachable database and are
//! ignored by default; run them with:
//!
//! ```text
//! DATABASE_URL=postgresql://localhost/fanout_test cargo test -- --ignored
//! ```

use std::sync::Arc;

use chrono::Utc;
use fanout_core::{
    models::{DeliveryStatus, EventStatus, OutboxStatus},
    storage::subscriptions::NewSubscription,
    Clock, CreateEvent, DeliveryMetrics, EventIngestor, RealClock, Storage,
};
use fanout_delivery::{
    ClientConfig, DeliveryStore, DeliveryWorker, PostgresDeliveryStore, WebhookClient,
    WorkerConfig,
};
use uuid::Uuid;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

struct TestEnv {
    storage: Storage,
    ingestor: EventIngestor,
    store: Arc<PostgresDeliveryStore>,
    clock: Arc<dyn Clock>,
}

impl TestEnv {
    async fn new() -> Self {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/fanout_test".to_string());
        let pool = sqlx::PgPool::connect(&url).await.expect("database reachable");
        fanout_core::storage::schema::ensure_schema(&pool).await.expect("schema created");

        let storage = Storage::new(pool);
        let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
        let ingestor = EventIngestor::new(storage.clone(), clock.clone());
        let store = Arc::new(PostgresDeliveryStore::new(storage.clone()));

        Self { storage, ingestor, store, clock }
    }

    fn worker(&self, max_attempts: u32) -> DeliveryWorker {
        DeliveryWorker::new(
            0,
            self.store.clone() as Arc<dyn DeliveryStore>,
            WebhookClient::new(ClientConfig::default()).expect("client builds"),
            WorkerConfig { max_attempts, backoff_base_seconds: 5 },
            DeliveryMetrics::unregistered(),
            self.clock.clone(),
        )
    }

    /// Event type names are unique per run so tests do not see each other's
    /// subscriptions.
    fn unique(prefix: &str) -> String {
        format!("{prefix}.{}", Uuid::new_v4().simple())
    }

    async fn subscribe(&self, event_type: &str, url: &str, secret: Option<&str>) {
        self.storage
            .subscriptions
            .create(NewSubscription {
                endpoint_url: url.to_string(),
                secret: secret.map(str::to_string),
                event_types: vec![event_type.to_string()],
            })
            .await
            .expect("subscription created");
    }

    async fn outbox_rows(&self, event_id: fanout_core::EventId) -> i64 {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM outbox o
            JOIN deliveries d ON d.id = o.delivery_id
            WHERE d.event_id = $1
            "#,
        )
        .bind(event_id.0)
        .fetch_one(&*self.storage.pool())
        .await
        .expect("count query");
        count.0
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn end_to_end_single_subscriber_delivery() {
    let env = TestEnv::new().await;
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let event_type = TestEnv::unique("user.created");
    env.subscribe(&event_type, &format!("{}/hook", mock_server.uri()), None).await;

    let outcome = env
        .ingestor
        .create_event(
            CreateEvent {
                event_type: event_type.clone(),
                event_id: None,
                created_at: None,
                data: serde_json::json!({"id": "1"}),
                metadata: None,
            },
            Some(&format!("k1-{}", Uuid::new_v4())),
        )
        .await
        .expect("ingestion succeeds");

    assert_eq!(outcome.status, EventStatus::Pending);
    assert!(!outcome.deduplicated);

    let deliveries = env.storage.deliveries.find_by_event(outcome.event_id).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Pending);

    // Dispatcher step: exactly one due entry is claimed.
    let claimed = env.store.claim_due(Utc::now(), 100).await.unwrap();
    assert!(claimed.contains(&deliveries[0].id));

    // Worker step: 200 response resolves the delivery and the event.
    env.worker(10).process(deliveries[0].id).await.expect("attempt succeeds");

    let delivery = env.storage.deliveries.find_by_id(deliveries[0].id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Sent);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.last_status_code, Some(200));

    let event = env.storage.events.find_by_id(outcome.event_id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Delivered);

    let logs = env.storage.delivery_logs.find_by_delivery(delivery.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, DeliveryStatus::Sent);
    assert_eq!(logs[0].status_code, Some(200));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn duplicate_idempotency_key_creates_nothing_new() {
    let env = TestEnv::new().await;
    let event_type = TestEnv::unique("order.placed");
    env.subscribe(&event_type, "https://example.invalid/hook", None).await;

    let key = format!("dup-{}", Uuid::new_v4());
    let request = CreateEvent {
        event_type: event_type.clone(),
        event_id: None,
        created_at: None,
        data: serde_json::json!({"n": 1}),
        metadata: None,
    };

    let first = env.ingestor.create_event(request.clone(), Some(&key)).await.unwrap();
    let second = env.ingestor.create_event(request, Some(&key)).await.unwrap();

    assert_eq!(first.event_id, second.event_id);
    assert!(!first.deduplicated);
    assert!(second.deduplicated);

    let deliveries = env.storage.deliveries.find_by_event(first.event_id).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(env.outbox_rows(first.event_id).await, 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn fan_out_covers_exactly_the_matching_enabled_subscriptions() {
    let env = TestEnv::new().await;
    let event_type = TestEnv::unique("invoice.paid");
    let other_type = TestEnv::unique("invoice.voided");

    env.subscribe(&event_type, "https://a.example.invalid/hook", None).await;
    env.subscribe(&event_type, "https://b.example.invalid/hook", None).await;
    env.subscribe(&other_type, "https://c.example.invalid/hook", None).await;

    // A disabled subscription matching the type must not receive a delivery.
    let disabled = env
        .storage
        .subscriptions
        .create(NewSubscription {
            endpoint_url: "https://d.example.invalid/hook".to_string(),
            secret: None,
            event_types: vec![event_type.clone()],
        })
        .await
        .unwrap();
    env.storage
        .subscriptions
        .update(disabled.id, fanout_core::storage::subscriptions::SubscriptionUpdate {
            is_enabled: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();

    let outcome = env
        .ingestor
        .create_event(
            CreateEvent {
                event_type: event_type.clone(),
                event_id: Some(format!("fanout-{}", Uuid::new_v4())),
                created_at: None,
                data: serde_json::json!({}),
                metadata: None,
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, EventStatus::Pending);
    let deliveries = env.storage.deliveries.find_by_event(outcome.event_id).await.unwrap();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(env.outbox_rows(outcome.event_id).await, 2);

    // No matching subscription: the event is immediately delivered.
    let silent = env
        .ingestor
        .create_event(
            CreateEvent {
                event_type: TestEnv::unique("nobody.cares"),
                event_id: Some(format!("silent-{}", Uuid::new_v4())),
                created_at: None,
                data: serde_json::json!({}),
                metadata: None,
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(silent.status, EventStatus::Delivered);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn concurrent_claims_take_each_entry_exactly_once() {
    let env = TestEnv::new().await;
    let event_type = TestEnv::unique("claim.race");
    env.subscribe(&event_type, "https://example.invalid/hook", None).await;

    let outcome = env
        .ingestor
        .create_event(
            CreateEvent {
                event_type,
                event_id: Some(format!("race-{}", Uuid::new_v4())),
                created_at: None,
                data: serde_json::json!({}),
                metadata: None,
            },
            None,
        )
        .await
        .unwrap();

    let deliveries = env.storage.deliveries.find_by_event(outcome.event_id).await.unwrap();
    let target = deliveries[0].id;

    // Race many claimants over one due entry; exactly one may win it.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = env.store.clone();
        handles.push(tokio::spawn(async move {
            store.claim_due(Utc::now(), 1000).await.unwrap()
        }));
    }

    let mut wins = 0;
    for handle in handles {
        let claimed = handle.await.unwrap();
        wins += claimed.iter().filter(|id| **id == target).count();
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn permanent_rejection_dead_letters_without_rescheduling() {
    let env = TestEnv::new().await;
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let event_type = TestEnv::unique("user.deleted");
    env.subscribe(&event_type, &format!("{}/hook", mock_server.uri()), None).await;

    let outcome = env
        .ingestor
        .create_event(
            CreateEvent {
                event_type,
                event_id: Some(format!("perm-{}", Uuid::new_v4())),
                created_at: None,
                data: serde_json::json!({}),
                metadata: None,
            },
            None,
        )
        .await
        .unwrap();

    let deliveries = env.storage.deliveries.find_by_event(outcome.event_id).await.unwrap();
    let delivery_id = deliveries[0].id;

    // Drain the initial outbox entry, then attempt.
    env.store.claim_due(Utc::now(), 1000).await.unwrap();
    env.worker(10).process(delivery_id).await.unwrap();

    let delivery = env.storage.deliveries.find_by_id(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Dead);
    assert_eq!(delivery.attempts, 1);

    // Permanent rejection creates no new outbox entry.
    assert!(!env.storage.outbox.has_pending(delivery_id).await.unwrap());

    let event = env.storage.events.find_by_id(outcome.event_id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Dead);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn transient_failure_schedules_a_future_outbox_entry() {
    let env = TestEnv::new().await;
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let event_type = TestEnv::unique("sync.failed");
    env.subscribe(&event_type, &format!("{}/hook", mock_server.uri()), None).await;

    let outcome = env
        .ingestor
        .create_event(
            CreateEvent {
                event_type,
                event_id: Some(format!("transient-{}", Uuid::new_v4())),
                created_at: None,
                data: serde_json::json!({}),
                metadata: None,
            },
            None,
        )
        .await
        .unwrap();

    let deliveries = env.storage.deliveries.find_by_event(outcome.event_id).await.unwrap();
    let delivery_id = deliveries[0].id;

    env.store.claim_due(Utc::now(), 1000).await.unwrap();
    let before = Utc::now();
    env.worker(10).process(delivery_id).await.unwrap();

    let delivery = env.storage.deliveries.find_by_id(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempts, 1);
    assert!(delivery.next_run_at.unwrap() > before);

    // The retry is durably scheduled: one claimed entry from ingestion plus
    // one pending entry at the delivery's next run time.
    assert!(env.storage.outbox.has_pending(delivery_id).await.unwrap());
    let entries = env.storage.outbox.find_by_delivery(delivery_id).await.unwrap();
    assert_eq!(entries.len(), 2);
    let pending: Vec<_> =
        entries.iter().filter(|e| e.status == OutboxStatus::Pending).collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].available_at, delivery.next_run_at.unwrap());

    let event = env.storage.events.find_by_id(outcome.event_id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Processing);
}
