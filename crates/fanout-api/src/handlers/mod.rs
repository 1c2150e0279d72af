//! HTTP request handlers.

pub mod deliveries;
pub mod events;
pub mod health;
pub mod metrics;
pub mod subscriptions;

pub use deliveries::{cancel_delivery, list_deliveries, mark_dead, retry_delivery, retry_event};
pub use events::{create_event, event_summary, get_event};
pub use health::health_check;
pub use metrics::{metrics_text, stats};
pub use subscriptions::{
    create_subscription, get_subscription, list_subscriptions, update_subscription,
};
