//! HTTP server configuration and request routing.
//!
//! Axum server with a middleware stack of request-id injection, request
//! tracing, timeout enforcement, and API-key authentication on the protected
//! routes. Health and metrics endpoints stay public for probes and scrapers.

use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{handlers, middleware::auth::auth_middleware, state::AppState};

/// Creates the Axum router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_text));

    let api_routes = Router::new()
        .route("/events", post(handlers::create_event))
        .route("/events/{id}", get(handlers::get_event))
        .route("/events/{id}/summary", get(handlers::event_summary))
        .route("/events/{id}/retry", post(handlers::retry_event))
        .route("/deliveries", get(handlers::list_deliveries))
        .route("/deliveries/{id}/retry", post(handlers::retry_delivery))
        .route("/deliveries/{id}/mark-dead", post(handlers::mark_dead))
        .route("/deliveries/{id}/cancel", post(handlers::cancel_delivery))
        .route(
            "/subscriptions",
            post(handlers::create_subscription).get(handlers::list_subscriptions),
        )
        .route(
            "/subscriptions/{id}",
            get(handlers::get_subscription).patch(handlers::update_subscription),
        )
        .route("/stats", get(handlers::stats))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware injecting an `X-Request-Id` header into every response.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server and serves until the shutdown future resolves.
///
/// # Errors
///
/// Returns error if binding or serving fails.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fanout_core::{RealClock, Storage};
    use prometheus_client::registry::Registry;

    use super::*;

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let state = AppState::new(
            Storage::new(pool),
            Arc::new(RealClock::new()),
            Arc::new(Registry::default()),
            Some("key".to_string()),
        );

        let _router = create_router(state);
    }
}
