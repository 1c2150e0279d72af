//! API-key authentication middleware.
//!
//! Protected routes require the configured key in `X-Api-Key`. When no key
//! is configured, authentication is disabled. Health and metrics routes are
//! mounted outside this middleware and stay public.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

/// Rejects requests whose `X-Api-Key` header does not match the configured
/// key.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_key else {
        return next.run(request).await;
    };

    let provided = request.headers().get("x-api-key").and_then(|v| v.to_str().ok());

    if provided == Some(expected.as_str()) {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "rejected request with invalid API key");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": { "code": "unauthorized", "message": "invalid API key" }
            })),
        )
            .into_response()
    }
}
