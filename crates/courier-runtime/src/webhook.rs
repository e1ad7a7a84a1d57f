//! Webhook HTTP endpoints.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /hooks/{source}` | Run one delivery through the inbound pipeline |
//! | `GET /health` | Liveness plus per-channel online state |
//!
//! The delivery token travels in `?token=` or in a top-level `token` field
//! of the JSON body. The event type hint is read from `X-GitHub-Event`,
//! `X-Gitlab-Event` or `X-Event-Type`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_core::CourierError;
use courier_framework::{IncomingOutcome, IncomingProcessor};

use crate::connections::ConnectionManager;

const HINT_HEADERS: &[&str] = &["x-github-event", "x-gitlab-event", "x-event-type"];

#[derive(Clone)]
pub struct WebhookState {
    pub processor: Arc<IncomingProcessor>,
    pub connections: Arc<ConnectionManager>,
}

/// Builds the router for the webhook endpoints.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/hooks/{source}", post(receive))
        .route("/health", get(health))
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Webhook server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// =============================================================================
// Handlers
// =============================================================================

async fn receive(
    State(state): State<WebhookState>,
    Path(source): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IncomingOutcome>, ApiError> {
    let mut payload: Value = serde_json::from_slice(&body)
        .map_err(|e| CourierError::validation(format!("body is not JSON: {e}")))?;

    // The body token is transport metadata, not part of the event.
    let body_token = payload
        .as_object_mut()
        .and_then(|map| map.remove("token"))
        .and_then(|token| token.as_str().map(str::to_string));
    let token = query.get("token").cloned().or(body_token);

    let hint = HINT_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(str::to_string);

    debug!(source = %source, hint = ?hint, "Webhook received");
    let outcome = state
        .processor
        .process_incoming(&source, token.as_deref(), &payload, hint.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn health(State(state): State<WebhookState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "channels": state.connections.statuses().await,
    }))
}

// =============================================================================
// Errors
// =============================================================================

/// Maps pipeline errors onto HTTP statuses.
pub struct ApiError(pub CourierError);

impl From<CourierError> for ApiError {
    fn from(err: CourierError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CourierError::Auth(_) => StatusCode::UNAUTHORIZED,
            CourierError::NotFound { .. } => StatusCode::NOT_FOUND,
            CourierError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Webhook processing failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Webhook rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{AuthError, StoreError};

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CourierError::Auth(AuthError::Expired), StatusCode::UNAUTHORIZED),
            (CourierError::not_found("service", "x"), StatusCode::NOT_FOUND),
            (CourierError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                CourierError::Store(StoreError::Backend("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (CourierError::Render("oops".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }
}
