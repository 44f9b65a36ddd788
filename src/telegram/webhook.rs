use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::updates::Update;
use crate::core::ingestion::{DispatchOutcome, EventRouter};
use crate::core::moderation::InboundUpdate;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct WebhookState {
    pub router: EventRouter,
    pub secret_token: Option<Arc<str>>,
}

/// Webhook on `POST /<path>` plus `GET /healthcheck`.
pub fn build_router(path: &str, state: WebhookState) -> Router {
    let path = format!("/{}", path.trim_matches('/'));

    Router::new()
        .route(&path, post(handle_update))
        .route("/healthcheck", get(healthcheck))
        .with_state(state)
}

async fn healthcheck() -> &'static str {
    "ok"
}

async fn handle_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(expected) = state.secret_token.as_deref() {
        let given = headers
            .get(SECRET_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        if !constant_time_eq(given, expected.as_bytes()) {
            warn!("webhook call with a bad secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    // Anything but 2xx makes Telegram redeliver, so bad payloads are
    // acknowledged and dropped.
    let update: InboundUpdate = match serde_json::from_slice::<Update>(&body) {
        Ok(update) => update.into(),
        Err(e) => {
            warn!(bytes = body.len(), "undecodable update: {}", e);
            return StatusCode::OK;
        }
    };

    let update_id = update.update_id;
    match state.router.dispatch(update).await {
        DispatchOutcome::Queued | DispatchOutcome::Dropped => {
            debug!(update_id, "update accepted");
            StatusCode::OK
        }
        DispatchOutcome::Closed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
