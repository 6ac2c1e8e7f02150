use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use repo_relay_engine::RelayDispatcher;
use repo_relay_github::{verify_github_sha256_signature, GithubWebhookPayload};
use serde_json::json;

pub(crate) const WEBHOOK_ENDPOINT: &str = "/webhook";
pub(crate) const HEALTH_ENDPOINT: &str = "/healthz";
const GITHUB_EVENT_HEADER: &str = "x-github-event";
const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";

pub(crate) struct WebhookServerState {
    dispatcher: RelayDispatcher,
    webhook_secret: Option<String>,
}

impl WebhookServerState {
    pub(crate) fn new(dispatcher: RelayDispatcher, webhook_secret: Option<String>) -> Self {
        Self {
            dispatcher,
            webhook_secret,
        }
    }
}

pub(crate) fn build_webhook_router(state: Arc<WebhookServerState>) -> Router {
    Router::new()
        .route(WEBHOOK_ENDPOINT, post(handle_webhook))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(state)
}

async fn handle_health() -> &'static str {
    "ok"
}

fn reject(status: StatusCode, reason_code: &str) -> Response {
    (status, Json(json!({ "reason_code": reason_code }))).into_response()
}

async fn handle_webhook(
    State(state): State<Arc<WebhookServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let Some(signature) = header_value(&headers, GITHUB_SIGNATURE_HEADER) else {
            return reject(StatusCode::UNAUTHORIZED, "signature_missing");
        };
        if let Err(error) = verify_github_sha256_signature(&body, signature, secret) {
            tracing::warn!(error = %error, "rejected webhook delivery with bad signature");
            return reject(StatusCode::UNAUTHORIZED, "signature_invalid");
        }
    }

    let Some(event_name) = header_value(&headers, GITHUB_EVENT_HEADER) else {
        return reject(StatusCode::BAD_REQUEST, "event_missing");
    };
    let payload = match serde_json::from_slice::<GithubWebhookPayload>(&body) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(
                event = event_name,
                error = %error,
                "rejected malformed webhook payload"
            );
            return reject(StatusCode::BAD_REQUEST, "payload_invalid");
        }
    };

    let outcome = state.dispatcher.handle_event(event_name, &payload).await;
    let reply = state.dispatcher.handle_reply(event_name, &payload).await;
    tracing::info!(
        event = event_name,
        reason = outcome.reason_code(),
        reply = reply.reason_code(),
        "processed webhook delivery"
    );

    (
        StatusCode::OK,
        Json(json!({
            "event": event_name,
            "reason_code": outcome.reason_code(),
            "reply_reason_code": reply.reason_code(),
        })),
    )
        .into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
