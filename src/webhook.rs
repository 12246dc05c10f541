//! HTTP transport: webhook verification handshake and event intake.
//!
//! The platform treats non-200 responses as delivery failures and retries
//! the event, so intake always acknowledges with 200 once the body has been
//! read. Whatever the turn decided is reflected in the ack body, never in
//! the status code.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::pipeline::{MessagePipeline, TurnOutcome};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<MessagePipeline>,
    pub verify_token: String,
}

pub fn webhook_routes(state: AppState) -> Router {
    Router::new()
        .route("/webhook", get(verify_subscription).post(receive_event))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Subscription handshake: echo the challenge when the token matches.
async fn verify_subscription(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);

    if mode == Some("subscribe") && token == Some(state.verify_token.as_str()) {
        info!("Webhook verification succeeded");
        let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
        return (StatusCode::OK, challenge);
    }

    warn!(?mode, "Webhook verification rejected");
    (StatusCode::FORBIDDEN, "Forbidden".to_string())
}

async fn receive_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Json<serde_json::Value> {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Webhook body was not valid JSON");
            return Json(serde_json::json!({ "status": "ok" }));
        }
    };

    let outcome = state.pipeline.handle_event(&payload).await;
    Json(ack_body(outcome))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

fn ack_body(outcome: TurnOutcome) -> serde_json::Value {
    match outcome {
        TurnOutcome::SuppressedNotAllowed => serde_json::json!({
            "status": "ok",
            "message": "Number not enabled for automated replies",
        }),
        TurnOutcome::SuppressedHumanControl => serde_json::json!({
            "status": "ok",
            "message": "Human operator active",
        }),
        _ => serde_json::json!({ "status": "ok" }),
    }
}
