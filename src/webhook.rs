//! Webhook HTTP surface (thin adapter, out of scope for the core). No
//! GitHub signature verification is implemented here — that omission is
//! deliberate, not an oversight. Deserializes the inbound event and
//! hands it to a background task so the HTTP response never blocks on
//! `process_incident`.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::warn;

use crate::domain::IncidentEvent;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct WebhookState {
    pub orchestrator: Arc<Orchestrator>,
}

async fn health() -> &'static str {
    "ok"
}

async fn ci_failure(State(state): State<WebhookState>, Json(event): Json<IncidentEvent>) -> impl IntoResponse {
    let orchestrator = state.orchestrator;
    tokio::spawn(async move {
        let report = orchestrator.process_incident(event).await;
        if report.decision == crate::domain::Decision::Escalate {
            warn!(incident_id = %report.incident_id, "incident escalated");
        }
    });
    axum::http::StatusCode::ACCEPTED
}

pub fn build_router(state: WebhookState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/ci-failure", post(ci_failure))
        .with_state(state)
}
