//! Agent listing and the liveness probe.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use switchboard::model::AgentStatus;

use crate::state::AppState;

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[utoipa::path(get, path = "/api/agents",
    responses(
        (status = 200, description = "All configured agents", body = Vec<switchboard::model::Agent>),
    )
)]
pub async fn list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store().list_agents().await {
        Ok(agents) => Json(agents).into_response(),
        Err(err) => {
            tracing::error!("Failed to list agents: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal error"})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub agent_id: String,
    pub status: AgentStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// HEAD-probe the agent's endpoint and record the observed liveness.
/// `last_seen_at` only advances when the probe succeeds.
#[utoipa::path(get, path = "/api/agents/{id}/health",
    params(("id" = String, Path, description = "Agent ID")),
    responses(
        (status = 200, description = "Probe result", body = HealthReport),
        (status = 404, description = "Unknown agent"),
    )
)]
pub async fn agent_health(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agent = match state.store().get_agent(&id).await {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("Agent '{id}' not found")})),
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!("Failed to load agent {}: {}", id, err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal error"})),
            )
                .into_response();
        }
    };

    let is_online = match state
        .probe_client()
        .head(&agent.endpoint_url)
        .timeout(HEALTH_PROBE_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(err) => {
            tracing::debug!(agent_id = %id, error = %err, "health probe failed");
            false
        }
    };

    let now = Utc::now();
    let status = if is_online {
        AgentStatus::Online
    } else {
        AgentStatus::Offline
    };

    if let Err(err) = state
        .store()
        .set_agent_status(&id, status, is_online.then_some(now))
        .await
    {
        tracing::error!("Failed to record agent status for {}: {}", id, err);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Internal error"})),
        )
            .into_response();
    }

    Json(HealthReport {
        agent_id: id,
        status,
        last_seen_at: if is_online { Some(now) } else { agent.last_seen_at },
    })
    .into_response()
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/agents", get(list_agents))
        .route("/api/agents/{id}/health", get(agent_health))
        .with_state(state)
}
