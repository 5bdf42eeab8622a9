//! Thread inbox routes: listing, creation, detail, and message history.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use switchboard::model::Thread;
use switchboard::store::StoreError;

use crate::state::AppState;

fn internal_error(err: StoreError) -> axum::response::Response {
    tracing::error!("Thread route store failure: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal error"})),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ThreadsQuery {
    agent: Option<String>,
}

#[utoipa::path(get, path = "/api/threads",
    params(("agent" = Option<String>, Query, description = "Filter by owning agent")),
    responses(
        (status = 200, description = "Inbox listing, newest activity first", body = Vec<switchboard::model::ThreadSummary>),
    )
)]
pub async fn list_threads(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ThreadsQuery>,
) -> axum::response::Response {
    match state.store().list_threads(query.agent.as_deref()).await {
        Ok(threads) => Json(threads).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub agent_id: String,
    pub title: Option<String>,
}

#[utoipa::path(post, path = "/api/threads",
    request_body = CreateThreadRequest,
    responses(
        (status = 201, description = "Thread created", body = Thread),
        (status = 400, description = "Missing agentId"),
        (status = 404, description = "Unknown agent"),
    )
)]
pub async fn create_thread(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateThreadRequest>,
) -> axum::response::Response {
    if request.agent_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "agentId is required"})),
        )
            .into_response();
    }

    match state.store().get_agent(&request.agent_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("Agent '{}' not found", request.agent_id)})),
            )
                .into_response()
        }
        Err(err) => return internal_error(err),
    }

    match state
        .store()
        .create_thread(&request.agent_id, request.title.as_deref())
        .await
    {
        Ok(thread) => (StatusCode::CREATED, Json(thread)).into_response(),
        Err(err) => internal_error(err),
    }
}

/// Thread detail joined with its agent's display fields.
#[derive(Debug, Serialize, ToSchema)]
pub struct ThreadDetail {
    #[serde(flatten)]
    pub thread: Thread,
    pub agent_name: String,
    pub agent_icon: Option<String>,
}

#[utoipa::path(get, path = "/api/threads/{id}",
    params(("id" = String, Path, description = "Thread ID")),
    responses(
        (status = 200, description = "Thread detail", body = ThreadDetail),
        (status = 404, description = "Unknown thread"),
    )
)]
pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let thread = match state.store().get_thread(&id).await {
        Ok(Some(thread)) => thread,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("Thread '{id}' not found")})),
            )
                .into_response()
        }
        Err(err) => return internal_error(err),
    };

    match state.store().get_agent(&thread.agent_id).await {
        Ok(Some(agent)) => Json(ThreadDetail {
            thread,
            agent_name: agent.name,
            agent_icon: agent.icon,
        })
        .into_response(),
        Ok(None) => {
            tracing::error!("Thread {} references missing agent {}", id, thread.agent_id);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal error"})),
            )
                .into_response()
        }
        Err(err) => internal_error(err),
    }
}

#[utoipa::path(get, path = "/api/threads/{id}/messages",
    params(("id" = String, Path, description = "Thread ID")),
    responses(
        (status = 200, description = "Messages in creation order", body = Vec<switchboard::model::Message>),
        (status = 404, description = "Unknown thread"),
    )
)]
pub async fn thread_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match state.store().get_thread(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("Thread '{id}' not found")})),
            )
                .into_response()
        }
        Err(err) => return internal_error(err),
    }

    match state.store().list_messages(&id).await {
        Ok(messages) => Json(messages).into_response(),
        Err(err) => internal_error(err),
    }
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/threads", get(list_threads).post(create_thread))
        .route("/api/threads/{id}", get(get_thread))
        .route("/api/threads/{id}/messages", get(thread_messages))
        .with_state(state)
}
