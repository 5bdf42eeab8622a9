//! The run gateway route: one POST dispatches one run and answers with the
//! full event stream, always `200` once a run exists.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{self, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use switchboard::gateway::{GatewayError, RunRequest};
use switchboard::protocol;

use crate::state::AppState;

/// A buffered event-stream response carrying the run correlation header.
pub struct RunStreamResponse {
    run_id: String,
    body: String,
}

impl IntoResponse for RunStreamResponse {
    fn into_response(self) -> axum::response::Response {
        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .header("X-Run-Id", self.run_id)
            .body(axum::body::Body::from(self.body))
            .unwrap()
    }
}

#[utoipa::path(
    post,
    path = "/api/gateway",
    request_body = RunRequest,
    responses(
        (status = 200, description = "Run dispatched; body is the event stream", content_type = "text/event-stream"),
        (status = 400, description = "Malformed JSON or missing fields"),
        (status = 404, description = "Unknown agent"),
    )
)]
pub async fn run_gateway(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid JSON body"})),
            )
                .into_response()
        }
    };

    // If the client goes away, axum drops this future, the guard fires the
    // token, and the spawned run observes the disconnect while it finishes
    // writing run state.
    let client_signal = CancellationToken::new();
    let _disconnect_guard = client_signal.clone().drop_guard();

    let gateway = state.gateway();
    let run = tokio::spawn(async move { gateway.execute(request, client_signal).await });

    let outcome = match run.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err @ GatewayError::InvalidRequest(_))) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
        Ok(Err(err @ GatewayError::AgentNotFound(_))) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
        Ok(Err(GatewayError::Store(err))) => {
            tracing::error!("Run dispatch failed: {}", err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal error"})),
            )
                .into_response();
        }
        Err(join_error) => {
            tracing::error!("Run task failed: {}", join_error);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal error"})),
            )
                .into_response();
        }
    };

    RunStreamResponse {
        body: protocol::encode_frames(&outcome.frames),
        run_id: outcome.run_id,
    }
    .into_response()
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/gateway",
            post(run_gateway).layer(DefaultBodyLimit::max(1024 * 1024)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use switchboard::model::{MessageRole, RunStatus};
    use switchboard::storage::StorageManager;
    use switchboard::store::{AgentUpsert, ChatStore};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_state(agent_endpoint: &str) -> (TempDir, Arc<AppState>, String) {
        let dir = TempDir::new().unwrap();
        let manager = StorageManager::open(&dir.path().join("server.db"))
            .await
            .unwrap();
        let store = ChatStore::new(manager.pool().clone());

        store
            .upsert_agent(&AgentUpsert {
                id: "mock-assistant".to_string(),
                name: "Mock Assistant".to_string(),
                endpoint_url: agent_endpoint.to_string(),
                icon: Some("bot".to_string()),
                description: Some("A mock agent".to_string()),
                config: None,
            })
            .await
            .unwrap();
        let thread = store.create_thread("mock-assistant", Some("Seeded Thread")).await.unwrap();

        let state = AppState::new(store, Duration::from_secs(5));
        (dir, state, thread.id)
    }

    fn gateway_request(body: &str) -> Request<Body> {
        Request::builder()
            .uri("/api/gateway")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn agent_sse_body(thread_id: &str) -> String {
        let frames = vec![
            json!({"type": "RUN_STARTED", "threadId": thread_id, "runId": "r"}),
            json!({"type": "TEXT_MESSAGE_START", "messageId": "m1", "role": "assistant"}),
            json!({"type": "TEXT_MESSAGE_CONTENT", "messageId": "m1", "delta": "Hi "}),
            json!({"type": "TEXT_MESSAGE_CONTENT", "messageId": "m1", "delta": "there!"}),
            json!({"type": "TEXT_MESSAGE_END", "messageId": "m1"}),
            json!({"type": "RUN_FINISHED", "threadId": thread_id, "runId": "r"}),
        ];
        protocol::encode_frames(&frames)
    }

    #[tokio::test]
    async fn rejects_invalid_json_with_400() {
        let (_dir, state, _thread) = test_state("http://localhost:9999").await;
        let app = routes(state);

        let response = app.oneshot(gateway_request("not valid json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"], "Invalid JSON body");
    }

    #[tokio::test]
    async fn rejects_missing_fields_with_400() {
        let (_dir, state, thread_id) = test_state("http://localhost:9999").await;
        let app = routes(state);

        for body in [
            json!({"threadId": thread_id, "agentId": "mock-assistant"}),
            json!({"agentId": "mock-assistant", "message": "hi"}),
            json!({"threadId": thread_id, "message": "hi"}),
        ] {
            let response = app
                .clone()
                .oneshot(gateway_request(&body.to_string()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn unknown_agent_returns_404_with_json_error() {
        let (_dir, state, thread_id) = test_state("http://localhost:9999").await;
        let app = routes(state);

        let request_body = json!({
            "threadId": thread_id,
            "agentId": "missing",
            "message": "hi",
        });
        let response = app
            .oneshot(gateway_request(&request_body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        let error = body["error"].as_str().unwrap().to_lowercase();
        assert!(error.contains("agent"));
    }

    #[tokio::test]
    async fn streams_events_with_run_correlation_header() {
        let server = MockServer::start().await;
        let (_dir, state, thread_id) = test_state(&server.uri()).await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(agent_sse_body(&thread_id)))
            .expect(1)
            .mount(&server)
            .await;

        let app = routes(state.clone());
        let request_body = json!({
            "threadId": thread_id,
            "agentId": "mock-assistant",
            "message": "hello",
        });
        let response = app
            .oneshot(gateway_request(&request_body.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-cache");
        let run_id = response
            .headers()
            .get("X-Run-Id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(Uuid::parse_str(&run_id).is_ok());

        let frames = protocol::decode_frames(&body_text(response).await);
        assert_eq!(
            protocol::str_field(&frames[0], "type"),
            Some("USER_MESSAGE_CREATED")
        );
        let deltas: String = frames
            .iter()
            .filter(|f| protocol::str_field(f, "type") == Some("TEXT_MESSAGE_CONTENT"))
            .filter_map(|f| protocol::str_field(f, "delta"))
            .collect();
        assert_eq!(deltas, "Hi there!");

        let store = state.store();
        let run = store.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let messages = store.list_messages(&thread_id).await.unwrap();
        let assistant = messages
            .iter()
            .find(|m| m.role == MessageRole::Assistant)
            .unwrap();
        assert_eq!(assistant.content, "Hi there!");
        assert_eq!(assistant.id, "m1");
    }

    #[tokio::test]
    async fn failure_is_still_a_well_formed_stream() {
        // Unreachable agent endpoint: the response must stay 200 with a
        // single RUN_ERROR frame.
        let (_dir, state, thread_id) = test_state("http://127.0.0.1:9/unreachable").await;
        let app = routes(state.clone());

        let request_body = json!({
            "threadId": thread_id,
            "agentId": "mock-assistant",
            "message": "go",
        });
        let response = app
            .oneshot(gateway_request(&request_body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let frames = protocol::decode_frames(&body_text(response).await);
        assert_eq!(frames.len(), 1);
        assert_eq!(protocol::str_field(&frames[0], "type"), Some("RUN_ERROR"));
        assert_eq!(
            protocol::str_field(&frames[0], "code"),
            Some("AGENT_UNREACHABLE")
        );
    }
}
