//! The run controller: one user turn, end to end.
//!
//! Execution order is load-bearing. The user message is persisted before the
//! agent is ever called, so it survives any downstream failure; run status
//! transitions are flushed to the store before the corresponding frame is
//! placed in the outgoing sequence; and the cancellation watcher is detached
//! on every exit path by the guard's `Drop`.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::agent::{AgentCallError, AgentClient, AgentRunRequest, HistoryEntry};
use crate::cancel::{CancelReason, RunCancellation};
use crate::model::{MessageRole, Run, RunStatus};
use crate::protocol::{self, EventKind, RunErrorCode};
use crate::store::{ChatStore, RunTransition, StoreError};

/// One gateway invocation, as received on the wire.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub message: String,
}

/// Rejections that carry an HTTP status instead of an event stream.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Agent not found: {0}")]
    AgentNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The result of a dispatched run: its id (for the correlation header) and
/// the frame sequence to encode into the response body. Failed runs yield a
/// single `RUN_ERROR` frame here, never an `Err`.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub frames: Vec<Value>,
}

pub struct RunGateway {
    store: ChatStore,
    client: AgentClient,
    timeout: Duration,
}

impl RunGateway {
    pub fn new(store: ChatStore, client: AgentClient, timeout: Duration) -> Self {
        Self {
            store,
            client,
            timeout,
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    /// Drive one run to a terminal outcome.
    ///
    /// `client_signal` is the caller's own disconnect signal; it may already
    /// be cancelled, in which case the agent is never contacted.
    pub async fn execute(
        &self,
        request: RunRequest,
        client_signal: CancellationToken,
    ) -> Result<RunOutcome, GatewayError> {
        if request.thread_id.is_empty() || request.agent_id.is_empty() || request.message.is_empty()
        {
            return Err(GatewayError::InvalidRequest(
                "Missing required fields: threadId, agentId, message".to_string(),
            ));
        }

        let agent = self
            .store
            .get_agent(&request.agent_id)
            .await?
            .ok_or_else(|| GatewayError::AgentNotFound(request.agent_id.clone()))?;

        // The user turn is durable before the agent is ever contacted.
        let user_message = self
            .store
            .append_message(&request.thread_id, None, MessageRole::User, &request.message)
            .await?;

        let run = self
            .store
            .create_run(&request.thread_id, &request.agent_id)
            .await?;

        tracing::info!(
            run_id = %run.id,
            agent_id = %request.agent_id,
            thread_id = %request.thread_id,
            "Dispatching run"
        );

        // History is read back from the store, not assembled in memory, so
        // what the agent sees always reflects durable state.
        let history: Vec<HistoryEntry> = self
            .store
            .list_messages(&request.thread_id)
            .await?
            .into_iter()
            .map(|message| HistoryEntry {
                role: message.role,
                content: message.content,
            })
            .collect();

        let cancellation = RunCancellation::start(client_signal, self.timeout);

        let agent_request = AgentRunRequest {
            thread_id: request.thread_id.clone(),
            run_id: run.id.clone(),
            messages: history,
        };

        let reply = match self
            .client
            .send_run(&agent.endpoint_url, &agent_request, cancellation.token())
            .await
        {
            Ok(reply) => reply,
            Err(err) => return self.call_failed(&run, &request.thread_id, err, &cancellation).await,
        };

        if !reply.status.is_success() {
            let message = format!("Agent returned status {}", reply.status.as_u16());
            return self
                .fail_run(&run, &request.thread_id, RunErrorCode::AgentError, &message)
                .await;
        }

        if reply.body.is_empty() {
            return self
                .fail_run(
                    &run,
                    &request.thread_id,
                    RunErrorCode::AgentError,
                    "Empty response from agent",
                )
                .await;
        }

        let frames = protocol::decode_frames(&reply.body);

        let mut reached = RunStatus::Pending;
        if let Err(err) = self
            .apply_events(&run, &request.thread_id, &frames, &mut reached)
            .await
        {
            tracing::error!(run_id = %run.id, error = %err, "Stream processing failed");
            let message = format!("Stream interrupted: {err}");
            // A run that already reached a terminal state stays there.
            if !reached.is_terminal() {
                self.store
                    .transition_run(&run.id, RunStatus::Failed, RunTransition::failed_now(&message))
                    .await?;
            }
            let frame =
                protocol::run_error(&request.thread_id, &run.id, RunErrorCode::InternalError, &message);
            return Ok(RunOutcome {
                run_id: run.id,
                frames: vec![frame],
            });
        }

        self.store.touch_thread(&request.thread_id).await?;

        let mut outgoing = Vec::with_capacity(frames.len() + 1);
        outgoing.push(protocol::user_message_created(
            &request.thread_id,
            &user_message.id,
        ));
        outgoing.extend(frames);

        Ok(RunOutcome {
            run_id: run.id,
            frames: outgoing,
        })
    }

    /// Fold the decoded agent events into store effects, in event order.
    /// `reached` tracks the last status written so the caller can honor
    /// terminal-state monotonicity on a mid-fold failure.
    async fn apply_events(
        &self,
        run: &Run,
        thread_id: &str,
        frames: &[Value],
        reached: &mut RunStatus,
    ) -> Result<(), StoreError> {
        let mut assistant_message_id: Option<String> = None;
        let mut assistant_content = String::new();

        for frame in frames {
            match EventKind::of(frame) {
                EventKind::RunStarted => {
                    self.store
                        .transition_run(&run.id, RunStatus::Running, RunTransition::started_now())
                        .await?;
                    *reached = RunStatus::Running;
                }
                EventKind::TextMessageStart => {
                    assistant_message_id =
                        protocol::str_field(frame, "messageId").map(str::to_string);
                    assistant_content.clear();
                }
                EventKind::TextMessageContent => {
                    assistant_content.push_str(protocol::str_field(frame, "delta").unwrap_or(""));
                }
                EventKind::TextMessageEnd => {
                    // A content-free turn is not persisted.
                    if !assistant_content.is_empty() {
                        let message_id = assistant_message_id
                            .take()
                            .unwrap_or_else(|| Uuid::new_v4().to_string());
                        self.store
                            .append_message_with_id(
                                &message_id,
                                thread_id,
                                Some(&run.id),
                                MessageRole::Assistant,
                                &assistant_content,
                            )
                            .await?;
                    }
                }
                EventKind::RunFinished => {
                    self.store
                        .transition_run(
                            &run.id,
                            RunStatus::Completed,
                            RunTransition::finished_now(),
                        )
                        .await?;
                    *reached = RunStatus::Completed;
                }
                EventKind::Other => {}
            }
        }

        Ok(())
    }

    /// The agent call raised before any response: classify by the
    /// coordinator's reason.
    async fn call_failed(
        &self,
        run: &Run,
        thread_id: &str,
        err: AgentCallError,
        cancellation: &RunCancellation,
    ) -> Result<RunOutcome, GatewayError> {
        match cancellation.reason() {
            Some(CancelReason::ClientDisconnect) => {
                tracing::info!(run_id = %run.id, "Client disconnected, cancelling run");
                self.store
                    .transition_run(
                        &run.id,
                        RunStatus::Cancelled,
                        RunTransition::failed_now("Client disconnected"),
                    )
                    .await?;
                // Best effort: the caller is already gone.
                let frame = protocol::run_error(
                    thread_id,
                    &run.id,
                    RunErrorCode::AgentTimeout,
                    "Client disconnected",
                );
                Ok(RunOutcome {
                    run_id: run.id.clone(),
                    frames: vec![frame],
                })
            }
            Some(CancelReason::Timeout) => {
                let message =
                    format!("Agent request timed out after {}ms", self.timeout.as_millis());
                self.fail_run(run, thread_id, RunErrorCode::AgentTimeout, &message)
                    .await
            }
            None => {
                let message = match &err {
                    AgentCallError::Transport(transport) => transport.to_string(),
                    AgentCallError::Aborted => "Unknown error".to_string(),
                };
                self.fail_run(run, thread_id, RunErrorCode::AgentUnreachable, &message)
                    .await
            }
        }
    }

    async fn fail_run(
        &self,
        run: &Run,
        thread_id: &str,
        code: RunErrorCode,
        message: &str,
    ) -> Result<RunOutcome, GatewayError> {
        tracing::warn!(run_id = %run.id, code = code.as_str(), error = %message, "Run failed");
        self.store
            .transition_run(&run.id, RunStatus::Failed, RunTransition::failed_now(message))
            .await?;
        let frame = protocol::run_error(thread_id, &run.id, code, message);
        Ok(RunOutcome {
            run_id: run.id.clone(),
            frames: vec![frame],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AgentStatus;
    use crate::protocol::str_field;
    use crate::storage::StorageManager;
    use crate::store::AgentUpsert;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _dir: TempDir,
        gateway: RunGateway,
        thread_id: String,
    }

    async fn fixture_with_endpoint(endpoint_url: &str, timeout: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let manager = StorageManager::open(&dir.path().join("gateway.db"))
            .await
            .unwrap();
        let store = ChatStore::new(manager.pool().clone());

        store
            .upsert_agent(&AgentUpsert {
                id: "agent-1".to_string(),
                name: "Test Agent".to_string(),
                endpoint_url: endpoint_url.to_string(),
                icon: None,
                description: Some("A test agent".to_string()),
                config: None,
            })
            .await
            .unwrap();
        let thread = store.create_thread("agent-1", Some("Test Thread")).await.unwrap();

        Fixture {
            _dir: dir,
            gateway: RunGateway::new(store, AgentClient::new(), timeout),
            thread_id: thread.id,
        }
    }

    fn run_request(thread_id: &str, agent_id: &str, message: &str) -> RunRequest {
        RunRequest {
            thread_id: thread_id.to_string(),
            agent_id: agent_id.to_string(),
            message: message.to_string(),
        }
    }

    fn agent_stream_body(thread_id: &str, message_id: &str, deltas: &[&str]) -> String {
        let mut frames = vec![json!({"type": "RUN_STARTED", "threadId": thread_id, "runId": "r"})];
        frames.push(json!({"type": "TEXT_MESSAGE_START", "messageId": message_id, "role": "assistant"}));
        for delta in deltas {
            frames.push(json!({"type": "TEXT_MESSAGE_CONTENT", "messageId": message_id, "delta": delta}));
        }
        frames.push(json!({"type": "TEXT_MESSAGE_END", "messageId": message_id}));
        frames.push(json!({"type": "RUN_FINISHED", "threadId": thread_id, "runId": "r"}));
        protocol::encode_frames(&frames)
    }

    #[tokio::test]
    async fn happy_path_persists_assistant_message_and_completes_run() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(5)).await;

        Mock::given(method("POST"))
            .and(header_exists("X-Run-Id"))
            .respond_with(ResponseTemplate::new(200).set_body_string(agent_stream_body(
                &fixture.thread_id,
                "m1",
                &["Hi ", "there!"],
            )))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "hello"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        // First frame is the synthetic user-message marker.
        assert_eq!(str_field(&outcome.frames[0], "type"), Some("USER_MESSAGE_CREATED"));
        let user_message_id = str_field(&outcome.frames[0], "messageId").unwrap().to_string();
        assert_eq!(str_field(&outcome.frames[1], "type"), Some("RUN_STARTED"));
        assert_eq!(outcome.frames.len(), 7);

        let store = fixture.gateway.store();
        let run = store.get_run(&outcome.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.started_at.is_some());
        assert!(run.finished_at.is_some());

        let messages = store.list_messages(&fixture.thread_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].id, user_message_id);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].id, "m1");
        assert_eq!(messages[1].content, "Hi there!");
        assert_eq!(messages[1].run_id.as_deref(), Some(outcome.run_id.as_str()));
    }

    #[tokio::test]
    async fn unknown_agent_is_rejected_without_side_effects() {
        let fixture = fixture_with_endpoint("http://localhost:9999", Duration::from_secs(5)).await;

        let err = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "missing", "hi"),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::AgentNotFound(ref id) if id == "missing"));
        assert!(err.to_string().to_lowercase().contains("agent"));
        let messages = fixture
            .gateway
            .store()
            .list_messages(&fixture.thread_id)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_without_side_effects() {
        let fixture = fixture_with_endpoint("http://localhost:9999", Duration::from_secs(5)).await;

        for request in [
            run_request("", "agent-1", "hi"),
            run_request(&fixture.thread_id, "", "hi"),
            run_request(&fixture.thread_id, "agent-1", ""),
        ] {
            let err = fixture
                .gateway
                .execute(request, CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::InvalidRequest(_)));
        }

        let messages = fixture
            .gateway
            .store()
            .list_messages(&fixture.thread_id)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn unreachable_agent_fails_run_and_keeps_user_message() {
        // Nothing listens on this port.
        let fixture =
            fixture_with_endpoint("http://127.0.0.1:9/unreachable", Duration::from_secs(5)).await;

        let outcome = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "go"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.frames.len(), 1);
        let frame = &outcome.frames[0];
        assert_eq!(str_field(frame, "type"), Some("RUN_ERROR"));
        assert_eq!(str_field(frame, "code"), Some("AGENT_UNREACHABLE"));
        let emitted_message = str_field(frame, "message").unwrap().to_string();

        let store = fixture.gateway.store();
        let run = store.get_run(&outcome.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some(emitted_message.as_str()));

        // The user message was persisted before the call and survives it.
        let messages = store.list_messages(&fixture.thread_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn slow_agent_times_out() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_millis(50)).await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let outcome = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "go"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(str_field(&outcome.frames[0], "code"), Some("AGENT_TIMEOUT"));
        assert!(str_field(&outcome.frames[0], "message")
            .unwrap()
            .contains("timed out"));

        let run = fixture
            .gateway
            .store()
            .get_run(&outcome.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn pre_cancelled_client_signal_cancels_run_without_calling_agent() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(5)).await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client_signal = CancellationToken::new();
        client_signal.cancel();

        let outcome = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "go"),
                client_signal,
            )
            .await
            .unwrap();

        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(
            str_field(&outcome.frames[0], "message"),
            Some("Client disconnected")
        );

        let run = fixture
            .gateway
            .store()
            .get_run(&outcome.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.error.as_deref(), Some("Client disconnected"));
    }

    #[tokio::test]
    async fn mid_flight_disconnect_cancels_run() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(30)).await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let client_signal = CancellationToken::new();
        let disconnect = client_signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            disconnect.cancel();
        });

        let outcome = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "go"),
                client_signal,
            )
            .await
            .unwrap();

        let run = fixture
            .gateway
            .store()
            .get_run(&outcome.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.error.as_deref(), Some("Client disconnected"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_agent_error() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(5)).await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;

        let outcome = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "go"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(str_field(&outcome.frames[0], "code"), Some("AGENT_ERROR"));
        assert!(str_field(&outcome.frames[0], "message").unwrap().contains("500"));

        let run = fixture
            .gateway
            .store()
            .get_run(&outcome.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn empty_agent_body_is_an_agent_error() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(5)).await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "go"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(str_field(&outcome.frames[0], "code"), Some("AGENT_ERROR"));
        assert_eq!(
            str_field(&outcome.frames[0], "message"),
            Some("Empty response from agent")
        );
    }

    #[tokio::test]
    async fn malformed_stream_leaves_run_pending_and_persists_nothing_extra() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(5)).await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("not-prefixed\n\ndata: {invalid-json\n\n"),
            )
            .mount(&server)
            .await;

        let outcome = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "hello"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        // Only the synthetic marker goes out; nothing decoded, nothing applied.
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(
            str_field(&outcome.frames[0], "type"),
            Some("USER_MESSAGE_CREATED")
        );

        let store = fixture.gateway.store();
        let run = store.get_run(&outcome.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        let messages = store.list_messages(&fixture.thread_id).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn empty_accumulated_delta_persists_no_assistant_message() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(5)).await;

        let frames = vec![
            json!({"type": "RUN_STARTED", "threadId": fixture.thread_id, "runId": "r"}),
            json!({"type": "TEXT_MESSAGE_START", "role": "assistant"}),
            json!({"type": "TEXT_MESSAGE_CONTENT"}),
            json!({"type": "TEXT_MESSAGE_END"}),
            json!({"type": "RUN_FINISHED", "threadId": fixture.thread_id, "runId": "r"}),
        ];
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(protocol::encode_frames(&frames)),
            )
            .mount(&server)
            .await;

        let outcome = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "hello"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let store = fixture.gateway.store();
        let run = store.get_run(&outcome.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let messages = store.list_messages(&fixture.thread_id).await.unwrap();
        assert!(messages.iter().all(|m| m.role != MessageRole::Assistant));
    }

    #[tokio::test]
    async fn missing_start_message_id_falls_back_to_generated_id() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(5)).await;

        let frames = vec![
            json!({"type": "RUN_STARTED", "threadId": fixture.thread_id, "runId": "r"}),
            json!({"type": "TEXT_MESSAGE_START", "role": "assistant"}),
            json!({"type": "TEXT_MESSAGE_CONTENT", "delta": "Hello"}),
            json!({"type": "TEXT_MESSAGE_END"}),
            json!({"type": "RUN_FINISHED", "threadId": fixture.thread_id, "runId": "r"}),
        ];
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(protocol::encode_frames(&frames)),
            )
            .mount(&server)
            .await;

        fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "hello"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let messages = fixture
            .gateway
            .store()
            .list_messages(&fixture.thread_id)
            .await
            .unwrap();
        let assistant = messages
            .iter()
            .find(|m| m.role == MessageRole::Assistant)
            .unwrap();
        assert_eq!(assistant.content, "Hello");
        assert!(Uuid::parse_str(&assistant.id).is_ok());
    }

    #[tokio::test]
    async fn unknown_event_types_are_forwarded_without_state_changes() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(5)).await;

        let frames = vec![
            json!({"type": "RUN_STARTED", "threadId": fixture.thread_id, "runId": "r"}),
            json!({"type": "TOOL_CALL", "name": "search", "args": {"q": "x"}}),
            json!({"type": "RUN_FINISHED", "threadId": fixture.thread_id, "runId": "r"}),
        ];
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(protocol::encode_frames(&frames)),
            )
            .mount(&server)
            .await;

        let outcome = fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "hello"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(str_field(&outcome.frames[2], "type"), Some("TOOL_CALL"));
        assert_eq!(outcome.frames[2], frames[1]);
    }

    #[tokio::test]
    async fn thread_activity_is_touched_after_a_successful_run() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(5)).await;

        let before = fixture
            .gateway
            .store()
            .get_thread(&fixture.thread_id)
            .await
            .unwrap()
            .unwrap()
            .last_activity_at;
        tokio::time::sleep(Duration::from_millis(5)).await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(agent_stream_body(
                &fixture.thread_id,
                "m1",
                &["ok"],
            )))
            .mount(&server)
            .await;

        fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "hello"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let after = fixture
            .gateway
            .store()
            .get_thread(&fixture.thread_id)
            .await
            .unwrap()
            .unwrap()
            .last_activity_at;
        assert!(after > before);
    }

    #[tokio::test]
    async fn agent_sees_full_history_including_the_new_user_turn() {
        let server = MockServer::start().await;
        let fixture = fixture_with_endpoint(&server.uri(), Duration::from_secs(5)).await;

        let store = fixture.gateway.store();
        store
            .append_message(&fixture.thread_id, None, MessageRole::User, "earlier question")
            .await
            .unwrap();
        store
            .append_message(
                &fixture.thread_id,
                None,
                MessageRole::Assistant,
                "earlier answer",
            )
            .await
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(agent_stream_body(
                &fixture.thread_id,
                "m1",
                &["ok"],
            )))
            .mount(&server)
            .await;

        fixture
            .gateway
            .execute(
                run_request(&fixture.thread_id, "agent-1", "new question"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let payload: AgentRunRequest = received[0].body_json().unwrap();
        assert_eq!(payload.thread_id, fixture.thread_id);
        let contents: Vec<_> = payload
            .messages
            .iter()
            .map(|entry| entry.content.as_str())
            .collect();
        assert_eq!(contents, ["earlier question", "earlier answer", "new question"]);
    }

    #[tokio::test]
    async fn fixture_agent_is_visible_with_default_status() {
        let fixture = fixture_with_endpoint("http://localhost:9999", Duration::from_secs(5)).await;
        let agent = fixture
            .gateway
            .store()
            .get_agent("agent-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Unknown);
    }
}
