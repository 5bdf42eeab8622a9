//! A built-in agent speaking the run wire protocol, for demos and
//! end-to-end exercise without a real backend. Point an agent row's
//! `endpoint_url` at `/api/mock-agent` and the gateway round-trips through
//! the full stack.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http;
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use futures::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use switchboard::agent::AgentRunRequest;
use switchboard::model::MessageRole;
use switchboard::protocol;

const TYPING_DELAY: Duration = Duration::from_millis(15);

pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(body)
            .unwrap()
    }
}

fn canned_reply(user_message: &str) -> String {
    let lower = user_message.to_lowercase();

    if lower.contains("hello") || lower.contains("hi") {
        return "Hello! I'm the built-in mock agent. Ask me anything and I'll answer with canned text.".to_string();
    }

    if lower.contains("help") {
        return "I simulate a real agent: I emit RUN_STARTED, stream a reply word by word, and finish with RUN_FINISHED. Useful for exercising the inbox without a live backend.".to_string();
    }

    if lower.contains("weather") {
        return "I can't see outside, but for testing purposes: clear skies, 22°C, zero chance of packet loss.".to_string();
    }

    format!(
        "Thanks for your message! You said: \"{user_message}\". I'm a mock agent, so that's as deep as my insight goes."
    )
}

#[utoipa::path(
    post,
    path = "/api/mock-agent",
    request_body = AgentRunRequest,
    responses(
        (status = 200, description = "Framed event stream", content_type = "text/event-stream"),
    )
)]
pub async fn mock_agent(Json(input): Json<AgentRunRequest>) -> impl IntoResponse {
    let last_user_message = input
        .messages
        .iter()
        .rev()
        .find(|entry| matches!(entry.role, MessageRole::User))
        .map(|entry| entry.content.clone())
        .unwrap_or_else(|| "Hello".to_string());

    let reply = canned_reply(&last_user_message);
    let message_id = format!("msg_{}", Uuid::new_v4().as_simple());
    let thread_id = input.thread_id;
    let run_id = input.run_id;

    let (tx, rx) = mpsc::channel::<String>(32);

    tokio::spawn(async move {
        let mut frames = vec![
            json!({"type": "RUN_STARTED", "threadId": thread_id, "runId": run_id}),
            json!({"type": "TEXT_MESSAGE_START", "messageId": message_id, "role": "assistant"}),
        ];

        for (i, word) in reply.split(' ').enumerate() {
            let delta = if i == 0 {
                word.to_string()
            } else {
                format!(" {word}")
            };
            frames.push(json!({
                "type": "TEXT_MESSAGE_CONTENT",
                "messageId": message_id,
                "delta": delta,
            }));
        }

        frames.push(json!({"type": "TEXT_MESSAGE_END", "messageId": message_id}));
        frames.push(json!({"type": "RUN_FINISHED", "threadId": thread_id, "runId": run_id}));

        for frame in frames {
            if tx.send(protocol::encode_frame(&frame)).await.is_err() {
                // Receiver gone: the gateway hung up mid-stream.
                return;
            }
            tokio::time::sleep(TYPING_DELAY).await;
        }
    });

    SseResponse {
        rx: ReceiverStream::new(rx),
    }
}

pub fn routes() -> Router {
    Router::new().route("/api/mock-agent", post(mock_agent))
}
