//! Frame codec for the agent event-stream wire format.
//!
//! A frame is one `data: <json>` payload line terminated by a blank line.
//! Decoding is defensive: segments without the marker and payloads that are
//! not valid JSON are dropped silently; one bad frame never fails the
//! stream. A trailing segment with no terminating blank line is still parsed
//! if it otherwise matches the framing rule.
//!
//! Frames stay `serde_json::Value` end to end so that event types the
//! gateway does not interpret are forwarded to the caller byte-faithfully.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const FRAME_MARKER: &str = "data: ";
pub const FRAME_SEPARATOR: &str = "\n\n";

pub const RUN_STARTED: &str = "RUN_STARTED";
pub const RUN_FINISHED: &str = "RUN_FINISHED";
pub const RUN_ERROR: &str = "RUN_ERROR";
pub const TEXT_MESSAGE_START: &str = "TEXT_MESSAGE_START";
pub const TEXT_MESSAGE_CONTENT: &str = "TEXT_MESSAGE_CONTENT";
pub const TEXT_MESSAGE_END: &str = "TEXT_MESSAGE_END";
pub const USER_MESSAGE_CREATED: &str = "USER_MESSAGE_CREATED";

/// Error codes carried by `RUN_ERROR` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunErrorCode {
    AgentUnreachable,
    AgentTimeout,
    AgentError,
    InternalError,
}

impl RunErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunErrorCode::AgentUnreachable => "AGENT_UNREACHABLE",
            RunErrorCode::AgentTimeout => "AGENT_TIMEOUT",
            RunErrorCode::AgentError => "AGENT_ERROR",
            RunErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// The event types the gateway interprets. Everything else is `Other` and is
/// forwarded without any state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RunStarted,
    TextMessageStart,
    TextMessageContent,
    TextMessageEnd,
    RunFinished,
    Other,
}

impl EventKind {
    pub fn of(frame: &Value) -> EventKind {
        match frame.get("type").and_then(Value::as_str) {
            Some(RUN_STARTED) => EventKind::RunStarted,
            Some(TEXT_MESSAGE_START) => EventKind::TextMessageStart,
            Some(TEXT_MESSAGE_CONTENT) => EventKind::TextMessageContent,
            Some(TEXT_MESSAGE_END) => EventKind::TextMessageEnd,
            Some(RUN_FINISHED) => EventKind::RunFinished,
            _ => EventKind::Other,
        }
    }
}

/// Borrow a string field off a frame, `None` when absent or not a string.
pub fn str_field<'a>(frame: &'a Value, name: &str) -> Option<&'a str> {
    frame.get(name).and_then(Value::as_str)
}

/// Incremental frame decoder. Feed it chunks as they arrive; it buffers only
/// what is needed to reassemble a frame split across chunk boundaries.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk and return every complete frame it finished.
    pub fn feed(&mut self, chunk: &str) -> Vec<Value> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(separator_pos) = self.buffer.find(FRAME_SEPARATOR) {
            let segment: String = self.buffer.drain(..separator_pos + FRAME_SEPARATOR.len()).collect();
            if let Some(frame) = parse_segment(&segment) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Drain the trailing segment, if the buffer ends without a separator.
    pub fn finish(mut self) -> Option<Value> {
        let remainder = std::mem::take(&mut self.buffer);
        parse_segment(&remainder)
    }
}

fn parse_segment(segment: &str) -> Option<Value> {
    let payload = segment.strip_prefix(FRAME_MARKER)?;
    serde_json::from_str(payload.trim()).ok()
}

/// Decode a fully buffered body into its frame sequence.
pub fn decode_frames(body: &str) -> Vec<Value> {
    let mut decoder = FrameDecoder::new();
    let mut frames = decoder.feed(body);
    frames.extend(decoder.finish());
    frames
}

/// Encode one frame as `data: <json>` plus the blank-line terminator.
pub fn encode_frame(frame: &Value) -> String {
    format!(
        "{FRAME_MARKER}{}{FRAME_SEPARATOR}",
        serde_json::to_string(frame).unwrap_or_default()
    )
}

/// Encode a frame sequence into one response body.
pub fn encode_frames(frames: &[Value]) -> String {
    frames.iter().map(encode_frame).collect()
}

/// Synthetic frame prepended to successful gateway streams.
pub fn user_message_created(thread_id: &str, message_id: &str) -> Value {
    json!({
        "type": USER_MESSAGE_CREATED,
        "threadId": thread_id,
        "messageId": message_id,
    })
}

/// Terminal frame for every gateway failure path.
pub fn run_error(thread_id: &str, run_id: &str, code: RunErrorCode, message: &str) -> Value {
    json!({
        "type": RUN_ERROR,
        "threadId": thread_id,
        "runId": run_id,
        "code": code.as_str(),
        "message": message,
    })
}
