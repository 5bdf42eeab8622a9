//! Outbound HTTP client for backend agents.
//!
//! The client itself carries no deadline; the gateway's cancellation token
//! is the single abort source for both the request and the body read.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::model::MessageRole;

pub const RUN_ID_HEADER: &str = "X-Run-Id";

/// The payload POSTed to an agent endpoint: the run coordinates plus the
/// full ordered conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunRequest {
    pub thread_id: String,
    pub run_id: String,
    pub messages: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum AgentCallError {
    /// The merged cancellation token fired before the agent answered.
    #[error("agent call aborted")]
    Aborted,
    /// Network-level failure: DNS, connect, or a broken body read.
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
}

/// A fully buffered agent reply. The body is decoded downstream.
#[derive(Debug)]
pub struct AgentReply {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Clone, Default)]
pub struct AgentClient {
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// POST the run request and buffer the response body, aborting at the
    /// first of: transport failure, or the cancellation token firing.
    pub async fn send_run(
        &self,
        endpoint_url: &str,
        request: &AgentRunRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentReply, AgentCallError> {
        if cancel.is_cancelled() {
            return Err(AgentCallError::Aborted);
        }

        let send = self
            .http
            .post(endpoint_url)
            .header(RUN_ID_HEADER, &request.run_id)
            .json(request)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentCallError::Aborted),
            result = send => result?,
        };

        let status = response.status();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentCallError::Aborted),
            result = response.text() => result?,
        };

        Ok(AgentReply { status, body })
    }
}
