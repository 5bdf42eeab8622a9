//! Row types for the four tables the inbox is built on.
//!
//! Statuses are stored as lowercase text; the `Display`/`FromStr` pairs are
//! the single source of truth for the wire and column spelling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Online => write!(f, "online"),
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(AgentStatus::Online),
            "offline" => Ok(AgentStatus::Offline),
            "unknown" => Ok(AgentStatus::Unknown),
            _ => Err(anyhow::anyhow!("Invalid agent status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    #[default]
    Active,
    Completed,
    Error,
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadStatus::Active => write!(f, "active"),
            ThreadStatus::Completed => write!(f, "completed"),
            ThreadStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ThreadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ThreadStatus::Active),
            "completed" => Ok(ThreadStatus::Completed),
            "error" => Ok(ThreadStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid thread status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            _ => Err(anyhow::anyhow!("Invalid message role: {}", s)),
        }
    }
}

/// Lifecycle of a single gateway invocation. Only forward transitions occur;
/// a run never leaves a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid run status: {}", s)),
        }
    }
}

/// A backend agent: an HTTP endpoint speaking the run protocol. Rows are
/// written by config sync and the health probe; the gateway only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub endpoint_url: String,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub status: AgentStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<Object>)]
    pub config: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, SqliteRow> for Agent {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let config_json: Option<String> = row.try_get("config")?;

        Ok(Agent {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            endpoint_url: row.try_get("endpoint_url")?,
            icon: row.try_get("icon")?,
            description: row.try_get("description")?,
            status: status.parse().unwrap_or_default(),
            last_seen_at: row.try_get("last_seen_at")?,
            config: config_json.and_then(|json| serde_json::from_str(&json).ok()),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Thread {
    pub id: String,
    pub agent_id: String,
    pub title: Option<String>,
    pub status: ThreadStatus,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, SqliteRow> for Thread {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;

        Ok(Thread {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            title: row.try_get("title")?,
            status: status.parse().unwrap_or_default(),
            last_activity_at: row.try_get("last_activity_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// An inbox listing row: a thread joined with its agent and the newest
/// message, for rendering one line of the inbox without extra queries.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadSummary {
    pub id: String,
    pub agent_id: String,
    pub title: Option<String>,
    pub status: ThreadStatus,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub agent_name: String,
    pub agent_icon: Option<String>,
    pub last_message: Option<String>,
    pub last_message_role: Option<MessageRole>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl sqlx::FromRow<'_, SqliteRow> for ThreadSummary {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let last_message_role: Option<String> = row.try_get("last_message_role")?;

        Ok(ThreadSummary {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            title: row.try_get("title")?,
            status: status.parse().unwrap_or_default(),
            last_activity_at: row.try_get("last_activity_at")?,
            created_at: row.try_get("created_at")?,
            agent_name: row.try_get("agent_name")?,
            agent_icon: row.try_get("agent_icon")?,
            last_message: row.try_get("last_message")?,
            last_message_role: last_message_role.and_then(|role| role.parse().ok()),
            last_message_at: row.try_get("last_message_at")?,
        })
    }
}

/// One chat message. `run_id` is set for messages created inside a run (the
/// triggering user turn and the resulting assistant turn) and null otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub run_id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, SqliteRow> for Message {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let role: String = row.try_get("role")?;
        let metadata_json: Option<String> = row.try_get("metadata")?;

        Ok(Message {
            id: row.try_get("id")?,
            thread_id: row.try_get("thread_id")?,
            run_id: row.try_get("run_id")?,
            role: role
                .parse()
                .map_err(|_| sqlx::Error::Decode(format!("invalid role: {role}").into()))?,
            content: row.try_get("content")?,
            metadata: metadata_json.and_then(|json| serde_json::from_str(&json).ok()),
            created_at: row.try_get("created_at")?,
        })
    }
}

/// One gateway invocation, tracked from `pending` to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub agent_id: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub provider_run_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, SqliteRow> for Run {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let metadata_json: Option<String> = row.try_get("metadata")?;

        Ok(Run {
            id: row.try_get("id")?,
            thread_id: row.try_get("thread_id")?,
            agent_id: row.try_get("agent_id")?,
            status: status.parse().unwrap_or_default(),
            error: row.try_get("error")?,
            provider_run_id: row.try_get("provider_run_id")?,
            metadata: metadata_json.and_then(|json| serde_json::from_str(&json).ok()),
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
