//! CRUD against the agents/threads/messages/runs tables.
//!
//! The adapter is a pure write/read layer: it does not enforce the run state
//! machine (callers request only valid transitions) and it does not dedupe
//! messages. Every failure surfaces as a [`StoreError`].

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Agent, AgentStatus, Message, MessageRole, Run, RunStatus, Thread, ThreadSummary};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Optional field updates applied alongside a run status transition.
#[derive(Debug, Default)]
pub struct RunTransition {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunTransition {
    pub fn started_now() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn finished_now() -> Self {
        Self {
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn failed_now(error: impl Into<String>) -> Self {
        Self {
            finished_at: Some(Utc::now()),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Input row for agent config sync.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AgentUpsert {
    pub id: String,
    pub name: String,
    pub endpoint_url: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct ChatStore {
    pool: Pool<Sqlite>,
}

impl ChatStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    // ── Runs ────────────────────────────────────────────────────────

    /// Insert a new run in `pending` state.
    pub async fn create_run(&self, thread_id: &str, agent_id: &str) -> Result<Run, StoreError> {
        let run = Run {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            agent_id: agent_id.to_string(),
            status: RunStatus::Pending,
            error: None,
            provider_run_id: None,
            metadata: None,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO runs (id, thread_id, agent_id, status, created_at)
            VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(&run.id)
        .bind(&run.thread_id)
        .bind(&run.agent_id)
        .bind(run.status.to_string())
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;

        Ok(run)
    }

    /// Write a status plus any accompanying fields. Absent fields keep their
    /// stored value; the state machine itself is the caller's responsibility.
    pub async fn transition_run(
        &self,
        run_id: &str,
        status: RunStatus,
        fields: RunTransition,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE runs
            SET status = ?,
                started_at = COALESCE(?, started_at),
                finished_at = COALESCE(?, finished_at),
                error = COALESCE(?, error)
            WHERE id = ?
        "#,
        )
        .bind(status.to_string())
        .bind(fields.started_at)
        .bind(fields.finished_at)
        .bind(fields.error)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let run = sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message with a freshly generated id.
    pub async fn append_message(
        &self,
        thread_id: &str,
        run_id: Option<&str>,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.append_message_with_id(&id, thread_id, run_id, role, content)
            .await
    }

    /// Insert a message under a caller-chosen id (the agent may advertise the
    /// assistant message id ahead of time).
    pub async fn append_message_with_id(
        &self,
        id: &str,
        thread_id: &str,
        run_id: Option<&str>,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, StoreError> {
        let message = Message {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            run_id: run_id.map(str::to_string),
            role,
            content: content.to_string(),
            metadata: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO messages (id, thread_id, run_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&message.id)
        .bind(&message.thread_id)
        .bind(&message.run_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    /// Full thread history, ascending by creation time. This is exactly what is
    /// sent to the agent.
    pub async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE thread_id = ? ORDER BY created_at ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    // ── Agents ──────────────────────────────────────────────────────

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(agent)
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let agents = sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(agents)
    }

    /// Insert-or-update an agent row by id, refreshing `updated_at`.
    pub async fn upsert_agent(&self, record: &AgentUpsert) -> Result<(), StoreError> {
        let now = Utc::now();
        let config_json = record
            .config
            .as_ref()
            .map(|config| config.to_string());

        sqlx::query(
            r#"
            INSERT INTO agents (id, name, endpoint_url, icon, description, config, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                endpoint_url = excluded.endpoint_url,
                icon = excluded.icon,
                description = excluded.description,
                config = excluded.config,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.endpoint_url)
        .bind(&record.icon)
        .bind(&record.description)
        .bind(config_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Health-probe result write. `last_seen_at` only advances on a
    /// successful probe.
    pub async fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE agents
            SET status = ?,
                last_seen_at = COALESCE(?, last_seen_at),
                updated_at = ?
            WHERE id = ?
        "#,
        )
        .bind(status.to_string())
        .bind(last_seen_at)
        .bind(Utc::now())
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Threads ─────────────────────────────────────────────────────

    pub async fn create_thread(
        &self,
        agent_id: &str,
        title: Option<&str>,
    ) -> Result<Thread, StoreError> {
        let now = Utc::now();
        let thread = Thread {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            title: title.map(str::to_string),
            status: crate::model::ThreadStatus::Active,
            last_activity_at: now,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO threads (id, agent_id, title, status, last_activity_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&thread.id)
        .bind(&thread.agent_id)
        .bind(&thread.title)
        .bind(thread.status.to_string())
        .bind(thread.last_activity_at)
        .bind(thread.created_at)
        .bind(thread.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(thread)
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        let thread = sqlx::query_as::<_, Thread>("SELECT * FROM threads WHERE id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(thread)
    }

    /// Inbox listing: threads joined with their agent and newest message,
    /// most recently active first.
    pub async fn list_threads(
        &self,
        agent_filter: Option<&str>,
    ) -> Result<Vec<ThreadSummary>, StoreError> {
        let threads = sqlx::query_as::<_, ThreadSummary>(
            r#"
            SELECT t.id, t.agent_id, t.title, t.status, t.last_activity_at, t.created_at,
                   a.name AS agent_name, a.icon AS agent_icon,
                   lm.content AS last_message,
                   lm.role AS last_message_role,
                   lm.created_at AS last_message_at
            FROM threads t
            INNER JOIN agents a ON a.id = t.agent_id
            LEFT JOIN (
                SELECT thread_id, content, role, MAX(created_at) AS created_at
                FROM messages
                GROUP BY thread_id
            ) lm ON lm.thread_id = t.id
            WHERE (? IS NULL OR t.agent_id = ?)
            ORDER BY t.last_activity_at DESC
        "#,
        )
        .bind(agent_filter)
        .bind(agent_filter)
        .fetch_all(&self.pool)
        .await?;
        Ok(threads)
    }

    /// Bump the thread's activity clock, once per run.
    pub async fn touch_thread(&self, thread_id: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query("UPDATE threads SET last_activity_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
