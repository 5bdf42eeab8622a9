use anyhow::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;

use super::migrations::{run_migrations, CURRENT_SCHEMA_VERSION};

/// Owns the SQLite pool. New databases get the full schema; existing ones are
/// brought up to date through the versioned migrations.
pub struct StorageManager {
    pool: Pool<Sqlite>,
}

impl StorageManager {
    pub async fn open(db_path: &Path) -> Result<Self> {
        let is_new_database = !db_path.exists();

        let pool = if is_new_database {
            Self::create_database(db_path).await?
        } else {
            Self::open_database(db_path).await?
        };

        Ok(Self { pool })
    }

    async fn open_database(db_path: &Path) -> Result<Pool<Sqlite>> {
        let pool = Self::get_pool(db_path, false).await?;
        run_migrations(&pool).await?;
        Ok(pool)
    }

    async fn create_database(db_path: &Path) -> Result<Pool<Sqlite>> {
        let pool = Self::get_pool(db_path, true).await?;

        sqlx::query(
            r#"
            CREATE TABLE schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(CURRENT_SCHEMA_VERSION)
            .execute(&pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                endpoint_url TEXT NOT NULL,
                icon TEXT,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'unknown',
                last_seen_at TIMESTAMP,
                config TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE threads (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                title TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                last_activity_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE runs (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES threads(id),
                agent_id TEXT NOT NULL REFERENCES agents(id),
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                provider_run_id TEXT,
                metadata TEXT,
                started_at TIMESTAMP,
                finished_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES threads(id),
                run_id TEXT REFERENCES runs(id),
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT,
                created_at TIMESTAMP NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX idx_messages_thread ON messages(thread_id, created_at)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX idx_threads_activity ON threads(last_activity_at DESC)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX idx_runs_thread ON runs(thread_id)")
            .execute(&pool)
            .await?;

        Ok(pool)
    }

    async fn get_pool(db_path: &Path, create_if_missing: bool) -> Result<Pool<Sqlite>> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(create_if_missing)
            .busy_timeout(std::time::Duration::from_secs(5))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        sqlx::SqlitePool::connect_with(options).await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to open SQLite database at '{}': {}",
                db_path.display(),
                e
            )
        })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
