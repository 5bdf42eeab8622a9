use anyhow::Result;
use sqlx::{Pool, Sqlite};
use tracing::info;

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version < CURRENT_SCHEMA_VERSION {
        info!(
            "Running database migrations from v{} to v{}...",
            current_version, CURRENT_SCHEMA_VERSION
        );

        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            info!("  Applying migration v{}...", version);
            apply_migration(pool, version).await?;
            update_schema_version(pool, version).await?;
        }

        info!("All migrations complete");
    }

    Ok(())
}

async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i32> {
    let table_exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT name FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
    "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version = sqlx::query_scalar::<_, i32>("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;

    Ok(version)
}

async fn update_schema_version(pool: &Pool<Sqlite>, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn apply_migration(pool: &Pool<Sqlite>, version: i32) -> Result<()> {
    match version {
        1 => {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                )
            "#,
            )
            .execute(pool)
            .await?;
        }
        2 => {
            // Pre-v2 databases stored agents without a free-form config blob.
            sqlx::query(
                r#"
                ALTER TABLE agents ADD COLUMN config TEXT
            "#,
            )
            .execute(pool)
            .await?;
        }
        _ => {
            anyhow::bail!("Unknown migration version: {}", version);
        }
    }

    Ok(())
}
