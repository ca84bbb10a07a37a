use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the index store and chat log schemas. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.paths.data_dir)?;

    let index = db::connect_index(config).await?;
    migrate_index(&index).await?;
    index.close().await;

    if config.chatlog.enabled {
        let chatlog = db::connect_chatlog(config).await?;
        migrate_chatlog(&chatlog).await?;
        chatlog.close().await;
    }

    Ok(())
}

pub async fn migrate_index(pool: &SqlitePool) -> Result<()> {
    // One row per source file in the data directory
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            source TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            added_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            hash TEXT NOT NULL,
            UNIQUE(source, chunk_index),
            FOREIGN KEY (source) REFERENCES documents(source)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn migrate_chatlog(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chatlog (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            requester_id TEXT NOT NULL,
            status INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chatlog_created_at ON chatlog(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
