//! Durable chat log.
//!
//! Every handled message, answered or failed, becomes one append-only row.
//! The chat handler treats write failures as diagnostics only.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::error::ChatLogError;
use crate::migrate;
use crate::models::ChatLogRecord;

#[async_trait]
pub trait ChatLogSink: Send + Sync {
    async fn append_record(&self, record: &ChatLogRecord) -> Result<(), ChatLogError>;
}

/// Writes to the `chatlog` table of a local SQLite database.
pub struct SqliteChatLog {
    pool: SqlitePool,
}

impl SqliteChatLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect_chatlog(config).await?;
        migrate::migrate_chatlog(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Total rows and rows flagged as fallback.
    pub async fn counts(&self) -> Result<(i64, i64), ChatLogError> {
        let (total, fallback): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 0 THEN 1 ELSE 0 END), 0) FROM chatlog",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((total, fallback))
    }
}

#[async_trait]
impl ChatLogSink for SqliteChatLog {
    async fn append_record(&self, record: &ChatLogRecord) -> Result<(), ChatLogError> {
        sqlx::query(
            "INSERT INTO chatlog (question, answer, requester_id, status, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.question)
        .bind(&record.answer)
        .bind(&record.requester_id)
        .bind(record.status.flag())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Discards records; used when `[chatlog] enabled = false`.
pub struct NoopChatLog;

#[async_trait]
impl ChatLogSink for NoopChatLog {
    async fn append_record(&self, _record: &ChatLogRecord) -> Result<(), ChatLogError> {
        Ok(())
    }
}

/// The sink selected by configuration.
pub async fn open_sink(config: &Config) -> anyhow::Result<Arc<dyn ChatLogSink>> {
    if config.chatlog.enabled {
        Ok(Arc::new(SqliteChatLog::open(config).await?))
    } else {
        tracing::info!("chat log disabled");
        Ok(Arc::new(NoopChatLog))
    }
}
