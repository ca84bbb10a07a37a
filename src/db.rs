use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::Config;

/// File name of the index database inside the index directory. Its mtime is
/// the fast path of the freshness signature.
pub const INDEX_DB_FILE: &str = "index.sqlite3";

pub fn index_db_path(config: &Config) -> PathBuf {
    config.paths.index_dir.join(INDEX_DB_FILE)
}

/// Open the index database for writing, creating it if needed.
///
/// Uses the rollback journal rather than WAL so every commit lands in the
/// main file and advances its modification time.
pub async fn connect_index(config: &Config) -> Result<SqlitePool> {
    let path = index_db_path(config);
    connect(&path, SqliteJournalMode::Delete, false).await
}

/// Open an existing index database read-only.
pub async fn connect_index_readonly(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .read_only(true)
        .create_if_missing(false);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn connect_chatlog(config: &Config) -> Result<SqlitePool> {
    connect(&config.chatlog.path, SqliteJournalMode::Wal, true).await
}

async fn connect(path: &Path, journal: SqliteJournalMode, pooled: bool) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(journal);

    let pool = SqlitePoolOptions::new()
        .max_connections(if pooled { 5 } else { 1 })
        .connect_with(options)
        .await?;

    Ok(pool)
}
