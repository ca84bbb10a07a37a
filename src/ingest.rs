//! Incremental dataset build and document deletion.
//!
//! The build walks `data_dir`, skips every file already listed in the
//! processed-files manifest, and for each new file runs
//! extract → chunk → embed → store. Files that cannot be read or embedded
//! are reported and skipped; they stay out of the manifest so the next build
//! retries them.
//!
//! Both operations write the index database inside one transaction per
//! document, then save the manifest and touch the version file. The bot's
//! signature tracker watches exactly those three paths, so a finished build
//! or delete is picked up by the running bot on its next message.
//!
//! Callers are expected to hold the [`BuildLock`](crate::lockfile::BuildLock).

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::fs::OpenOptions;
use std::path::Path;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::db;
use crate::embedding::{embed_batched, vec_to_blob, EmbeddingProvider};
use crate::extract::{content_type_for, extract_file};
use crate::manifest::ProcessedFiles;
use crate::migrate;
use crate::models::Chunk;

/// Summary of one build run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BuildReport {
    /// Files indexed by this run.
    pub added: Vec<String>,
    /// Files that could not be indexed, with the reason.
    pub skipped: Vec<(String, String)>,
    /// Files skipped because the manifest already lists them.
    pub already_processed: usize,
    pub chunks_written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub filename: String,
    pub file_removed: bool,
    pub chunks_removed: u64,
    pub was_processed: bool,
}

/// Regular, non-hidden files directly inside `data_dir`, sorted by name.
pub fn list_data_files(config: &Config) -> Result<Vec<String>> {
    let dir = &config.paths.data_dir;
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read data directory: {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Index every file in `data_dir` that the manifest does not list yet.
pub async fn run_build(config: &Config, embedder: &dyn EmbeddingProvider) -> Result<BuildReport> {
    std::fs::create_dir_all(&config.paths.data_dir)?;
    let mut manifest = ProcessedFiles::load(&config.paths.processed_file);
    let mut report = BuildReport::default();

    let pending: Vec<String> = list_data_files(config)?
        .into_iter()
        .filter(|name| {
            if manifest.contains(name) {
                tracing::debug!(file = %name, "already processed, skipping");
                report.already_processed += 1;
                false
            } else {
                true
            }
        })
        .collect();

    if pending.is_empty() {
        tracing::info!(already_processed = report.already_processed, "no new files to index");
        return Ok(report);
    }

    let pool = db::connect_index(config).await?;
    migrate::migrate_index(&pool).await?;

    for name in pending {
        let Some(content_type) = content_type_for(&name) else {
            tracing::warn!(file = %name, "unsupported file type, skipping");
            report
                .skipped
                .push((name, "unsupported file type".to_string()));
            continue;
        };

        let path = config.paths.data_dir.join(&name);
        tracing::info!(file = %name, "loading document");
        let extracted = tokio::task::spawn_blocking(move || extract_file(&path))
            .await
            .map_err(|e| format!("extraction task failed: {e}"))
            .and_then(|r| r.map_err(|e| e.to_string()));
        let text = match extracted {
            Ok(text) => text,
            Err(reason) => {
                tracing::warn!(file = %name, error = %reason, "extraction failed, skipping");
                report.skipped.push((name, reason));
                continue;
            }
        };

        let metadata = serde_json::json!({ "source": name }).to_string();
        let chunks = chunk_document(
            &name,
            &text,
            config.chunking.chunk_size,
            config.chunking.chunk_overlap,
            &metadata,
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = match embed_batched(embedder, &texts, config.embedding.batch_size).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "embedding failed, skipping");
                report.skipped.push((name, format!("{:#}", e)));
                continue;
            }
        };

        store_document(&pool, &name, content_type, &chunks, &vectors, embedder).await?;
        tracing::info!(file = %name, chunks = chunks.len(), "document indexed");

        report.chunks_written += chunks.len();
        manifest.insert(name.clone());
        report.added.push(name);
    }

    pool.close().await;

    if !report.added.is_empty() {
        manifest.save(&config.paths.processed_file)?;
        touch_version_file(&config.paths.version_file)?;
    }

    tracing::info!(
        added = report.added.len(),
        skipped = report.skipped.len(),
        chunks = report.chunks_written,
        "build finished"
    );
    Ok(report)
}

async fn store_document(
    pool: &SqlitePool,
    source: &str,
    content_type: &str,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    embedder: &dyn EmbeddingProvider,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    // A file re-added under an old name replaces whatever was stored for it
    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE source = ?)",
    )
    .bind(source)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM chunks WHERE source = ?")
        .bind(source)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO documents (source, content_type, added_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET
            content_type = excluded.content_type,
            added_at = excluded.added_at
        "#,
    )
    .bind(source)
    .bind(content_type)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *tx)
    .await?;

    for (chunk, vector) in chunks.iter().zip(vectors) {
        sqlx::query(
            "INSERT INTO chunks (id, source, chunk_index, text, metadata_json, hash) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.source)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.metadata_json)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO embeddings (chunk_id, model, dims, vector) VALUES (?, ?, ?, ?)")
            .bind(&chunk.id)
            .bind(embedder.model_name())
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Remove a document from the data directory, the index and the manifest.
///
/// Returns `None` when the name is unknown to all three.
/// A bare file name inside the data directory: no separators, not hidden.
pub fn is_valid_dataset_name(filename: &str) -> bool {
    !filename.is_empty() && !filename.contains(['/', '\\']) && !filename.starts_with('.')
}

pub async fn delete_document(config: &Config, filename: &str) -> Result<Option<DeleteReport>> {
    if !is_valid_dataset_name(filename) {
        anyhow::bail!("invalid dataset file name: {:?}", filename);
    }
    let path = config.paths.data_dir.join(filename);
    let mut manifest = ProcessedFiles::load(&config.paths.processed_file);
    let was_processed = manifest.contains(filename);

    let chunks_removed = if db::index_db_path(config).exists() {
        let pool = db::connect_index(config).await?;
        migrate::migrate_index(&pool).await?;
        let removed = remove_from_index(&pool, filename).await?;
        pool.close().await;
        removed
    } else {
        0
    };

    let file_removed = if path.is_file() {
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        true
    } else {
        false
    };

    if !file_removed && !was_processed && chunks_removed == 0 {
        return Ok(None);
    }

    if was_processed {
        manifest.remove(filename);
        manifest.save(&config.paths.processed_file)?;
    }
    touch_version_file(&config.paths.version_file)?;

    tracing::info!(file = %filename, file_removed, chunks_removed, "document deleted");
    Ok(Some(DeleteReport {
        filename: filename.to_string(),
        file_removed,
        chunks_removed,
        was_processed,
    }))
}

async fn remove_from_index(pool: &SqlitePool, source: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE source = ?)",
    )
    .bind(source)
    .execute(&mut *tx)
    .await?;
    let removed = sqlx::query("DELETE FROM chunks WHERE source = ?")
        .bind(source)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM documents WHERE source = ?")
        .bind(source)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(removed)
}

/// Bump the version marker's mtime, creating it if needed.
pub fn touch_version_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, chrono::Utc::now().to_rfc3339())
        .with_context(|| format!("Failed to write version file {}", path.display()))?;
    // Same-second rewrites on coarse filesystems still need a fresh mtime
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_modified(std::time::SystemTime::now())?;
    Ok(())
}
