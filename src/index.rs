//! Read side of the index store.
//!
//! [`IndexStore::open`] loads every stored chunk and its vector from
//! `index_dir/index.sqlite3` into an immutable in-memory snapshot. The
//! snapshot never changes after opening: a builder writing to the database
//! afterwards is only seen by the next `open`, which is what lets the reload
//! coordinator swap whole pipelines instead of mutating one in place.
//!
//! Ranking is brute-force cosine similarity over the snapshot, descending,
//! with ties kept in storage order.

use anyhow::Context;
use sqlx::Row;
use std::path::Path;
use std::sync::Arc;

use crate::db::{self, INDEX_DB_FILE};
use crate::embedding::{self, EmbeddingProvider};
use crate::error::ReloadError;
use crate::models::RetrievedDoc;

/// One stored chunk with its vector.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub text: String,
    pub metadata: serde_json::Value,
    pub vector: Vec<f32>,
}

pub struct IndexStore;

impl IndexStore {
    /// Open the index directory and load a snapshot of its contents.
    ///
    /// # Errors
    ///
    /// [`ReloadError::IndexUnavailable`] if `path` is missing or empty;
    /// [`ReloadError::PipelineConstruction`] for anything else.
    pub async fn open(
        path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<IndexHandle, ReloadError> {
        if !dir_has_entries(path) {
            return Err(ReloadError::IndexUnavailable {
                path: path.to_path_buf(),
            });
        }

        let db_path = path.join(INDEX_DB_FILE);
        if !db_path.is_file() {
            return Err(ReloadError::PipelineConstruction(anyhow::anyhow!(
                "{} has no {}",
                path.display(),
                INDEX_DB_FILE
            )));
        }

        let pool = db::connect_index_readonly(&db_path)
            .await
            .with_context(|| format!("Failed to open index database {}", db_path.display()))?;

        let rows = sqlx::query(
            r#"
            SELECT c.text, c.metadata_json, e.model, e.vector
            FROM chunks c
            JOIN embeddings e ON e.chunk_id = c.id
            ORDER BY c.rowid
            "#,
        )
        .fetch_all(&pool)
        .await
        .context("Failed to read index entries")?;
        pool.close().await;

        let mut mismatched = 0usize;
        let entries: Vec<IndexEntry> = rows
            .iter()
            .map(|row| {
                let model: String = row.get("model");
                if model != embedder.model_name() {
                    mismatched += 1;
                }
                let metadata_json: String = row.get("metadata_json");
                let blob: Vec<u8> = row.get("vector");
                IndexEntry {
                    text: row.get("text"),
                    metadata: serde_json::from_str(&metadata_json)
                        .unwrap_or(serde_json::Value::Null),
                    vector: embedding::blob_to_vec(&blob),
                }
            })
            .collect();

        if mismatched > 0 {
            tracing::warn!(
                mismatched,
                model = embedder.model_name(),
                "index holds vectors from a different embedding model; rebuild the dataset"
            );
        }
        tracing::debug!(path = %path.display(), entries = entries.len(), "index snapshot loaded");

        Ok(IndexHandle::from_entries(entries, embedder))
    }
}

fn dir_has_entries(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Cheaply clonable handle to one loaded snapshot.
#[derive(Clone)]
pub struct IndexHandle {
    inner: Arc<Snapshot>,
}

struct Snapshot {
    entries: Vec<IndexEntry>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IndexHandle {
    pub fn from_entries(entries: Vec<IndexEntry>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            inner: Arc::new(Snapshot { entries, embedder }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn as_retriever(&self, top_k: usize) -> Retriever {
        Retriever {
            handle: self.clone(),
            top_k: top_k.max(1),
        }
    }
}

/// Top-k similarity search over a snapshot.
#[derive(Clone)]
pub struct Retriever {
    handle: IndexHandle,
    top_k: usize,
}

impl Retriever {
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embed `query` and return the `top_k` closest chunks, best first.
    pub async fn search(&self, query: &str) -> anyhow::Result<Vec<RetrievedDoc>> {
        let snapshot = &self.handle.inner;
        if snapshot.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = embedding::embed_query(snapshot.embedder.as_ref(), query).await?;

        let mut scored: Vec<(usize, f32)> = snapshot
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, embedding::cosine_similarity(&query_vec, &entry.vector)))
            .collect();

        // Stable sort keeps storage order for equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let entry = &snapshot.entries[i];
                RetrievedDoc {
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                    score,
                }
            })
            .collect())
    }
}
