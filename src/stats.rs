//! `travelbot status`: what is on disk and what the index holds.
//!
//! Shows the data directory against the processed-files manifest (so files
//! waiting for a build stand out), index table counts with a per-document
//! breakdown, the current freshness signature, and chat log totals.

use anyhow::Result;
use sqlx::Row;

use crate::chatlog::SqliteChatLog;
use crate::config::Config;
use crate::db;
use crate::ingest;
use crate::manifest::ProcessedFiles;
use crate::signature::SignatureTracker;

#[derive(Debug, Default)]
pub struct StatusReport {
    pub data_files: Vec<String>,
    /// Files in `data_dir` that the manifest does not list yet.
    pub pending: Vec<String>,
    pub manifest_entries: usize,
    pub index_bytes: u64,
    pub documents: Vec<DocumentStats>,
    pub total_chunks: i64,
    pub total_embedded: i64,
    pub signature: u64,
    pub chatlog: Option<(i64, i64)>,
}

#[derive(Debug)]
pub struct DocumentStats {
    pub source: String,
    pub chunks: i64,
    pub added_at: i64,
}

pub async fn collect_status(config: &Config) -> Result<StatusReport> {
    let manifest = ProcessedFiles::load(&config.paths.processed_file);
    let data_files = ingest::list_data_files(config)?;
    let pending = data_files
        .iter()
        .filter(|f| !manifest.contains(f))
        .cloned()
        .collect();

    let mut report = StatusReport {
        data_files,
        pending,
        manifest_entries: manifest.len(),
        signature: SignatureTracker::from_config(config).current_signature(),
        ..Default::default()
    };

    let index_path = db::index_db_path(config);
    if index_path.is_file() {
        report.index_bytes = std::fs::metadata(&index_path).map(|m| m.len()).unwrap_or(0);

        let pool = db::connect_index_readonly(&index_path).await?;
        report.total_chunks = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&pool)
            .await?;
        report.total_embedded = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT d.source, d.added_at, COUNT(c.id) AS chunk_count
            FROM documents d
            LEFT JOIN chunks c ON c.source = d.source
            GROUP BY d.source
            ORDER BY d.added_at DESC, d.source ASC
            "#,
        )
        .fetch_all(&pool)
        .await?;
        report.documents = rows
            .iter()
            .map(|row| DocumentStats {
                source: row.get("source"),
                chunks: row.get("chunk_count"),
                added_at: row.get("added_at"),
            })
            .collect();
        pool.close().await;
    }

    if config.chatlog.enabled && config.chatlog.path.is_file() {
        let log = SqliteChatLog::open(config).await?;
        report.chatlog = Some(log.counts().await?);
    }

    Ok(report)
}

pub async fn run_status(config: &Config) -> Result<()> {
    let report = collect_status(config).await?;

    println!("Travel RAG Bot — Status");
    println!("=======================");
    println!();
    println!("  Data dir:    {}", config.paths.data_dir.display());
    println!(
        "  Files:       {} ({} pending build)",
        report.data_files.len(),
        report.pending.len()
    );
    for f in &report.pending {
        println!("    pending: {}", f);
    }
    println!("  Manifest:    {} entries", report.manifest_entries);
    println!();
    println!("  Index:       {}", db::index_db_path(config).display());
    println!("  Size:        {}", format_bytes(report.index_bytes));
    println!("  Documents:   {}", report.documents.len());
    println!("  Chunks:      {}", report.total_chunks);
    println!("  Embedded:    {} / {}", report.total_embedded, report.total_chunks);
    println!("  Signature:   {}", report.signature);

    if !report.documents.is_empty() {
        println!();
        println!("  {:<40} {:>8}   {}", "DOCUMENT", "CHUNKS", "ADDED");
        println!("  {}", "-".repeat(66));
        for d in &report.documents {
            println!(
                "  {:<40} {:>8}   {}",
                d.source,
                d.chunks,
                format_ts_relative(d.added_at)
            );
        }
    }

    if let Some((total, fallback)) = report.chatlog {
        println!();
        println!("  Chat log:    {} messages ({} fallback)", total, fallback);
    }
    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Relative time for recent timestamps, a date otherwise.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    match delta {
        d if d < 0 => format_ts_iso(ts),
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => format!("{} min ago", d / 60),
        d if d < 86400 => format!("{} h ago", d / 3600),
        d if d < 86400 * 30 => format!("{} d ago", d / 86400),
        _ => format_ts_iso(ts),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use async_trait::async_trait;

    struct OneDim;

    #[async_trait]
    impl EmbeddingProvider for OneDim {
        fn model_name(&self) -> &str {
            "one"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.paths.data_dir = root.join("data");
        config.paths.index_dir = root.join("index_db");
        config.paths.processed_file = root.join("processed_files.json");
        config.paths.version_file = root.join(".dataset_version");
        config.chatlog.path = root.join("chatlog.sqlite");
        config
    }

    #[tokio::test]
    async fn test_empty_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let report = collect_status(&config(tmp.path())).await.unwrap();
        assert!(report.data_files.is_empty());
        assert!(report.documents.is_empty());
        assert_eq!(report.signature, 0);
        assert!(report.chatlog.is_none());
    }

    #[tokio::test]
    async fn test_counts_after_build() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        std::fs::create_dir_all(&config.paths.data_dir).unwrap();
        std::fs::write(config.paths.data_dir.join("a.txt"), "Paket A").unwrap();
        ingest::run_build(&config, &OneDim).await.unwrap();
        std::fs::write(config.paths.data_dir.join("b.txt"), "Paket B").unwrap();

        let report = collect_status(&config).await.unwrap();
        assert_eq!(report.data_files, vec!["a.txt", "b.txt"]);
        assert_eq!(report.pending, vec!["b.txt"]);
        assert_eq!(report.manifest_entries, 1);
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].source, "a.txt");
        assert_eq!(report.total_chunks, 1);
        assert_eq!(report.total_embedded, 1);
        assert!(report.signature > 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
