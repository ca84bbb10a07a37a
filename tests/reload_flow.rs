//! End-to-end: build the dataset, answer through the chat handler, change the
//! dataset on disk, and check the next answer comes from the new index
//! without restarting anything.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use travel_rag_bot::chat::{ChatHandler, ChatTransport, RELOAD_OK};
use travel_rag_bot::chatlog::SqliteChatLog;
use travel_rag_bot::config::Config;
use travel_rag_bot::conversation::ConversationStore;
use travel_rag_bot::embedding::EmbeddingProvider;
use travel_rag_bot::ingest;
use travel_rag_bot::llm::CompletionClient;
use travel_rag_bot::pipeline::{IndexPipelineFactory, PipelineFactory, QueryPipeline};
use travel_rag_bot::prompt::PromptTemplate;
use travel_rag_bot::reload::ReloadCoordinator;
use travel_rag_bot::signature::SignatureTracker;

/// Bias term plus one dimension per destination keyword.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                vec![
                    1.0,
                    t.matches("bromo").count() as f32,
                    t.matches("batu").count() as f32,
                ]
            })
            .collect())
    }
}

/// Answers with the prompt it was given; with a `{context}`-only template
/// that is exactly the retrieved text.
struct EchoLlm;

#[async_trait]
impl CompletionClient for EchoLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingTransport {
    fn last(&self) -> String {
        self.sent.lock().unwrap().last().unwrap().1.clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_typing(&self, _chat_id: i64) -> Result<()> {
        Ok(())
    }
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

fn test_config(root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.paths.data_dir = root.join("data");
    config.paths.index_dir = root.join("index_db");
    config.paths.processed_file = root.join("processed_files.json");
    config.paths.version_file = root.join(".dataset_version");
    config.paths.lock_file = root.join(".build.lock");
    config.chatlog.path = root.join("chatlog.sqlite");
    config
}

async fn setup() -> (TempDir, Config, ChatHandler, Arc<SqliteChatLog>) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    std::fs::create_dir_all(&config.paths.data_dir).unwrap();
    std::fs::write(
        config.paths.data_dir.join("bromo.txt"),
        "Paket Bromo sunrise jeep Rp 400.000",
    )
    .unwrap();
    ingest::run_build(&config, &KeywordEmbedder).await.unwrap();

    let factory = IndexPipelineFactory::new(
        config.paths.index_dir.clone(),
        1,
        Arc::new(KeywordEmbedder),
        PromptTemplate::new("{context}"),
        Arc::new(EchoLlm),
    );
    let coordinator = Arc::new(ReloadCoordinator::new(
        SignatureTracker::from_config(&config),
        Arc::new(factory) as Arc<dyn PipelineFactory<QueryPipeline>>,
        Duration::from_secs(5),
    ));
    let chatlog = Arc::new(SqliteChatLog::open(&config).await.unwrap());
    let handler = ChatHandler::new(
        coordinator,
        ConversationStore::new(10, Duration::from_secs(3600)),
        chatlog.clone(),
    );
    (tmp, config, handler, chatlog)
}

/// Let the clock move past the previous build's mtimes.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_new_upload_is_answered_without_restart() {
    let (_tmp, config, handler, chatlog) = setup().await;
    let transport = RecordingTransport::default();

    handler.dispatch(&transport, 1, "paket bromo?").await.unwrap();
    assert!(transport.last().contains("Bromo"));
    assert_eq!(handler.coordinator().diagnostics().reloads, 1);

    tick().await;
    std::fs::write(
        config.paths.data_dir.join("batu.txt"),
        "Paket Batu museum angkut Rp 350.000",
    )
    .unwrap();
    let report = ingest::run_build(&config, &KeywordEmbedder).await.unwrap();
    assert_eq!(report.added, vec!["batu.txt"]);

    handler.dispatch(&transport, 2, "paket batu?").await.unwrap();
    assert!(transport.last().contains("Batu"), "got {}", transport.last());
    assert_eq!(handler.coordinator().diagnostics().reloads, 2);

    // Nothing changed on disk: no further reload
    handler.dispatch(&transport, 3, "batu lagi").await.unwrap();
    assert_eq!(handler.coordinator().diagnostics().reloads, 2);

    let (total, fallback) = chatlog.counts().await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(fallback, 0);
}

#[tokio::test]
async fn test_deleted_document_disappears_from_answers() {
    let (_tmp, config, handler, _chatlog) = setup().await;
    let transport = RecordingTransport::default();

    tick().await;
    std::fs::write(config.paths.data_dir.join("batu.txt"), "Paket Batu Rp 350.000").unwrap();
    ingest::run_build(&config, &KeywordEmbedder).await.unwrap();

    handler.dispatch(&transport, 7, "batu").await.unwrap();
    assert!(transport.last().contains("Batu"));

    tick().await;
    let deleted = ingest::delete_document(&config, "batu.txt").await.unwrap().unwrap();
    assert_eq!(deleted.chunks_removed, 1);

    handler.dispatch(&transport, 8, "batu").await.unwrap();
    let reply = transport.last();
    assert!(!reply.contains("Batu"), "deleted text still served: {}", reply);
    assert!(reply.contains("Bromo"));
}

#[tokio::test]
async fn test_transcript_carries_across_messages() {
    let (_tmp, _config, handler, _chatlog) = setup().await;
    let transport = RecordingTransport::default();

    handler.dispatch(&transport, 42, "halo").await.unwrap();
    handler.dispatch(&transport, 42, "jeep bromo").await.unwrap();

    let transcript = handler.conversations().get(42);
    let lines: Vec<&str> = transcript.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines[0], "Pengguna: halo");
    assert!(lines[1].starts_with("Bot: Paket Bromo"));
    assert_eq!(lines[2], "Pengguna: jeep bromo");
    assert!(handler.conversations().get(43).is_empty());
}

#[tokio::test]
async fn test_reload_command_forces_rebuild() {
    let (_tmp, _config, handler, _chatlog) = setup().await;
    let transport = RecordingTransport::default();

    handler.dispatch(&transport, 5, "/reload").await.unwrap();
    assert_eq!(transport.last(), RELOAD_OK);
    handler.dispatch(&transport, 5, "/reload@travel_bot").await.unwrap();
    assert_eq!(transport.last(), RELOAD_OK);
    assert_eq!(handler.coordinator().diagnostics().reloads, 2);
}

#[tokio::test]
async fn test_missing_index_yields_apology_and_fallback_record() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let factory = IndexPipelineFactory::new(
        config.paths.index_dir.clone(),
        1,
        Arc::new(KeywordEmbedder),
        PromptTemplate::new("{context}"),
        Arc::new(EchoLlm),
    );
    let coordinator = Arc::new(ReloadCoordinator::new(
        SignatureTracker::from_config(&config),
        Arc::new(factory) as Arc<dyn PipelineFactory<QueryPipeline>>,
        Duration::from_secs(5),
    ));
    let chatlog = Arc::new(SqliteChatLog::open(&config).await.unwrap());
    let handler = ChatHandler::new(
        coordinator,
        ConversationStore::new(10, Duration::from_secs(3600)),
        chatlog.clone(),
    );
    let transport = RecordingTransport::default();

    handler.dispatch(&transport, 9, "ada paket?").await.unwrap();
    assert_eq!(transport.last(), travel_rag_bot::chat::APOLOGY);
    assert!(handler.conversations().get(9).is_empty());
    assert_eq!(chatlog.counts().await.unwrap(), (1, 1));
}
