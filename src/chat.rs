//! Chat handler: one inbound message in, one reply out.
//!
//! For a normal message the order is fixed:
//!
//! 1. make sure the query pipeline is current (reload coordinator)
//! 2. read the chat's transcript and prepend it to the new message
//! 3. run the pipeline (retrieval + remote completion)
//! 4. format the raw answer for the chat, classify the raw answer
//! 5. write the chat log record (failures only logged)
//! 6. reply, then append the exchange to the transcript
//!
//! Any failure in steps 1–4 produces an apology reply and a fallback log
//! record carrying the error text. The transcript is left untouched.
//!
//! The transport is behind [`ChatTransport`] so the handler runs the same
//! against Telegram and against test doubles.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::chatlog::ChatLogSink;
use crate::classify::classify;
use crate::conversation::{build_input, ConversationStore};
use crate::db::INDEX_DB_FILE;
use crate::error::ChatError;
use crate::format::format_answer;
use crate::models::{AnswerStatus, ChatLogRecord};
use crate::pipeline::QueryPipeline;
use crate::reload::{ReloadCoordinator, ReloadOutcome};

pub const GREETING: &str = "Halo 👋! Saya Chatbot Virtual Assistant Travel Malang ID. Silahkan tanyakan apa saja seputar travel di Malang.";
pub const APOLOGY: &str = "⚠️ Maaf, terjadi kesalahan saat memproses pesan Anda.";
pub const RELOAD_OK: &str = "✅ Reload dataset berhasil (tanpa restart).";

/// Outbound side of a chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Best-effort "typing…" indicator.
    async fn send_typing(&self, chat_id: i64) -> Result<()>;
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;
}

pub struct ChatHandler {
    coordinator: Arc<ReloadCoordinator<QueryPipeline>>,
    conversations: ConversationStore,
    chatlog: Arc<dyn ChatLogSink>,
}

impl ChatHandler {
    pub fn new(
        coordinator: Arc<ReloadCoordinator<QueryPipeline>>,
        conversations: ConversationStore,
        chatlog: Arc<dyn ChatLogSink>,
    ) -> Self {
        Self {
            coordinator,
            conversations,
            chatlog,
        }
    }

    pub fn coordinator(&self) -> &ReloadCoordinator<QueryPipeline> {
        &self.coordinator
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Route one inbound text: `/start`, `/debug`, `/reload`, or a question.
    /// Other slash commands are ignored.
    pub async fn dispatch(&self, transport: &dyn ChatTransport, chat_id: i64, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if let Some(command) = text.strip_prefix('/') {
            let name = command
                .split_whitespace()
                .next()
                .and_then(|c| c.split('@').next())
                .unwrap_or("");
            return match name {
                "start" => transport.send_message(chat_id, GREETING).await,
                "debug" => self.handle_debug(transport, chat_id).await,
                "reload" => self.handle_reload(transport, chat_id).await,
                other => {
                    tracing::debug!(chat_id, command = other, "ignoring unknown command");
                    Ok(())
                }
            };
        }
        self.handle_message(transport, chat_id, text).await.map(|_| ())
    }

    /// Answer a question. Returns the status that was logged.
    ///
    /// Only a failure to deliver the reply is returned as an error.
    pub async fn handle_message(
        &self,
        transport: &dyn ChatTransport,
        chat_id: i64,
        text: &str,
    ) -> Result<AnswerStatus> {
        tracing::info!(chat_id, text, "message received");
        if let Err(e) = transport.send_typing(chat_id).await {
            tracing::debug!(chat_id, error = %e, "typing indicator failed");
        }

        let previous = self.conversations.get(chat_id);

        match self.answer(&previous, text).await {
            Ok(raw) => {
                let formatted = format_answer(&raw);
                let status = classify(&raw);
                self.log(ChatLogRecord {
                    question: text.to_string(),
                    answer: raw,
                    requester_id: chat_id.to_string(),
                    status,
                })
                .await;

                let reply = if formatted.is_empty() { APOLOGY } else { formatted.as_str() };
                transport.send_message(chat_id, reply).await?;
                self.conversations.append(chat_id, text, reply);
                Ok(status)
            }
            Err(e) => {
                tracing::error!(chat_id, error = %e, "failed to answer message");
                self.log(ChatLogRecord {
                    question: text.to_string(),
                    answer: format!("ERROR: {e}"),
                    requester_id: chat_id.to_string(),
                    status: AnswerStatus::Fallback,
                })
                .await;
                transport.send_message(chat_id, APOLOGY).await?;
                Ok(AnswerStatus::Fallback)
            }
        }
    }

    async fn answer(&self, previous: &str, text: &str) -> Result<String, ChatError> {
        let ensured = self.coordinator.ensure_latest(false).await?;
        if let ReloadOutcome::Reloaded { signature } = ensured.outcome {
            tracing::info!(signature, "answering with freshly loaded index");
        }
        let input = build_input(previous, text);
        ensured
            .pipeline
            .invoke(&input)
            .await
            .map_err(ChatError::CompletionFailure)
    }

    async fn log(&self, record: ChatLogRecord) {
        if let Err(e) = self.chatlog.append_record(&record).await {
            tracing::warn!(error = %e, requester = %record.requester_id, "chat log write failed");
        }
    }

    /// Force a reload and report the result to the operator.
    pub async fn handle_reload(&self, transport: &dyn ChatTransport, chat_id: i64) -> Result<()> {
        let reply = match self.coordinator.ensure_latest(true).await {
            Ok(ensured) => match ensured.outcome {
                ReloadOutcome::ServingStale { error } => format!("❌ Gagal reload: {error}"),
                ReloadOutcome::Reloaded { .. } | ReloadOutcome::Unchanged => RELOAD_OK.to_string(),
            },
            Err(e) => format!("❌ Gagal reload: {e}"),
        };
        transport.send_message(chat_id, &reply).await
    }

    pub async fn handle_debug(&self, transport: &dyn ChatTransport, chat_id: i64) -> Result<()> {
        let report = self.debug_report();
        transport
            .send_message(chat_id, &format!("```\n{report}```"))
            .await
    }

    /// Paths, signatures and readiness. Reads metadata only.
    pub fn debug_report(&self) -> String {
        let tracker = self.coordinator.tracker();
        let diag = self.coordinator.diagnostics();
        let db_file = tracker.index_dir().join(INDEX_DB_FILE);
        format!(
            "INDEX_DIR: {} (exists={})\n\
             INDEX_DB: {} (exists={})\n\
             PROCESSED_FILE: {} (exists={})\n\
             VERSION_FILE: {} (exists={})\n\
             SIG_NS: {}\n\
             LAST_SIG_NS: {}\n\
             PIPELINE_READY: {}\n\
             RELOADS: {}\n\
             ACTIVE_CHATS: {}\n",
            tracker.index_dir().display(),
            tracker.index_dir().exists(),
            db_file.display(),
            db_file.exists(),
            tracker.processed_file().display(),
            tracker.processed_file().exists(),
            tracker.version_file().display(),
            tracker.version_file().exists(),
            diag.current_signature,
            diag.last_applied_signature,
            diag.pipeline_ready,
            diag.reloads,
            self.conversations.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::error::{ChatLogError, ReloadError};
    use crate::index::{IndexEntry, IndexHandle};
    use crate::llm::CompletionClient;
    use crate::pipeline::PipelineFactory;
    use crate::prompt::PromptTemplate;
    use crate::signature::SignatureTracker;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    /// Replies with a scripted answer and records what it was asked.
    struct ScriptedLlm {
        answer: Mutex<Result<String, String>>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionClient for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answer
                .lock()
                .unwrap()
                .clone()
                .map_err(|e| anyhow::anyhow!(e))
        }
    }

    struct Factory {
        llm: Arc<ScriptedLlm>,
        fail: AtomicBool,
        builds: AtomicUsize,
    }

    #[async_trait]
    impl PipelineFactory<QueryPipeline> for Factory {
        async fn build(&self) -> Result<QueryPipeline, ReloadError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ReloadError::IndexUnavailable {
                    path: PathBuf::from("index_db"),
                });
            }
            let handle = IndexHandle::from_entries(
                vec![IndexEntry {
                    text: "Jeep Bromo Rp 350.000".into(),
                    metadata: serde_json::Value::Null,
                    vector: vec![1.0],
                }],
                Arc::new(UnitEmbedder),
            );
            Ok(QueryPipeline::new(
                handle.as_retriever(10),
                PromptTemplate::new("{context}||{question}"),
                self.llm.clone(),
                1,
            ))
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(i64, String)>>,
        typing: AtomicUsize,
        fail_typing: bool,
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_typing(&self, _chat_id: i64) -> Result<()> {
            self.typing.fetch_add(1, Ordering::SeqCst);
            if self.fail_typing {
                anyhow::bail!("typing unavailable");
            }
            Ok(())
        }
        async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    impl RecordingTransport {
        fn last(&self) -> String {
            self.sent.lock().unwrap().last().unwrap().1.clone()
        }
    }

    #[derive(Default)]
    struct MemoryLog {
        records: Mutex<Vec<ChatLogRecord>>,
        broken: bool,
    }

    #[async_trait]
    impl ChatLogSink for MemoryLog {
        async fn append_record(&self, record: &ChatLogRecord) -> Result<(), ChatLogError> {
            if self.broken {
                return Err(ChatLogError(sqlx::Error::PoolClosed));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct Harness {
        _tmp: TempDir,
        llm: Arc<ScriptedLlm>,
        factory: Arc<Factory>,
        log: Arc<MemoryLog>,
        handler: ChatHandler,
    }

    fn harness(answer: Result<&str, &str>, log: MemoryLog) -> Harness {
        let tmp = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLlm {
            answer: Mutex::new(answer.map(str::to_string).map_err(str::to_string)),
            prompts: Mutex::new(Vec::new()),
        });
        let factory = Arc::new(Factory {
            llm: llm.clone(),
            fail: AtomicBool::new(false),
            builds: AtomicUsize::new(0),
        });
        let tracker = SignatureTracker::new(
            tmp.path().join(".dataset_version"),
            tmp.path().join("processed_files.json"),
            tmp.path().join("index_db"),
        );
        let coordinator = Arc::new(ReloadCoordinator::new(
            tracker,
            factory.clone() as Arc<dyn PipelineFactory<QueryPipeline>>,
            Duration::from_secs(5),
        ));
        let log = Arc::new(log);
        let handler = ChatHandler::new(
            coordinator,
            ConversationStore::new(10, Duration::from_secs(3600)),
            log.clone() as Arc<dyn ChatLogSink>,
        );
        Harness {
            _tmp: tmp,
            llm,
            factory,
            log,
            handler,
        }
    }

    #[tokio::test]
    async fn test_answer_flow() {
        let h = harness(Ok("**Jeep Bromo**<br>Harga Rp 350.000\n\n\nper orang"), MemoryLog::default());
        let transport = RecordingTransport::default();

        let status = h.handler.handle_message(&transport, 7, "harga jeep?").await.unwrap();
        assert_eq!(status, AnswerStatus::Answered);
        assert_eq!(transport.typing.load(Ordering::SeqCst), 1);
        assert_eq!(transport.last(), "Jeep Bromo\nHarga Rp 350.000\nper orang");

        // Log keeps the raw answer
        let records = h.log.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].question, "harga jeep?");
        assert_eq!(records[0].answer, "**Jeep Bromo**<br>Harga Rp 350.000\n\n\nper orang");
        assert_eq!(records[0].requester_id, "7");

        // Transcript keeps the formatted answer
        assert_eq!(
            h.handler.conversations().get(7),
            "\nPengguna: harga jeep?\nBot: Jeep Bromo\nHarga Rp 350.000\nper orang"
        );
    }

    #[tokio::test]
    async fn test_prior_transcript_reaches_pipeline() {
        let h = harness(Ok("Rp 700.000"), MemoryLog::default());
        let transport = RecordingTransport::default();
        h.handler.handle_message(&transport, 1, "harga jeep?").await.unwrap();
        h.handler.handle_message(&transport, 1, "kalau 2 orang?").await.unwrap();

        let prompts = h.llm.prompts.lock().unwrap();
        assert_eq!(
            prompts[1],
            "Jeep Bromo Rp 350.000||\nPengguna: harga jeep?\nBot: Rp 700.000\n\nPengguna: kalau 2 orang?"
        );
        assert_eq!(h.factory.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completion_failure_apologises_and_keeps_state() {
        let h = harness(Err("503 upstream"), MemoryLog::default());
        let transport = RecordingTransport::default();

        let status = h.handler.handle_message(&transport, 3, "halo").await.unwrap();
        assert_eq!(status, AnswerStatus::Fallback);
        assert_eq!(transport.last(), APOLOGY);
        assert_eq!(h.handler.conversations().get(3), "");

        let records = h.log.records.lock().unwrap();
        assert_eq!(records[0].status, AnswerStatus::Fallback);
        assert!(records[0].answer.starts_with("ERROR: "));
        assert!(records[0].answer.contains("503 upstream"));
    }

    #[tokio::test]
    async fn test_no_pipeline_apologises() {
        let h = harness(Ok("x"), MemoryLog::default());
        h.factory.fail.store(true, Ordering::SeqCst);
        let transport = RecordingTransport::default();

        let status = h.handler.handle_message(&transport, 3, "halo").await.unwrap();
        assert_eq!(status, AnswerStatus::Fallback);
        assert_eq!(transport.last(), APOLOGY);
        let records = h.log.records.lock().unwrap();
        assert!(records[0].answer.contains("index store not found"));
    }

    #[tokio::test]
    async fn test_log_failure_does_not_block_reply() {
        let h = harness(
            Ok("Paket tersedia"),
            MemoryLog {
                broken: true,
                ..Default::default()
            },
        );
        let transport = RecordingTransport {
            fail_typing: true,
            ..Default::default()
        };

        let status = h.handler.handle_message(&transport, 9, "paket?").await.unwrap();
        assert_eq!(status, AnswerStatus::Answered);
        assert_eq!(transport.last(), "Paket tersedia");
        assert!(h.handler.conversations().get(9).contains("Bot: Paket tersedia"));
    }

    #[tokio::test]
    async fn test_blank_answer_records_apology_in_transcript() {
        let h = harness(Ok("**** <br> "), MemoryLog::default());
        let transport = RecordingTransport::default();

        h.handler.handle_message(&transport, 4, "halo").await.unwrap();
        assert_eq!(transport.last(), APOLOGY);
        assert_eq!(
            h.handler.conversations().get(4),
            format!("\nPengguna: halo\nBot: {APOLOGY}")
        );
    }

    #[tokio::test]
    async fn test_fallback_answer_is_classified() {
        let h = harness(
            Ok("Maaf, saya tidak menemukan informasi terkait di dokumen ini."),
            MemoryLog::default(),
        );
        let transport = RecordingTransport::default();
        let status = h.handler.handle_message(&transport, 2, "visa?").await.unwrap();
        assert_eq!(status, AnswerStatus::Fallback);
        // Still a normal exchange: transcript updated
        assert!(h.handler.conversations().get(2).contains("Pengguna: visa?"));
    }

    #[tokio::test]
    async fn test_reload_command_reports() {
        let h = harness(Ok("x"), MemoryLog::default());
        let transport = RecordingTransport::default();

        h.handler.dispatch(&transport, 1, "/reload").await.unwrap();
        assert_eq!(transport.last(), RELOAD_OK);
        h.handler.dispatch(&transport, 1, "/reload@TravelBot").await.unwrap();
        assert_eq!(h.factory.builds.load(Ordering::SeqCst), 2);

        h.factory.fail.store(true, Ordering::SeqCst);
        h.handler.dispatch(&transport, 1, "/reload").await.unwrap();
        assert!(transport.last().starts_with("❌ Gagal reload:"));
        // Still serving the old pipeline
        assert!(h.handler.coordinator().current().is_some());
    }

    #[tokio::test]
    async fn test_debug_has_no_side_effects() {
        let h = harness(Ok("x"), MemoryLog::default());
        let transport = RecordingTransport::default();

        h.handler.dispatch(&transport, 1, "/debug").await.unwrap();
        let report = transport.last();
        assert!(report.starts_with("```"));
        assert!(report.contains("PIPELINE_READY: false"));
        assert!(report.contains("SIG_NS: 0"));
        assert_eq!(h.factory.builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_routes_start_and_ignores_unknown() {
        let h = harness(Ok("x"), MemoryLog::default());
        let transport = RecordingTransport::default();

        h.handler.dispatch(&transport, 1, "/start").await.unwrap();
        assert_eq!(transport.last(), GREETING);
        h.handler.dispatch(&transport, 1, "/unknown").await.unwrap();
        h.handler.dispatch(&transport, 1, "   ").await.unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert!(h.log.records.lock().unwrap().is_empty());
    }
}
