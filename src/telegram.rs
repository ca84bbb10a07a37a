//! Telegram Bot API transport and the bot's main loop.
//!
//! Updates are fetched with `getUpdates` long polling; every text message is
//! handed to the [`ChatHandler`] on its own task so a slow completion for one
//! chat never delays another. Replies go out as Markdown and are re-sent as
//! plain text if Telegram refuses the markup, since model output does not
//! always balance its `*` and `_`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::{ChatHandler, ChatTransport};
use crate::chatlog;
use crate::config::{require_env, Config};
use crate::conversation::ConversationStore;
use crate::embedding;
use crate::pipeline::{IndexPipelineFactory, PipelineFactory, QueryPipeline};
use crate::reload::{ReloadCoordinator, ReloadOutcome};
use crate::signature::SignatureTracker;

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

pub struct TelegramClient {
    base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str, poll_timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            // Must outlast the server-side long-poll wait
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .build()?;
        Ok(Self {
            base: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            poll_timeout_secs,
            client,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.base, method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Telegram {} request failed", method))?;

        let parsed: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Telegram {} returned an unreadable response", method))?;
        if !parsed.ok {
            bail!(
                "Telegram {} failed: {}",
                method,
                parsed.description.unwrap_or_default()
            );
        }
        parsed
            .result
            .ok_or_else(|| anyhow::anyhow!("Telegram {} returned no result", method))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.call::<bool>(
            "sendChatAction",
            &serde_json::json!({ "chat_id": chat_id, "action": "typing" }),
        )
        .await
        .map(|_| ())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let markdown = self
            .call::<serde_json::Value>(
                "sendMessage",
                &serde_json::json!({ "chat_id": chat_id, "text": text, "parse_mode": "Markdown" }),
            )
            .await;
        match markdown {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("can't parse entities") => {
                tracing::debug!(chat_id, "markdown rejected, resending as plain text");
                self.call::<serde_json::Value>(
                    "sendMessage",
                    &serde_json::json!({ "chat_id": chat_id, "text": text }),
                )
                .await
                .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }
}

/// Run the Telegram bot until Ctrl-C.
///
/// The index must load at startup: with no pipeline to serve from, the bot
/// refuses to start.
pub async fn run_bot(config: &Config) -> Result<()> {
    let token = require_env(&config.telegram.token_env)?;
    let embedder = embedding::create_provider(&config.embedding)?;
    let factory = IndexPipelineFactory::from_config(config, embedder)?;
    let coordinator = Arc::new(ReloadCoordinator::new(
        SignatureTracker::from_config(config),
        Arc::new(factory) as Arc<dyn PipelineFactory<QueryPipeline>>,
        config.reload.lock_timeout(),
    ));

    let ensured = coordinator
        .ensure_latest(false)
        .await
        .context("No usable index at startup; run `travelbot build` first")?;
    if let ReloadOutcome::Reloaded { signature } = ensured.outcome {
        tracing::info!(signature, entries = ensured.pipeline.entries(), "index loaded");
    }

    let sink = chatlog::open_sink(config).await?;
    let handler = Arc::new(ChatHandler::new(
        coordinator,
        ConversationStore::from_config(&config.conversation),
        sink,
    ));
    let client = Arc::new(TelegramClient::new(
        &config.telegram.api_url,
        &token,
        config.telegram.poll_timeout_secs,
    )?);

    tracing::info!(index_dir = %config.paths.index_dir.display(), "bot running");
    tokio::select! {
        result = poll_loop(client, handler) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}

async fn poll_loop(client: Arc<TelegramClient>, handler: Arc<ChatHandler>) -> Result<()> {
    let mut offset = 0i64;
    loop {
        let updates = match client.get_updates(offset).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "polling failed, retrying");
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(message) = update.message else {
                continue;
            };
            let Some(text) = message.text else {
                continue;
            };

            let client = client.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let chat_id = message.chat.id;
                if let Err(e) = handler.dispatch(client.as_ref(), chat_id, &text).await {
                    tracing::error!(chat_id, error = %e, "failed to reply");
                }
            });
        }
    }
}
