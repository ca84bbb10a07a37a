//! TOML configuration.
//!
//! Every section has defaults so a minimal file (or an empty one) yields a
//! working local setup. Secrets (Telegram token, LLM key, dataset API token)
//! are never stored in the file; each section names the environment variable
//! to read them from at the point of use.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub reload: ReloadConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub chatlog: ChatlogConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Filesystem layout shared by the bot, the dataset API and the CLI.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default = "default_processed_file")]
    pub processed_file: PathBuf,
    #[serde(default = "default_version_file")]
    pub version_file: PathBuf,
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            index_dir: default_index_dir(),
            processed_file: default_processed_file(),
            version_file: default_version_file(),
            lock_file: default_lock_file(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("./index_db")
}
fn default_processed_file() -> PathBuf {
    PathBuf::from("./processed_files.json")
}
fn default_version_file() -> PathBuf {
    PathBuf::from("./.dataset_version")
}
fn default_lock_file() -> PathBuf {
    PathBuf::from("./.build.lock")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Hosted completion endpoint. Any OpenAI-compatible chat completions API
/// works; the defaults target Groq.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            api_key_env: default_llm_key_env(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "llama-3.1-8b-instant".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_llm_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReloadConfig {
    /// Upper bound on waiting for another caller's index reload to finish.
    #[serde(default = "default_reload_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_reload_lock_timeout_secs(),
        }
    }
}

fn default_reload_lock_timeout_secs() -> u64 {
    60
}

impl ReloadConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Transcripts untouched for this long are dropped.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

fn default_max_lines() -> usize {
    10
}
fn default_idle_ttl_secs() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatlogConfig {
    #[serde(default = "default_chatlog_enabled")]
    pub enabled: bool,
    #[serde(default = "default_chatlog_path")]
    pub path: PathBuf,
}

impl Default for ChatlogConfig {
    fn default() -> Self {
        Self {
            enabled: default_chatlog_enabled(),
            path: default_chatlog_path(),
        }
    }
}

fn default_chatlog_enabled() -> bool {
    true
}
fn default_chatlog_path() -> PathBuf {
    PathBuf::from("./chatlog.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_token_env")]
    pub token_env: String,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token_env: default_telegram_token_env(),
            api_url: default_telegram_api_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_telegram_token_env() -> String {
    "TELEGRAM_TOKEN".to_string()
}
fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}
fn default_poll_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,
    #[serde(default = "default_api_token_env")]
    pub token_env: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_build_lock_timeout_secs")]
    pub build_lock_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
            token_env: default_api_token_env(),
            max_upload_bytes: default_max_upload_bytes(),
            build_lock_timeout_secs: default_build_lock_timeout_secs(),
        }
    }
}

fn default_api_bind() -> String {
    "0.0.0.0:8001".to_string()
}
fn default_api_token_env() -> String {
    "DATASET_API_TOKEN".to_string()
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_build_lock_timeout_secs() -> u64 {
    300
}

impl ApiConfig {
    pub fn build_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.build_lock_timeout_secs)
    }
}

/// Read a required secret from the environment.
pub fn require_env(var: &str) -> Result<String> {
    let value = std::env::var(var).unwrap_or_default();
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("{} environment variable not set", var);
    }
    Ok(value.to_string())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.conversation.max_lines == 0 {
        anyhow::bail!("conversation.max_lines must be > 0");
    }

    Ok(())
}
