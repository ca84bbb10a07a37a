//! The query pipeline: retrieve → render prompt → complete.
//!
//! A [`QueryPipeline`] is built once from an index snapshot and never
//! mutated. The reload coordinator replaces it wholesale through a
//! [`PipelineFactory`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::ReloadError;
use crate::index::{IndexStore, Retriever};
use crate::llm::{CompletionClient, OpenAiCompatClient};
use crate::prompt::{format_context, PromptTemplate};

pub struct QueryPipeline {
    retriever: Retriever,
    prompt: PromptTemplate,
    llm: Arc<dyn CompletionClient>,
    entries: usize,
}

impl QueryPipeline {
    pub fn new(
        retriever: Retriever,
        prompt: PromptTemplate,
        llm: Arc<dyn CompletionClient>,
        entries: usize,
    ) -> Self {
        Self {
            retriever,
            prompt,
            llm,
            entries,
        }
    }

    /// Number of chunks in the snapshot this pipeline searches.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Answer `input`. The same text is used as the retrieval query and as
    /// the question, so prior conversation lines steer retrieval too.
    pub async fn invoke(&self, input: &str) -> anyhow::Result<String> {
        let docs = self.retriever.search(input).await?;
        tracing::debug!(retrieved = docs.len(), "context retrieved");
        let rendered = self.prompt.render(&format_context(&docs), input);
        let answer = self.llm.complete(&rendered).await?;
        Ok(answer.trim().to_string())
    }
}

/// Builds a fresh pipeline value for the reload coordinator.
#[async_trait]
pub trait PipelineFactory<P>: Send + Sync {
    async fn build(&self) -> Result<P, ReloadError>;
}

/// Opens the on-disk index and binds it to the shared embedder, prompt and
/// completion client.
pub struct IndexPipelineFactory {
    index_dir: PathBuf,
    top_k: usize,
    embedder: Arc<dyn EmbeddingProvider>,
    prompt: PromptTemplate,
    llm: Arc<dyn CompletionClient>,
}

impl IndexPipelineFactory {
    pub fn new(
        index_dir: PathBuf,
        top_k: usize,
        embedder: Arc<dyn EmbeddingProvider>,
        prompt: PromptTemplate,
        llm: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            index_dir,
            top_k,
            embedder,
            prompt,
            llm,
        }
    }

    /// Factory for the configured index directory and LLM endpoint. Fails if
    /// the LLM API key is not set.
    pub fn from_config(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> anyhow::Result<Self> {
        let llm = OpenAiCompatClient::new(&config.llm)?;
        Ok(Self::new(
            config.paths.index_dir.clone(),
            config.retrieval.top_k,
            embedder,
            PromptTemplate::travel(),
            Arc::new(llm),
        ))
    }

    pub fn index_dir(&self) -> &std::path::Path {
        &self.index_dir
    }
}

#[async_trait]
impl PipelineFactory<QueryPipeline> for IndexPipelineFactory {
    async fn build(&self) -> Result<QueryPipeline, ReloadError> {
        let handle = IndexStore::open(&self.index_dir, self.embedder.clone()).await?;
        let entries = handle.len();
        Ok(QueryPipeline::new(
            handle.as_retriever(self.top_k),
            self.prompt.clone(),
            self.llm.clone(),
            entries,
        ))
    }
}
