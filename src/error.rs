//! Typed errors for the index reload path and the per-message chat path.
//!
//! Everything else in the crate reports through `anyhow`; these types exist
//! where callers branch on the kind of failure (stale-serving, "busy, try
//! again", apology reply).

use std::path::PathBuf;
use std::time::Duration;

/// Failure while bringing the active query pipeline up to date.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    /// The index directory is missing or holds no files yet.
    #[error("index store not found or empty at {}; run `travelbot build` first", path.display())]
    IndexUnavailable { path: PathBuf },

    /// Opening the index or binding retriever/prompt/LLM failed.
    #[error("failed to construct query pipeline: {0:#}")]
    PipelineConstruction(#[source] anyhow::Error),

    /// Another reload held the exclusive section for longer than the bound.
    #[error("reload already in progress (waited {waited:?}); try again")]
    ReloadBusy { waited: Duration },
}

impl ReloadError {
    /// Whether the caller may simply retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReloadError::ReloadBusy { .. })
    }
}

impl From<anyhow::Error> for ReloadError {
    fn from(err: anyhow::Error) -> Self {
        ReloadError::PipelineConstruction(err)
    }
}

/// Failure while answering a single chat message.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Reload(#[from] ReloadError),

    /// Retrieval or the remote completion call failed.
    #[error("completion failed: {0:#}")]
    CompletionFailure(#[source] anyhow::Error),
}

/// The durable chat log could not be written.
#[derive(Debug, thiserror::Error)]
#[error("chat log append failed: {0}")]
pub struct ChatLogError(#[from] pub sqlx::Error);
