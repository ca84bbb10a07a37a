//! Core data types shared by the dataset builder, the index and the chat path.

use serde::{Deserialize, Serialize};

/// A piece of a source document, ready to embed and store.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    /// File name of the source document inside the data directory.
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    pub metadata_json: String,
    pub hash: String,
}

/// A document returned by the retriever, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub text: String,
    pub metadata: serde_json::Value,
    pub score: f32,
}

/// Outcome of [`classify`](crate::classify::classify) for analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerStatus {
    /// The model could not answer from the documents.
    Fallback,
    Answered,
}

impl AnswerStatus {
    /// Integer flag stored in the chat log (`0` fallback, `1` answered).
    pub fn flag(self) -> i64 {
        match self {
            AnswerStatus::Fallback => 0,
            AnswerStatus::Answered => 1,
        }
    }
}

/// One row of the durable chat log. Written once per handled message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatLogRecord {
    pub question: String,
    pub answer: String,
    pub requester_id: String,
    pub status: AnswerStatus,
}
