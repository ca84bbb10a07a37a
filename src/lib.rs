//! # Travel RAG Bot
//!
//! A Telegram assistant that answers travel questions (tour packages,
//! prices, schedules) from a local document collection.
//!
//! PDF and text files dropped into the data directory are chunked, embedded
//! and stored in a SQLite index. Every incoming message is answered by
//! retrieving the closest chunks and asking a hosted LLM to respond from
//! them. When the dataset changes on disk, through the upload API or a CLI
//! build, the bot notices the newer files and swaps in a fresh pipeline
//! before the next answer, without a restart.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────────┐
//! │ Dataset API  │──▶│    Build    │──▶│ SQLite index  │
//! │  / CLI       │   │ chunk+embed │   │ + version file│
//! └──────────────┘   └─────────────┘   └──────┬────────┘
//!                                             │ signature
//!                                             ▼
//! ┌──────────────┐   ┌─────────────┐   ┌───────────────┐
//! │   Telegram   │──▶│ ChatHandler │──▶│    Reload     │
//! │ long polling │   │ state + log │   │  Coordinator  │
//! └──────────────┘   └─────────────┘   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed reload / chat / chat-log errors |
//! | [`models`] | Core data types |
//! | [`db`] | SQLite connections |
//! | [`migrate`] | Schema migrations |
//! | [`extract`] | PDF and text extraction |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`manifest`] | Processed-files manifest |
//! | [`lockfile`] | Cross-process build lock |
//! | [`ingest`] | Dataset build and delete |
//! | [`index`] | Read-only index snapshots and retrieval |
//! | [`llm`] | Completion client |
//! | [`prompt`] | Prompt template |
//! | [`pipeline`] | Retrieve → prompt → complete |
//! | [`signature`] | Dataset freshness signature |
//! | [`reload`] | Hot reload coordinator |
//! | [`conversation`] | Per-chat transcripts |
//! | [`format`] | Answer formatting for Telegram |
//! | [`classify`] | Answered / fallback classification |
//! | [`chatlog`] | Question/answer log sink |
//! | [`chat`] | Message and command handling |
//! | [`telegram`] | Telegram Bot API transport |
//! | [`server`] | Dataset management HTTP API |
//! | [`stats`] | `status` command |

pub mod chat;
pub mod chatlog;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod format;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod lockfile;
pub mod manifest;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod reload;
pub mod server;
pub mod signature;
pub mod stats;
pub mod telegram;
