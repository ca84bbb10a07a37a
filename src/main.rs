//! # Travel RAG Bot CLI (`travelbot`)
//!
//! The `travelbot` binary runs the Telegram bot and the dataset API, and
//! manages the document index from the command line.
//!
//! ## Usage
//!
//! ```bash
//! travelbot --config ./config/travelbot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `travelbot init` | Create the SQLite index and chat log schemas |
//! | `travelbot build` | Index new files from the data directory |
//! | `travelbot delete <file>` | Remove a file and its chunks from the index |
//! | `travelbot status` | Dataset, index and chat log overview |
//! | `travelbot ask "<question>"` | Answer one question through the pipeline |
//! | `travelbot serve api` | Start the dataset management HTTP API |
//! | `travelbot serve bot` | Start the Telegram bot |
//!
//! Logging goes to stderr and is controlled by `TRAVELBOT_LOG`
//! (e.g. `TRAVELBOT_LOG=travel_rag_bot=debug`); `-v` raises the default
//! level to `debug`, `-vv` to `trace`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use travel_rag_bot::classify::classify;
use travel_rag_bot::config::{self, Config};
use travel_rag_bot::conversation::build_input;
use travel_rag_bot::embedding;
use travel_rag_bot::format::format_answer;
use travel_rag_bot::ingest;
use travel_rag_bot::lockfile::BuildLock;
use travel_rag_bot::migrate;
use travel_rag_bot::pipeline::{IndexPipelineFactory, PipelineFactory, QueryPipeline};
use travel_rag_bot::reload::ReloadCoordinator;
use travel_rag_bot::server;
use travel_rag_bot::signature::SignatureTracker;
use travel_rag_bot::stats;
use travel_rag_bot::telegram;

/// Travel RAG Bot — a Telegram travel assistant answering from a local,
/// hot-reloading document index.
#[derive(Parser)]
#[command(
    name = "travelbot",
    about = "Travel RAG Bot — Telegram travel assistant over a hot-reloading document index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/travelbot.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index and chat log schemas.
    ///
    /// Idempotent; running it twice is safe.
    Init,

    /// Index every file in the data directory not yet in the manifest.
    ///
    /// Takes the build lock shared with the dataset API, so a build never
    /// overlaps an upload. A successful build that adds files bumps the
    /// dataset version, which a running bot picks up on its next message.
    Build,

    /// Delete a file from the data directory and its chunks from the index.
    Delete {
        /// File name inside the data directory.
        filename: String,
    },

    /// Show dataset, index and chat log status.
    Status,

    /// Answer a single question and print the formatted reply.
    Ask {
        /// The question, in any language the prompt supports.
        question: String,
    },

    /// Start a long-running service.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// Dataset management HTTP API (upload, list, delete).
    Api,
    /// Telegram bot (long polling).
    Bot,
}

fn init_tracing(verbose: u8) {
    let filter = if let Ok(env) = std::env::var("TRAVELBOT_LOG") {
        EnvFilter::new(env)
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Index and chat log initialized successfully.");
        }
        Commands::Build => run_build(&cfg).await?,
        Commands::Delete { filename } => run_delete(&cfg, &filename).await?,
        Commands::Status => stats::run_status(&cfg).await?,
        Commands::Ask { question } => run_ask(&cfg, &question).await?,
        Commands::Serve { service } => match service {
            ServeService::Api => server::run_server(&cfg).await?,
            ServeService::Bot => telegram::run_bot(&cfg).await?,
        },
    }

    Ok(())
}

async fn run_build(cfg: &Config) -> anyhow::Result<()> {
    let _lock = BuildLock::acquire(&cfg.paths.lock_file, cfg.api.build_lock_timeout()).await?;
    let embedder = embedding::create_provider(&cfg.embedding)?;
    let report = ingest::run_build(cfg, embedder.as_ref()).await?;

    println!(
        "Build complete: {} added, {} already processed, {} chunks written",
        report.added.len(),
        report.already_processed,
        report.chunks_written
    );
    for name in &report.added {
        println!("  + {}", name);
    }
    for (name, reason) in &report.skipped {
        println!("  ! {} ({})", name, reason);
    }
    Ok(())
}

async fn run_delete(cfg: &Config, filename: &str) -> anyhow::Result<()> {
    let _lock = BuildLock::acquire(&cfg.paths.lock_file, cfg.api.build_lock_timeout()).await?;
    let report = ingest::delete_document(cfg, filename)
        .await?
        .with_context(|| format!("No dataset file named '{}'", filename))?;

    println!(
        "Deleted {}: file removed: {}, chunks removed: {}",
        report.filename, report.file_removed, report.chunks_removed
    );
    Ok(())
}

async fn run_ask(cfg: &Config, question: &str) -> anyhow::Result<()> {
    let embedder = embedding::create_provider(&cfg.embedding)?;
    let factory = IndexPipelineFactory::from_config(cfg, embedder)?;
    let coordinator = ReloadCoordinator::new(
        SignatureTracker::from_config(cfg),
        Arc::new(factory) as Arc<dyn PipelineFactory<QueryPipeline>>,
        cfg.reload.lock_timeout(),
    );

    let ensured = coordinator
        .ensure_latest(false)
        .await
        .context("No usable index; run `travelbot build` first")?;
    let raw = ensured.pipeline.invoke(&build_input("", question)).await?;
    let formatted = format_answer(&raw);

    println!("{}", formatted);
    tracing::info!(status = ?classify(&raw), "answered");
    Ok(())
}
