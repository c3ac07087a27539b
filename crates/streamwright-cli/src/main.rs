//! Streamwright - replay agent event streams against a workspace
//!
//! Feeds a recorded engine event stream (one JSON event per line) through the
//! response pipeline, applying streamed edits to the files on disk and
//! printing every sink update as a JSON line.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;

use streamwright_core::events::{parse_event, AgentEvent};
use streamwright_core::stream::ChannelSink;
use streamwright_core::{paths, PipelineConfig, ResponsePipeline, StreamKey, WorkspaceDocuments};

/// Streamwright - response routing and streamed edits
#[derive(Parser)]
#[command(name = "streamwright")]
#[command(about = "Replay agent event streams against a workspace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ~/.streamwright/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded event stream
    Replay {
        /// File with one engine event per line
        events: PathBuf,

        /// Workspace root that relative paths resolve against
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load_from_path(path),
        None => PipelineConfig::load(),
    }
}

/// Every (session, exchange) pair the recording addresses
async fn exchange_keys(events: &Path) -> Result<BTreeSet<StreamKey>> {
    let content = tokio::fs::read_to_string(events)
        .await
        .with_context(|| format!("Failed to read {}", events.display()))?;
    Ok(content
        .lines()
        .filter_map(|line| match parse_event(line) {
            Ok(AgentEvent::Ui(ui)) => Some(ui.key()),
            _ => None,
        })
        .collect())
}

async fn replay(config: PipelineConfig, events: &Path, workspace: PathBuf) -> Result<()> {
    let host = Arc::new(WorkspaceDocuments::new(workspace.clone()));
    let pipeline = ResponsePipeline::new(host, config);
    tracing::info!(
        "Replaying {} against {}",
        events.display(),
        workspace.display()
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    for key in exchange_keys(events).await? {
        let sink = Arc::new(ChannelSink::new(key.clone(), tx.clone()));
        pipeline.register_sink(key, sink)?;
    }
    drop(tx);

    let shutdown = pipeline.shutdown_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling replay");
            shutdown.cancel();
        }
    });

    let file = tokio::fs::File::open(events)
        .await
        .with_context(|| format!("Failed to open {}", events.display()))?;
    let lines = LinesStream::new(BufReader::new(file).lines())
        .filter_map(|line| futures::future::ready(line.ok()));
    let stats = pipeline.consume(lines).await;

    // Sinks still registered hold senders; only drain what is queued
    while let Ok(message) = rx.try_recv() {
        println!("{}", serde_json::to_string(&message)?);
    }
    eprintln!(
        "{} delivered, {} ignored, {} dropped, {} malformed{}",
        stats.delivered,
        stats.ignored,
        stats.dropped,
        stats.malformed,
        if stats.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log to a file so stdout carries only sink updates
    let log_dir = paths::logs_dir();
    std::fs::create_dir_all(&log_dir).ok();

    #[cfg(unix)]
    let null_device = "/dev/null";
    #[cfg(windows)]
    let null_device = "NUL";

    let log_file = std::fs::File::create(log_dir.join(streamwright_core::constants::paths::LOG_FILE_NAME))
        .or_else(|_| std::fs::File::create(null_device))
        .context("Failed to open a log destination")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay { events, workspace } => {
            let workspace = match workspace {
                Some(dir) => dir,
                None => std::env::current_dir().context("Failed to get current directory")?,
            };
            replay(config, &events, workspace).await?;
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
