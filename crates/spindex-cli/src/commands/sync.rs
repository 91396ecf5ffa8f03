//! Sync command - Walk the tenant into an index or a JSON-lines file
//!
//! Provides the `spindex sync` CLI command which:
//! 1. Loads and validates the configuration
//! 2. Reads the cursor file for incremental runs
//! 3. Opens the destination (bulk index or JSON-lines file)
//! 4. Streams the walker's emissions into it
//! 5. Rewrites the cursor file, but only after a clean, uncancelled run

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use spindex_core::config::Config;
use spindex_core::domain::SyncCursor;
use spindex_core::ports::{Emission, IDocumentSink};
use spindex_graph::wait::CancellableWait;
use spindex_sync::connector::SharepointConnector;
use spindex_sync::sink::{BulkIndexer, IndexStats, JsonLinesSink};
use spindex_sync::SyncError;
use tokio::fs::File;
use tokio::io::BufWriter;
use tracing::{info, warn};

use super::{cancel_on_shutdown, load_valid_config};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Resume drives from the cursor file instead of listing everything
    #[arg(long)]
    pub incremental: bool,

    /// Cursor file read by incremental runs and rewritten after clean runs
    #[arg(long, value_name = "FILE")]
    pub cursor: Option<PathBuf>,

    /// Write documents as JSON lines to this file
    #[arg(
        long,
        value_name = "FILE",
        conflicts_with = "index",
        required_unless_present = "index"
    )]
    pub output: Option<PathBuf>,

    /// Send documents to the configured index host
    #[arg(long)]
    pub index: bool,

    /// Wait for the index host to answer before walking
    #[arg(long, requires = "index")]
    pub wait_for_index: bool,
}

/// Where the emissions of one run go
enum Destination {
    Index(BulkIndexer),
    File(JsonLinesSink<BufWriter<File>>),
}

impl Destination {
    fn sink(&mut self) -> &mut dyn IDocumentSink {
        match self {
            Self::Index(indexer) => indexer,
            Self::File(sink) => sink,
        }
    }

    fn stats(&self) -> IndexStats {
        match self {
            Self::Index(indexer) => indexer.stats(),
            Self::File(sink) => sink.stats(),
        }
    }
}

impl SyncCommand {
    /// Execute the sync command
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_valid_config(config_path)?;
        info!(config_path = %config_path.display(), "Loaded configuration");

        let wait = CancellableWait::new();
        cancel_on_shutdown(wait.clone());

        let previous = match (&self.cursor, self.incremental) {
            (Some(path), true) => read_cursor(path).await?,
            _ => None,
        };

        let mut destination = self.open_destination(&config, wait.clone()).await?;
        let connector = SharepointConnector::new(config, wait.clone())?;
        let mut walker = connector.walker()?;

        let started = Instant::now();
        let outcome = {
            let stream = if self.incremental {
                walker.incremental_sync(previous)?.boxed()
            } else {
                walker.full_sync().boxed()
            };
            pump(stream, destination.sink()).await
        };
        let emitted = outcome?;
        let stats = destination.stats();
        let cursor = walker.into_cursor();
        let mode = if self.incremental { "incremental" } else { "full" };

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "mode": mode,
                "emitted": emitted,
                "indexed": stats.indexed,
                "deleted": stats.deleted,
                "with_content": stats.with_content,
                "content_failures": stats.content_failures,
                "rejected": stats.rejected,
                "drives": cursor.len(),
                "cancelled": wait.is_cancelled(),
                "elapsed_secs": started.elapsed().as_secs(),
            }));
        } else {
            formatter.success(&format!("Sync ({mode}) finished"));
            formatter.summary(&[
                ("Emitted", emitted.to_string()),
                ("Indexed", stats.indexed.to_string()),
                ("Deleted", stats.deleted.to_string()),
                ("With content", stats.with_content.to_string()),
                ("Content failures", stats.content_failures.to_string()),
                ("Rejected", stats.rejected.to_string()),
                ("Drives in cursor", cursor.len().to_string()),
                ("Elapsed", format!("{}s", started.elapsed().as_secs())),
            ]);
        }

        if wait.is_cancelled() {
            anyhow::bail!("Sync interrupted; cursor file left unchanged");
        }

        match &self.cursor {
            Some(path) => {
                write_cursor(path, &cursor).await?;
                info!(path = %path.display(), drives = cursor.len(), "Saved cursor");
            }
            None => warn!("No --cursor given; the next incremental run has nothing to resume from"),
        }
        Ok(())
    }

    async fn open_destination(&self, config: &Config, wait: CancellableWait) -> Result<Destination> {
        let fetch_content = config.sync.fetch_content;

        if self.index {
            let indexer = BulkIndexer::new(&config.indexer, fetch_content, wait)?;
            if self.wait_for_index && !indexer.wait_for_host().await {
                anyhow::bail!("Index host {} did not become available", config.indexer.host);
            }
            return Ok(Destination::Index(indexer));
        }

        let path = self
            .output
            .as_deref()
            .context("Either --output or --index is required")?;
        let file = File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Destination::File(JsonLinesSink::new(
            BufWriter::new(file),
            fetch_content,
        )))
    }
}

/// Hands every emission to `sink`, flushing whatever was accepted
async fn pump(
    mut stream: BoxStream<'_, Result<Emission, SyncError>>,
    sink: &mut dyn IDocumentSink,
) -> Result<u64> {
    let mut emitted = 0u64;
    let walked = async {
        while let Some(emission) = stream.next().await {
            sink.accept(emission?).await?;
            emitted += 1;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    sink.flush().await.context("Failed to flush sink")?;
    walked?;
    Ok(emitted)
}

/// Reads a persisted cursor; a missing or blank file means no cursor
async fn read_cursor(path: &Path) -> Result<Option<SyncCursor>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read cursor {}", path.display()))
        }
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let value: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("Cursor file {} is not JSON", path.display()))?;
    Ok(SyncCursor::from_value(value)?)
}

/// Replaces the cursor file through a sibling temporary file
async fn write_cursor(path: &Path, cursor: &SyncCursor) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(&cursor.to_value())?;
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace cursor {}", path.display()))?;
    Ok(())
}
