//! Indexing sinks
//!
//! Two [`IDocumentSink`] implementations:
//!
//! - [`BulkIndexer`] batches emissions into NDJSON `_bulk` requests against an
//!   Elasticsearch-compatible host, retrying transient failures through
//!   [`RetryExecutor`]
//! - [`JsonLinesSink`] writes one `{"operation", "document"}` object per line
//!
//! Both invoke an emission's lazy content fetch when content fetching is on.
//! A failed fetch is logged and the document is forwarded without content.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use spindex_core::config::IndexerConfig;
use spindex_core::ports::{Emission, IDocumentSink, Operation};
use spindex_graph::retry::{RetryError, RetryExecutor};
use spindex_graph::wait::CancellableWait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::SyncError;

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Documents indexed or written
    pub indexed: u64,
    /// Deletions forwarded
    pub deleted: u64,
    /// Documents that carried downloaded content
    pub with_content: u64,
    /// Content fetches that failed
    pub content_failures: u64,
    /// Bulk items the index rejected
    pub rejected: u64,
}

// ============================================================================
// Rendering
// ============================================================================

/// An emission resolved into the document that leaves the process
struct Rendered {
    operation: Operation,
    id: String,
    document: Value,
}

async fn render(emission: Emission, fetch_content: bool, stats: &mut IndexStats) -> Rendered {
    let Emission {
        node,
        content,
        operation,
    } = emission;
    let mut document = node.to_document();

    if let (Operation::Index, true, Some(fetch)) = (operation, fetch_content, content) {
        match fetch.fetch(true).await {
            Ok(Some(content)) => {
                content.merge_into(&mut document);
                stats.with_content += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(id = node.id(), error = %e, "Content fetch failed, indexing metadata only");
                stats.content_failures += 1;
            }
        }
    }

    Rendered {
        operation,
        id: node.id().to_string(),
        document,
    }
}

// ============================================================================
// JsonLinesSink
// ============================================================================

/// Writes every emission as one JSON object per line
pub struct JsonLinesSink<W> {
    writer: W,
    fetch_content: bool,
    stats: IndexStats,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, fetch_content: bool) -> Self {
        Self {
            writer,
            fetch_content,
            stats: IndexStats::default(),
        }
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> IDocumentSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn accept(&mut self, emission: Emission) -> Result<()> {
        let rendered = render(emission, self.fetch_content, &mut self.stats).await;
        let line = match rendered.operation {
            Operation::Index => json!({"operation": "index", "document": rendered.document}),
            Operation::Delete => json!({"operation": "delete", "document": {"_id": rendered.id}}),
        };

        let mut bytes = serde_json::to_vec(&line)?;
        bytes.push(b'\n');
        self.writer
            .write_all(&bytes)
            .await
            .context("Failed to write document line")?;

        match rendered.operation {
            Operation::Index => self.stats.indexed += 1,
            Operation::Delete => self.stats.deleted += 1,
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await.context("Failed to flush output")
    }
}

// ============================================================================
// BulkIndexer
// ============================================================================

/// Batches emissions into `_bulk` requests
pub struct BulkIndexer {
    http: Client,
    host: String,
    index: String,
    api_key: Option<String>,
    bulk_size: usize,
    fetch_content: bool,
    retry: RetryExecutor,
    wait: CancellableWait,
    max_wait: Duration,
    initial_backoff: Duration,
    backoff_multiplier: u32,
    buffer: Vec<Rendered>,
    stats: IndexStats,
}

impl BulkIndexer {
    /// Creates an indexer from the `indexer` configuration section
    ///
    /// # Arguments
    /// * `fetch_content` - Whether lazy content fetches are invoked
    /// * `wait` - Cancellation shared with the walker; interrupts retries and
    ///   the availability wait
    pub fn new(config: &IndexerConfig, fetch_content: bool, wait: CancellableWait) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .context("Failed to build index HTTP client")?;

        let retry = RetryExecutor::new(
            config.max_retries,
            Duration::from_secs(config.retry_interval),
            config.retry_strategy.into(),
            wait.clone(),
        );

        Ok(Self {
            http,
            host: config.host.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            api_key: config.api_key.clone(),
            bulk_size: config.bulk_size.max(1),
            fetch_content,
            retry,
            wait,
            max_wait: Duration::from_secs(config.max_wait_duration),
            initial_backoff: Duration::from_secs(config.initial_backoff_duration),
            backoff_multiplier: config.backoff_multiplier.max(1),
            buffer: Vec::new(),
            stats: IndexStats::default(),
        })
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    /// Whether the host answers its root endpoint
    pub async fn ping(&self) -> bool {
        match self.request(Method::GET, &self.host).send().await {
            Ok(response) if response.status().is_success() => {
                let info: Value = response.json().await.unwrap_or_default();
                debug!(
                    host = %self.host,
                    version = info["version"]["number"].as_str().unwrap_or("unknown"),
                    "Connected to index host"
                );
                true
            }
            Ok(response) => {
                warn!(host = %self.host, status = response.status().as_u16(), "Index host returned an error");
                false
            }
            Err(e) => {
                warn!(host = %self.host, error = %e, "Could not connect to index host");
                false
            }
        }
    }

    /// Polls the host until it answers, backing off between attempts
    ///
    /// # Returns
    /// `false` when the maximum wait elapsed or the wait was cancelled
    pub async fn wait_for_host(&self) -> bool {
        let start = Instant::now();
        let mut backoff = self.initial_backoff;

        while start.elapsed() < self.max_wait {
            if self.wait.is_cancelled() {
                return false;
            }
            info!(
                host = %self.host,
                waited_secs = start.elapsed().as_secs(),
                "Waiting for index host"
            );
            if self.ping().await {
                return true;
            }
            if !self.wait.wait(backoff).await {
                return false;
            }
            backoff = backoff.saturating_mul(self.backoff_multiplier);
        }
        false
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.api_key {
            Some(key) => request.header(AUTHORIZATION, format!("ApiKey {key}")),
            None => request,
        }
    }

    /// Sends the buffered actions as one `_bulk` request
    async fn send_bulk(&mut self) -> Result<()> {
        let actions = std::mem::take(&mut self.buffer);
        if actions.is_empty() {
            return Ok(());
        }
        let body = bulk_body(&self.index, &actions)?;
        let url = format!("{}/_bulk", self.host);

        let response = self
            .retry
            .execute(|| {
                let request = self
                    .request(Method::POST, &url)
                    .header(CONTENT_TYPE, "application/x-ndjson")
                    .body(body.clone());
                async move {
                    let response = request.send().await?.error_for_status()?;
                    Ok::<Value, reqwest::Error>(response.json().await?)
                }
            })
            .await
            .map_err(|e| match e {
                RetryError::Interrupted => SyncError::Sink("Bulk request interrupted".to_string()),
                RetryError::Failed(e) => SyncError::Sink(format!("Bulk request to {url} failed: {e}")),
            })?;

        let rejected = rejected_items(&response);
        for (_, error) in rejected.iter().take(1) {
            warn!(error = %error, rejected = rejected.len(), "Index rejected documents");
        }
        self.stats.rejected += rejected.len() as u64;

        for action in &actions {
            if rejected.iter().any(|(id, _)| id == &action.id) {
                continue;
            }
            match action.operation {
                Operation::Index => self.stats.indexed += 1,
                Operation::Delete => self.stats.deleted += 1,
            }
        }
        debug!(actions = actions.len(), "Bulk request sent");
        Ok(())
    }
}

#[async_trait]
impl IDocumentSink for BulkIndexer {
    async fn accept(&mut self, emission: Emission) -> Result<()> {
        let rendered = render(emission, self.fetch_content, &mut self.stats).await;
        self.buffer.push(rendered);
        if self.buffer.len() >= self.bulk_size {
            self.send_bulk().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.send_bulk().await
    }
}

/// Renders actions as an NDJSON `_bulk` body
fn bulk_body(index: &str, actions: &[Rendered]) -> Result<String> {
    let mut body = String::new();
    for action in actions {
        let meta = json!({ action.operation.as_str(): {"_index": index, "_id": action.id} });
        body.push_str(&serde_json::to_string(&meta)?);
        body.push('\n');

        if action.operation == Operation::Index {
            // `_id` is metadata in the index and may not appear in the source
            let mut source = action.document.clone();
            if let Value::Object(map) = &mut source {
                map.remove("_id");
            }
            body.push_str(&serde_json::to_string(&source)?);
            body.push('\n');
        }
    }
    Ok(body)
}

/// `(id, reason)` of every item a `_bulk` response reports as failed
fn rejected_items(response: &Value) -> Vec<(String, String)> {
    if !response["errors"].as_bool().unwrap_or(false) {
        return Vec::new();
    }
    response["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object()?.values().next())
                .filter(|result| result["status"].as_u64().unwrap_or(0) >= 300)
                .map(|result| {
                    (
                        result["_id"].as_str().unwrap_or_default().to_string(),
                        result["error"]["reason"]
                            .as_str()
                            .unwrap_or("unknown")
                            .to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}
