//! Bounded, retrying API session
//!
//! One [`ApiSession`] exists per remote API. Every outbound call goes through
//! [`ApiSession::get`], which:
//!
//! 1. Acquires a permit from the session's semaphore (bounding in-flight calls)
//! 2. Injects a bearer token from the session's [`TokenCache`]
//! 3. Translates unsuccessful statuses into [`GraphError`] variants
//! 4. Retries throttled (429/503) responses after the server-directed delay
//! 5. Retries transport failures (connect, reset, timeout) after a linearly
//!    growing delay
//!
//! The permit travels with the returned response, so a body that is still
//! being read counts against the concurrency limit and is released on drop
//! whatever the outcome.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde_json::Value;
use spindex_core::domain::DeltaLink;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{OwnedSemaphorePermit, Semaphore},
};
use tracing::{debug, info, warn};

use crate::{
    delta::{DriveItemsPage, GraphDeltaResponse},
    rate_limit::{is_throttled, ThrottlePolicy},
    token::TokenCache,
    wait::CancellableWait,
    GraphError,
};

/// Default number of concurrent calls per session
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Base delay before retrying a call that failed in transport; grows by
/// this much per attempt
pub const TRANSPORT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Size of the chunks written to a download sink
pub const FILE_WRITE_CHUNK_SIZE: usize = 1024;

/// Next-page field of Graph API collections
pub const GRAPH_NEXT_LINK: &str = "@odata.nextLink";

/// Next-page field of SharePoint REST API collections
pub const REST_NEXT_LINK: &str = "odata.nextLink";

// ============================================================================
// GuardedResponse
// ============================================================================

/// A successful response that still holds its concurrency permit
#[derive(Debug)]
pub struct GuardedResponse {
    response: Response,
    permit: OwnedSemaphorePermit,
}

impl GuardedResponse {
    /// Splits into the response and the permit; keep the permit alive while
    /// the body is read
    pub fn into_parts(self) -> (Response, OwnedSemaphorePermit) {
        (self.response, self.permit)
    }
}

// ============================================================================
// ApiSession
// ============================================================================

/// Concurrency-bounded, token-authenticated session for one remote API
pub struct ApiSession {
    name: &'static str,
    http: Client,
    tokens: TokenCache,
    semaphore: Arc<Semaphore>,
    policy: ThrottlePolicy,
    wait: CancellableWait,
}

impl ApiSession {
    /// Creates a session
    ///
    /// # Arguments
    /// * `name` - Short API name used in logs
    /// * `concurrency` - Maximum in-flight calls (at least 1)
    /// * `wait` - Shared wait used for throttling backoff
    pub fn new(
        name: &'static str,
        http: Client,
        tokens: TokenCache,
        concurrency: usize,
        policy: ThrottlePolicy,
        wait: CancellableWait,
    ) -> Self {
        Self {
            name,
            http,
            tokens,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            policy,
            wait,
        }
    }

    /// The session's token cache
    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Permits currently available; equals the configured concurrency when idle
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Issues an authenticated GET, retrying throttled responses
    ///
    /// # Errors
    /// - [`GraphError::Throttled`] once the attempt budget is spent on 429/503
    /// - [`GraphError::Network`] once the attempt budget is spent on transport
    ///   failures
    /// - [`GraphError::Cancelled`] when a backoff wait was interrupted
    /// - the translated status error for any other unsuccessful status
    pub async fn get(&self, url: &str) -> Result<GuardedResponse, GraphError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GraphError::Cancelled)?;

        let mut attempt = 1;
        loop {
            if self.wait.is_cancelled() {
                return Err(GraphError::Cancelled);
            }

            let token = self.tokens.get().await?;
            debug!(api = self.name, url, attempt, "Calling endpoint");

            let response = match self.http.get(url).bearer_auth(&token).send().await {
                Ok(response) => response,
                Err(e) if attempt < self.policy.max_attempts => {
                    let delay = TRANSPORT_RETRY_DELAY * attempt;
                    warn!(
                        api = self.name,
                        url,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    if !self.wait.wait(delay).await {
                        return Err(GraphError::Cancelled);
                    }
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(GraphError::Network(e)),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(GuardedResponse { response, permit });
            }

            if !is_throttled(status) {
                return Err(GraphError::from_status(status, url));
            }

            if attempt >= self.policy.max_attempts {
                warn!(api = self.name, url, attempt, "Throttling retry budget exhausted");
                return Err(GraphError::Throttled {
                    url: url.to_string(),
                    status: status.as_u16(),
                    attempts: attempt,
                });
            }

            let delay = self.policy.delay_for(response.headers());
            info!(
                api = self.name,
                url,
                attempt,
                status = status.as_u16(),
                retry_after_secs = delay.as_secs(),
                "Throttled, backing off"
            );
            drop(response);
            if !self.wait.wait(delay).await {
                return Err(GraphError::Cancelled);
            }
            attempt += 1;
        }
    }

    /// Fetches a single JSON document
    pub async fn fetch_json(&self, url: &str) -> Result<Value, GraphError> {
        let (response, _permit) = self.get(url).await?.into_parts();
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| GraphError::InvalidResponse(format!("{url}: {e}")))
    }

    /// Lazily walks a paginated collection
    ///
    /// Yields the `value` array of every page in server order, following
    /// `next_link_field` until a page no longer carries it.
    pub fn stream_pages<'a>(
        &'a self,
        url: String,
        next_link_field: &'static str,
    ) -> impl Stream<Item = Result<Vec<Value>, GraphError>> + Send + 'a {
        try_stream! {
            let mut next = Some(url);
            while let Some(url) = next.take() {
                let mut page = self.fetch_json(&url).await?;
                next = page
                    .get(next_link_field)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let items = match page.get_mut("value").map(Value::take) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                yield items;
            }
        }
    }

    /// Lazily walks a delta query
    ///
    /// Yields only pages that contain items, each tagged with the most recent
    /// delta link seen so far. A delta link that only arrives on an item-less
    /// final page is surfaced through one trailing empty page.
    pub fn stream_delta_pages<'a>(
        &'a self,
        url: String,
    ) -> impl Stream<Item = Result<DriveItemsPage, GraphError>> + Send + 'a {
        try_stream! {
            let mut next = Some(url);
            let mut latest: Option<DeltaLink> = None;
            let mut surfaced = true;

            while let Some(url) = next.take() {
                let body = self.fetch_json(&url).await?;
                let page: GraphDeltaResponse = serde_json::from_value(body)
                    .map_err(|e| GraphError::InvalidResponse(format!("{url}: {e}")))?;

                if let Some(link) = page.delta_link.and_then(|l| DeltaLink::new(l).ok()) {
                    latest = Some(link);
                    surfaced = false;
                }
                next = page.next_link;

                if !page.value.is_empty() {
                    surfaced = true;
                    yield DriveItemsPage {
                        items: page.value,
                        delta_link: latest.clone(),
                    };
                }
            }

            if !surfaced {
                yield DriveItemsPage {
                    items: Vec::new(),
                    delta_link: latest,
                };
            }
        }
    }

    /// Streams a binary response body into `sink` in fixed-size chunks
    ///
    /// # Returns
    /// Number of bytes written
    pub async fn pipe_bytes<W>(&self, url: &str, sink: &mut W) -> Result<u64, GraphError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (response, _permit) = self.get(url).await?.into_parts();
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for piece in chunk.chunks(FILE_WRITE_CHUNK_SIZE) {
                sink.write_all(piece).await?;
            }
            written += chunk.len() as u64;
        }
        sink.flush().await?;

        debug!(api = self.name, url, bytes = written, "Download complete");
        Ok(written)
    }
}
