//! Connector wiring
//!
//! [`SharepointConnector`] owns the configuration, the shared API client and
//! the cancellation handle of one source. It builds walkers for sync runs
//! and checks a configuration against the remote tenant.

use std::sync::Arc;

use futures_util::{pin_mut, StreamExt};
use serde_json::Value;
use spindex_core::config::{Config, WILDCARD};
use spindex_core::ports::ITextExtractor;
use spindex_graph::client::SharepointClient;
use spindex_graph::wait::CancellableWait;
use spindex_graph::GraphError;
use tracing::{debug, info};

use crate::access_control::AccessControlResolver;
use crate::content::{ContentDownloader, DownloadPolicy};
use crate::walker::{SiteWalker, WalkerOptions};
use crate::SyncError;

/// Number of remote site names listed when configured sites are missing
const SITE_EXAMPLES: usize = 5;

/// A configured SharePoint Online source
pub struct SharepointConnector {
    config: Config,
    client: Arc<SharepointClient>,
    wait: CancellableWait,
    extractor: Option<Arc<dyn ITextExtractor>>,
}

impl SharepointConnector {
    /// Builds the connector and its API client
    ///
    /// # Arguments
    /// * `config` - Loaded configuration; `tenant` and `http` shape the client
    /// * `wait` - Cancellation shared by backoff waits and walkers
    pub fn new(config: Config, wait: CancellableWait) -> Result<Self, SyncError> {
        let client = SharepointClient::new(&config.tenant, &config.http, wait.clone())?;
        Ok(Self {
            config,
            client: Arc::new(client),
            wait,
            extractor: None,
        })
    }

    /// Sets the text extractor used when `sync.use_text_extraction_service` is on
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn ITextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &Arc<SharepointClient> {
        &self.client
    }

    /// Builds a walker for one sync run
    ///
    /// # Errors
    /// Returns [`SyncError::InvalidConfiguration`] when the advanced rules
    /// do not parse.
    pub fn walker(&self) -> Result<SiteWalker, SyncError> {
        let rules = self
            .config
            .filtering
            .advanced_rules()
            .map_err(|e| SyncError::InvalidConfiguration(e.to_string()))?;
        let sync = &self.config.sync;

        let policy = DownloadPolicy {
            max_age_days: rules.and_then(|r| r.max_drive_item_age_days()),
            extraction_enabled: sync.use_text_extraction_service,
        };

        let mut downloader =
            ContentDownloader::new(Arc::clone(&self.client), sync.use_text_extraction_service);
        if let Some(extractor) = &self.extractor {
            downloader = downloader.with_extractor(Arc::clone(extractor));
        }

        Ok(SiteWalker::new(
            Arc::clone(&self.client),
            AccessControlResolver::new(
                Arc::clone(&self.client),
                sync.enable_document_level_security,
            ),
            Arc::new(downloader),
            WalkerOptions {
                allowed_sites: sync.site_collections.clone(),
                download_policy: policy,
            },
            self.wait.token().clone(),
        ))
    }

    /// Checks credentials, tenant name and configured sites remotely
    ///
    /// # Errors
    /// - [`SyncError::Graph`] when a token cannot be obtained or a listing fails
    /// - [`SyncError::InvalidConfiguration`] for an unknown tenant or sites
    ///   that do not exist
    pub async fn validate(&self) -> Result<(), SyncError> {
        self.client.authenticate().await?;
        debug!("Obtained Graph and REST tokens");

        let tenant_name = &self.config.tenant.tenant_name;
        let details = match self.client.tenant_details().await {
            Ok(details) => Some(details),
            Err(GraphError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let known = details
            .as_ref()
            .and_then(|d| d.get("NameSpaceType"))
            .and_then(Value::as_str)
            .is_some_and(|kind| kind != "Unknown");
        if !known {
            return Err(SyncError::InvalidConfiguration(format!(
                "Could not find tenant with name {tenant_name}. Make sure that provided tenant name is valid."
            )));
        }

        let remote_sites = self.remote_site_names().await?;
        info!(sites = remote_sites.len(), "Listed remote sites");
        if self.config.sync.all_sites() {
            return Ok(());
        }

        let missing: Vec<&str> = self
            .config
            .sync
            .site_collections
            .iter()
            .filter(|site| !remote_sites.contains(site))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let examples: Vec<&str> = remote_sites
            .iter()
            .take(SITE_EXAMPLES)
            .map(String::as_str)
            .collect();
        Err(SyncError::InvalidConfiguration(format!(
            "The specified SharePoint sites [{}] could not be retrieved during sync. Examples of sites available on the tenant:[{}].",
            missing.join(", "),
            examples.join(", ")
        )))
    }

    /// Stops every wait and walk started by this connector
    pub fn close(&self) {
        self.client.close();
    }

    async fn remote_site_names(&self) -> Result<Vec<String>, SyncError> {
        let everything = vec![WILDCARD.to_string()];
        let mut names = Vec::new();

        let collections = self.client.site_collections();
        pin_mut!(collections);
        while let Some(collection) = collections.next().await {
            let collection = collection?;
            let Some(hostname) = collection
                .get("siteCollection")
                .and_then(|c| c.get("hostname"))
                .and_then(Value::as_str)
            else {
                continue;
            };

            let sites = self.client.sites(hostname, &everything);
            pin_mut!(sites);
            while let Some(site) = sites.next().await {
                if let Some(name) = site?.get("name").and_then(Value::as_str) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}
