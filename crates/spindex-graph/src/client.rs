//! SharePoint Online API client
//!
//! Endpoint catalogue over two [`ApiSession`]s: one for the Microsoft Graph
//! API (sites, drives, lists) and one for the SharePoint REST API (groups,
//! users, role assignments, attachments, pages).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use spindex_core::config::Config;
//! use spindex_graph::{client::SharepointClient, wait::CancellableWait};
//!
//! # async fn example() -> Result<(), spindex_graph::GraphError> {
//! let config = Config::default();
//! let client = SharepointClient::new(&config.tenant, &config.http, CancellableWait::new())?;
//! let collections = client.site_collections();
//! futures_util::pin_mut!(collections);
//! while let Some(collection) = collections.next().await {
//!     println!("{}", collection?["webUrl"]);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The remote APIs answer 404 for several collections that are merely empty;
//! the methods documented as "missing is empty" turn that into no items.

use std::time::Duration;

use async_stream::try_stream;
use futures_util::{pin_mut, Stream, StreamExt};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client,
};
use serde_json::Value;
use spindex_core::{
    config::{HttpConfig, TenantConfig, WILDCARD},
    domain::DeltaLink,
};
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::{
    delta::{drive_delta_url, DriveItemsPage},
    endpoints::{tenant_from_url, Endpoints},
    rate_limit::ThrottlePolicy,
    session::{ApiSession, GRAPH_NEXT_LINK, REST_NEXT_LINK},
    token::{GraphTokenFetcher, RestTokenFetcher, TokenCache},
    wait::CancellableWait,
    GraphError,
};

// ============================================================================
// SharepointClient
// ============================================================================

/// Client for every SharePoint Online endpoint the connector reads
pub struct SharepointClient {
    graph: ApiSession,
    rest: ApiSession,
    endpoints: Endpoints,
    tenant_name: String,
    wait: CancellableWait,
}

impl SharepointClient {
    /// Creates a client from the tenant and HTTP settings
    ///
    /// Honors `http.override_url`, which redirects every API to one host and
    /// disables the tenant check on REST URLs.
    pub fn new(
        tenant: &TenantConfig,
        http: &HttpConfig,
        wait: CancellableWait,
    ) -> Result<Self, GraphError> {
        let endpoints = Endpoints::from_override(http.override_url.as_deref());
        Self::with_endpoints(tenant, http, endpoints, wait)
    }

    /// Creates a client against explicit endpoints
    pub fn with_endpoints(
        tenant: &TenantConfig,
        http: &HttpConfig,
        endpoints: Endpoints,
        wait: CancellableWait,
    ) -> Result<Self, GraphError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http_client = Client::builder().default_headers(headers).build()?;

        let policy = ThrottlePolicy::new(
            http.max_attempts,
            Duration::from_secs(http.default_retry_seconds),
        );

        let graph_tokens = TokenCache::new(GraphTokenFetcher::new(
            http_client.clone(),
            &endpoints.graph_auth_url,
            &tenant.tenant_id,
            tenant.client_id.clone(),
            tenant.secret_value.clone(),
        ));
        let rest_tokens = TokenCache::new(RestTokenFetcher::new(
            http_client.clone(),
            &endpoints.rest_auth_url,
            &tenant.tenant_id,
            &tenant.tenant_name,
            &tenant.client_id,
            tenant.secret_value.clone(),
        ));

        Ok(Self {
            graph: ApiSession::new(
                "graph",
                http_client.clone(),
                graph_tokens,
                http.concurrency,
                policy,
                wait.clone(),
            ),
            rest: ApiSession::new(
                "rest",
                http_client,
                rest_tokens,
                http.concurrency,
                policy,
                wait.clone(),
            ),
            endpoints,
            tenant_name: tenant.tenant_name.clone(),
            wait,
        })
    }

    /// Configured endpoints
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Obtains both bearer tokens, failing on bad credentials
    pub async fn authenticate(&self) -> Result<(), GraphError> {
        self.graph.tokens().get().await?;
        self.rest.tokens().get().await?;
        Ok(())
    }

    /// Interrupts every backoff wait of both sessions
    pub fn close(&self) {
        self.wait.cancel_all();
    }

    // ------------------------------------------------------------------------
    // Graph API
    // ------------------------------------------------------------------------

    /// Root site of every site collection of the tenant
    pub fn site_collections(&self) -> impl Stream<Item = Result<Value, GraphError>> + Send + '_ {
        let filter = urlencoding::encode("siteCollection/root ne null");
        let url = format!(
            "{}/sites/?$filter={filter}&$select=siteCollection,webUrl",
            self.endpoints.graph_api_url
        );
        self.graph_items(url)
    }

    /// Sites of a collection, restricted to `allowed` names unless it holds `*`
    pub fn sites<'a>(
        &'a self,
        hostname: &str,
        allowed: &'a [String],
    ) -> impl Stream<Item = Result<Value, GraphError>> + Send + 'a {
        let url = format!(
            "{}/sites/{hostname}/sites?search=*&$select=",
            self.endpoints.graph_api_url
        );
        let all = allowed.iter().any(|s| s == WILDCARD);
        self.graph_items(url).filter(move |site| {
            let keep = match site {
                Ok(site) if !all => site
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|name| allowed.iter().any(|a| a == name)),
                _ => true,
            };
            futures_util::future::ready(keep)
        })
    }

    /// Document libraries of a site
    pub fn site_drives(&self, site_id: &str) -> impl Stream<Item = Result<Value, GraphError>> + Send + '_ {
        let url = format!("{}/sites/{site_id}/drives?$select=", self.endpoints.graph_api_url);
        self.graph_items(url)
    }

    /// Pages of drive items, from scratch or from a stored delta link
    pub fn drive_items(
        &self,
        drive_id: &str,
        delta_link: Option<&DeltaLink>,
    ) -> impl Stream<Item = Result<DriveItemsPage, GraphError>> + Send + '_ {
        let url = match delta_link {
            Some(link) => link.as_str().to_string(),
            None => drive_delta_url(&self.endpoints.graph_api_url, drive_id),
        };
        self.graph.stream_delta_pages(url)
    }

    /// Permission entries of a drive item; missing is empty
    pub async fn drive_item_permissions(
        &self,
        drive_id: &str,
        item_id: &str,
    ) -> Result<Vec<Value>, GraphError> {
        let url = format!(
            "{}/drives/{drive_id}/items/{item_id}/permissions",
            self.endpoints.graph_api_url
        );
        fetch_values(&self.graph, &url).await
    }

    /// Streams a drive item's content into `sink`
    pub async fn download_drive_item<W>(
        &self,
        drive_id: &str,
        item_id: &str,
        sink: &mut W,
    ) -> Result<u64, GraphError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let url = format!(
            "{}/drives/{drive_id}/items/{item_id}/content",
            self.endpoints.graph_api_url
        );
        self.graph.pipe_bytes(&url, sink).await
    }

    /// Lists of a site
    pub fn site_lists(&self, site_id: &str) -> impl Stream<Item = Result<Value, GraphError>> + Send + '_ {
        let url = format!("{}/sites/{site_id}/lists?$select=", self.endpoints.graph_api_url);
        self.graph_items(url)
    }

    /// Items of a list, with their `fields` expanded
    pub fn site_list_items(
        &self,
        site_id: &str,
        list_id: &str,
    ) -> impl Stream<Item = Result<Value, GraphError>> + Send + '_ {
        let url = format!(
            "{}/sites/{site_id}/lists/{list_id}/items?$select=&$expand=fields",
            self.endpoints.graph_api_url
        );
        self.graph_items(url)
    }

    // ------------------------------------------------------------------------
    // SharePoint REST API
    // ------------------------------------------------------------------------

    /// SharePoint groups of a site; missing is empty
    pub async fn site_groups(&self, site_web_url: &str) -> Result<Vec<Value>, GraphError> {
        let url = self.rest_url(site_web_url, "/_api/web/sitegroups")?;
        fetch_values(&self.rest, &url).await
    }

    /// Users and AD groups of a site; missing is empty
    pub async fn site_users(&self, site_web_url: &str) -> Result<Vec<Value>, GraphError> {
        let url = self.rest_url(site_web_url, "/_api/web/siteusers")?;
        fetch_values(&self.rest, &url).await
    }

    /// Role assignments of a list; missing is empty
    pub async fn site_list_role_assignments(
        &self,
        site_web_url: &str,
        list_title: &str,
    ) -> Result<Vec<Value>, GraphError> {
        let title = odata_literal(list_title);
        let url = self.rest_url(
            site_web_url,
            &format!("/_api/lists/GetByTitle('{title}')/roleassignments"),
        )?;
        fetch_values(&self.rest, &url).await
    }

    /// Role assignments of a list item; missing is empty
    pub async fn site_list_item_role_assignments(
        &self,
        site_web_url: &str,
        list_title: &str,
        item_id: &str,
    ) -> Result<Vec<Value>, GraphError> {
        let title = odata_literal(list_title);
        let url = self.rest_url(
            site_web_url,
            &format!("/_api/lists/GetByTitle('{title}')/items({item_id})/roleassignments"),
        )?;
        fetch_values(&self.rest, &url).await
    }

    /// Attachment files of a list item; missing is empty
    ///
    /// Some list item types answer 404 here even though the item exists.
    pub async fn site_list_item_attachments(
        &self,
        site_web_url: &str,
        list_title: &str,
        item_id: &str,
    ) -> Result<Vec<Value>, GraphError> {
        let title = odata_literal(list_title);
        let url = self.rest_url(
            site_web_url,
            &format!("/_api/lists/GetByTitle('{title}')/items({item_id})?$expand=AttachmentFiles"),
        )?;
        match self.rest.fetch_json(&url).await {
            Ok(mut item) => Ok(take_array(&mut item, "AttachmentFiles")),
            Err(GraphError::NotFound(_)) => {
                debug!(url = %url, "List item has no attachment endpoint");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Streams an attachment's content into `sink`
    ///
    /// # Arguments
    /// * `attachment_id` - The attachment's absolute `odata.id`
    pub async fn download_attachment<W>(
        &self,
        attachment_id: &str,
        sink: &mut W,
    ) -> Result<u64, GraphError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.validate_sharepoint_rest_url(attachment_id)?;
        self.rest
            .pipe_bytes(&format!("{attachment_id}/$value"), sink)
            .await
    }

    /// Site pages of a site; missing is empty
    pub fn site_pages<'a>(
        &'a self,
        site_web_url: &'a str,
    ) -> impl Stream<Item = Result<Value, GraphError>> + Send + 'a {
        try_stream! {
            let url = self.rest_url(
                site_web_url,
                "/_api/web/lists/GetByTitle('Site%20Pages')/items?$select=",
            )?;
            let pages = self.rest.stream_pages(url, REST_NEXT_LINK);
            pin_mut!(pages);
            while let Some(page) = pages.next().await {
                let items = match page {
                    Err(GraphError::NotFound(url)) => {
                        debug!(url = %url, "Site has no pages library");
                        break;
                    }
                    page => page?,
                };
                for item in items {
                    yield item;
                }
            }
        }
    }

    /// Role assignments of a site page; missing is empty
    pub async fn site_page_role_assignments(
        &self,
        site_web_url: &str,
        page_id: &str,
    ) -> Result<Vec<Value>, GraphError> {
        let url = self.rest_url(
            site_web_url,
            &format!("/_api/web/lists/GetByTitle('Site%20Pages')/items({page_id})/RoleAssignments"),
        )?;
        fetch_values(&self.rest, &url).await
    }

    /// Resolves the principal a role assignment refers to
    ///
    /// Returns `None` when the assignment has no `PrincipalId` or the lookup
    /// answers 404, and also on 500, which this endpoint returns for some
    /// principals that no longer exist.
    pub async fn user_for_role_assignment(
        &self,
        site_web_url: &str,
        role_assignment: &Value,
    ) -> Result<Option<Value>, GraphError> {
        let Some(principal_id) = role_assignment.get("PrincipalId") else {
            return Ok(None);
        };
        let principal_id = match principal_id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let url = self.rest_url(
            site_web_url,
            &format!("/_api/web/GetUserById('{principal_id}')"),
        )?;
        match self.rest.fetch_json(&url).await {
            Ok(user) => Ok(Some(user)),
            Err(GraphError::NotFound(_) | GraphError::InternalServerError(_)) => {
                debug!(principal_id = %principal_id, "Role assignment principal not resolvable");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Realm information of the configured tenant name
    pub async fn tenant_details(&self) -> Result<Value, GraphError> {
        let url = format!(
            "{}/common/userrealm/?user=cj@{}.onmicrosoft.com&api-version=2.1&checkForMicrosoftAccount=false",
            self.endpoints.graph_auth_url, self.tenant_name
        );
        self.rest.fetch_json(&url).await
    }

    /// Rejects REST URLs that belong to another tenant
    pub fn validate_sharepoint_rest_url(&self, url: &str) -> Result<(), GraphError> {
        if !self.endpoints.validate_tenant {
            return Ok(());
        }
        match tenant_from_url(url) {
            Some(actual) if actual.eq_ignore_ascii_case(&self.tenant_name) => Ok(()),
            _ => Err(GraphError::InvalidTenant {
                expected: self.tenant_name.clone(),
                url: url.to_string(),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn rest_url(&self, site_web_url: &str, path: &str) -> Result<String, GraphError> {
        self.validate_sharepoint_rest_url(site_web_url)?;
        Ok(format!("{}{path}", site_web_url.trim_end_matches('/')))
    }

    fn graph_items(&self, url: String) -> impl Stream<Item = Result<Value, GraphError>> + Send + '_ {
        try_stream! {
            let pages = self.graph.stream_pages(url, GRAPH_NEXT_LINK);
            pin_mut!(pages);
            while let Some(page) = pages.next().await {
                for item in page? {
                    yield item;
                }
            }
        }
    }
}

/// Fetches one document and returns its `value` array; missing is empty
async fn fetch_values(session: &ApiSession, url: &str) -> Result<Vec<Value>, GraphError> {
    match session.fetch_json(url).await {
        Ok(mut body) => Ok(take_array(&mut body, "value")),
        Err(GraphError::NotFound(_)) => {
            debug!(url, "Endpoint answered 404, treating as empty");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

fn take_array(body: &mut Value, field: &str) -> Vec<Value> {
    match body.get_mut(field).map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Escapes a string for use inside an OData single-quoted literal
fn odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}
