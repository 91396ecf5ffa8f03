//! Bearer token acquisition and caching
//!
//! Both remote APIs authenticate with app-only (client credentials) tokens
//! obtained from different endpoints with different form payloads. The
//! mechanics are shared: a [`TokenCache`] owns a single [`SecurityToken`] and
//! refreshes it through an injected [`TokenFetcher`] once it expires.
//!
//! ## Components
//!
//! - [`TokenFetcher`] - Capability returning `(access_token, ttl_seconds)`
//! - [`GraphTokenFetcher`] - Azure AD v2 endpoint, Graph scope
//! - [`RestTokenFetcher`] - ACS endpoint, SharePoint resource principal
//! - [`TokenCache`] - Expiry-aware cache with failure classification

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::GraphError;

/// Immediate attempts made by [`TokenCache`] before classifying a failure
pub const TOKEN_FETCH_ATTEMPTS: u32 = 3;

/// Resource principal id of SharePoint Online, constant across tenants
const SHAREPOINT_PRINCIPAL: &str = "00000003-0000-0ff1-ce00-000000000000";

// ============================================================================
// SecurityToken
// ============================================================================

/// A bearer token and the instant it stops being usable
#[derive(Debug, Clone)]
pub struct SecurityToken {
    value: String,
    expires_at: Instant,
}

impl SecurityToken {
    /// Returns the token value
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether the token can still be handed out
    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

// ============================================================================
// TokenFetcher
// ============================================================================

/// Failure of a single token request
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The token endpoint answered with an error status
    #[error("Response Status: {status}, Message: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// The request did not complete
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The token endpoint answered 2xx without a usable token
    #[error("malformed token response: {0}")]
    Malformed(String),
}

/// Strategy that obtains a fresh token from one identity endpoint
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Name of the API the token is for, used in error messages
    fn api_name(&self) -> &'static str;

    /// Requests a new token
    ///
    /// # Returns
    /// The access token and the number of seconds it is valid for
    async fn fetch_token(&self) -> Result<(String, u64), TokenRequestError>;
}

/// Token endpoint response shared by both identity endpoints
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Azure AD v2 returns a number, ACS a numeric string
    expires_in: Value,
}

impl TokenResponse {
    fn into_parts(self) -> Result<(String, u64), TokenRequestError> {
        let ttl = match &self.expires_in {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            TokenRequestError::Malformed(format!("invalid expires_in: {}", self.expires_in))
        })?;
        Ok((self.access_token, ttl))
    }
}

/// Posts a client-credentials form and decodes the token response
async fn request_token(
    http: &Client,
    url: &str,
    form: &[(&str, String)],
) -> Result<(String, u64), TokenRequestError> {
    let response = http.post(url).form(form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(TokenRequestError::Status {
            status: status.as_u16(),
            message,
        });
    }
    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| TokenRequestError::Malformed(e.to_string()))?;
    body.into_parts()
}

/// Fetches Graph API tokens from the Azure AD v2 token endpoint
#[derive(Debug, Clone)]
pub struct GraphTokenFetcher {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl GraphTokenFetcher {
    /// Creates a fetcher
    ///
    /// # Arguments
    /// * `auth_url` - Identity host, e.g. `https://login.microsoftonline.com`
    /// * `tenant_id` - Azure AD tenant id
    pub fn new(
        http: Client,
        auth_url: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: format!("{auth_url}/{tenant_id}/oauth2/v2.0/token"),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl TokenFetcher for GraphTokenFetcher {
    fn api_name(&self) -> &'static str {
        "Graph API"
    }

    async fn fetch_token(&self) -> Result<(String, u64), TokenRequestError> {
        let form = [
            ("client_id", self.client_id.clone()),
            ("scope", "https://graph.microsoft.com/.default".to_string()),
            ("client_secret", self.client_secret.clone()),
            ("grant_type", "client_credentials".to_string()),
        ];
        request_token(&self.http, &self.token_url, &form).await
    }
}

/// Fetches SharePoint REST API tokens from the ACS token endpoint
#[derive(Debug, Clone)]
pub struct RestTokenFetcher {
    http: Client,
    token_url: String,
    resource: String,
    client_id: String,
    client_secret: String,
}

impl RestTokenFetcher {
    /// Creates a fetcher
    ///
    /// # Arguments
    /// * `auth_url` - ACS host, e.g. `https://accounts.accesscontrol.windows.net`
    /// * `tenant_name` - Tenant name, the `contoso` of `contoso.sharepoint.com`
    pub fn new(
        http: Client,
        auth_url: &str,
        tenant_id: &str,
        tenant_name: &str,
        client_id: &str,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: format!("{auth_url}/{tenant_id}/tokens/OAuth/2"),
            resource: format!("{SHAREPOINT_PRINCIPAL}/{tenant_name}.sharepoint.com@{tenant_id}"),
            client_id: format!("{client_id}@{tenant_id}"),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl TokenFetcher for RestTokenFetcher {
    fn api_name(&self) -> &'static str {
        "Sharepoint REST API"
    }

    async fn fetch_token(&self) -> Result<(String, u64), TokenRequestError> {
        let form = [
            ("grant_type", "client_credentials".to_string()),
            ("resource", self.resource.clone()),
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
        ];
        request_token(&self.http, &self.token_url, &form).await
    }
}

// ============================================================================
// TokenCache
// ============================================================================

/// Single-value token cache
///
/// The lock is held across a refresh, so concurrent callers that find the
/// token expired wait for one fetch instead of each issuing their own.
pub struct TokenCache {
    fetcher: Box<dyn TokenFetcher>,
    cached: Mutex<Option<SecurityToken>>,
}

impl TokenCache {
    /// Creates an empty cache around a fetch strategy
    pub fn new(fetcher: impl TokenFetcher + 'static) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid bearer token, fetching a new one if needed
    ///
    /// # Errors
    /// [`GraphError::TokenFetchFailed`] with a human-readable cause once
    /// [`TOKEN_FETCH_ATTEMPTS`] fetches failed.
    pub async fn get(&self) -> Result<String, GraphError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_valid()) {
            return Ok(token.value.clone());
        }

        // Expiry is measured from before the request
        let requested_at = Instant::now();
        let (value, ttl) = self.fetch_with_retries().await?;
        let token = SecurityToken {
            value: value.clone(),
            expires_at: requested_at + Duration::from_secs(ttl),
        };
        info!(api = self.fetcher.api_name(), ttl, "Obtained new access token");
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch_with_retries(&self) -> Result<(String, u64), GraphError> {
        let mut attempt = 1;
        loop {
            match self.fetcher.fetch_token().await {
                Ok(token) => return Ok(token),
                Err(e) if attempt < TOKEN_FETCH_ATTEMPTS => {
                    warn!(
                        api = self.fetcher.api_name(),
                        attempt,
                        error = %e,
                        "Token request failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    debug!(api = self.fetcher.api_name(), error = %e, "Token request failed");
                    return Err(self.classify(e));
                }
            }
        }
    }

    fn classify(&self, err: TokenRequestError) -> GraphError {
        let api = self.fetcher.api_name();
        let message = match &err {
            TokenRequestError::Status { status: 400, .. } => format!(
                "Failed to authorize to {api}. Please verify, that provided Tenant Id, Tenant Name and Client ID are valid."
            ),
            TokenRequestError::Status { status: 401, .. } => format!(
                "Failed to authorize to {api}. Please verify, that provided Secret Value is valid."
            ),
            other => format!("Failed to authorize to {api}. {other}"),
        };
        GraphError::TokenFetchFailed(message)
    }
}
