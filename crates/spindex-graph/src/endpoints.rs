//! Base URLs of the remote APIs and the tenant check for REST URLs

use url::Url;

/// Graph API v1.0 root
pub const GRAPH_API_URL: &str = "https://graph.microsoft.com/v1.0";
/// Azure AD identity host
pub const GRAPH_API_AUTH_URL: &str = "https://login.microsoftonline.com";
/// Azure ACS identity host used for SharePoint REST tokens
pub const REST_API_AUTH_URL: &str = "https://accounts.accesscontrol.windows.net";

/// Where each API lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub graph_api_url: String,
    pub graph_auth_url: String,
    pub rest_auth_url: String,
    /// Whether REST URLs must belong to the configured tenant
    pub validate_tenant: bool,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            graph_api_url: GRAPH_API_URL.to_string(),
            graph_auth_url: GRAPH_API_AUTH_URL.to_string(),
            rest_auth_url: REST_API_AUTH_URL.to_string(),
            validate_tenant: true,
        }
    }
}

impl Endpoints {
    /// Points every API at one base URL and disables the tenant check
    pub fn overridden(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        Self {
            graph_api_url: base.clone(),
            graph_auth_url: base.clone(),
            rest_auth_url: base,
            validate_tenant: false,
        }
    }

    /// Uses the override when one is configured
    pub fn from_override(override_url: Option<&str>) -> Self {
        override_url.map(Self::overridden).unwrap_or_default()
    }
}

/// Extracts the tenant name from a `https://{tenant}.sharepoint.com/...` URL
pub fn tenant_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if parsed.scheme() != "https" {
        return None;
    }
    parsed
        .host_str()?
        .strip_suffix(".sharepoint.com")
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
