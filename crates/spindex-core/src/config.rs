//! Configuration module for spindex.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filtering::AdvancedRules;

/// Site name that selects every site of the tenant.
pub const WILDCARD: &str = "*";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for spindex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tenant: TenantConfig,
    pub sync: SyncConfig,
    pub http: HttpConfig,
    pub filtering: FilteringConfig,
    pub indexer: IndexerConfig,
    pub logging: LoggingConfig,
}

/// Azure AD application credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    /// Azure AD tenant id (GUID).
    pub tenant_id: String,
    /// Tenant name, the `contoso` in `contoso.sharepoint.com`.
    pub tenant_name: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret value.
    pub secret_value: String,
}

/// What to synchronize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Site names to ingest; `*` ingests every site.
    pub site_collections: Vec<String>,
    /// Hand downloaded files to the text extraction service instead of
    /// base64-encoding them.
    pub use_text_extraction_service: bool,
    /// Decorate documents with the principals allowed to see them.
    pub enable_document_level_security: bool,
    /// Whether sinks download file content for emitted documents.
    pub fetch_content: bool,
}

/// Remote API call settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Maximum number of concurrent calls per API session.
    pub concurrency: usize,
    /// Attempts per call when throttled.
    pub max_attempts: u32,
    /// Backoff when a throttled response carries no `Retry-After` header.
    pub default_retry_seconds: u64,
    /// Redirects all Graph, REST and auth calls to one base URL (testing only).
    pub override_url: Option<String>,
}

/// Operator-supplied sync rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilteringConfig {
    /// Raw advanced rules object, validated by [`FilteringConfig::advanced_rules`].
    pub advanced_rules: Option<Value>,
}

/// Retry pacing for the indexing client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyConfig {
    Constant,
    Linear,
    Exponential,
}

/// Elasticsearch-compatible indexing target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Base URL of the search host.
    pub host: String,
    /// Index receiving the documents.
    pub index: String,
    /// Optional API key sent as `Authorization: ApiKey <key>`.
    pub api_key: Option<String>,
    /// Attempts per bulk request.
    pub max_retries: u32,
    /// Base interval between attempts, in seconds.
    pub retry_interval: u64,
    /// How the interval grows between attempts.
    pub retry_strategy: RetryStrategyConfig,
    /// Request timeout, in seconds.
    pub request_timeout: u64,
    /// Documents per bulk request.
    pub bulk_size: usize,
    /// Maximum time to wait for the host to come up, in seconds.
    pub max_wait_duration: u64,
    /// First backoff while waiting for the host, in seconds.
    pub initial_backoff_duration: u64,
    /// Backoff growth factor while waiting for the host.
    pub backoff_multiplier: u32,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/spindex/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("spindex")
            .join("config.yaml")
    }
}

impl FilteringConfig {
    /// Parsed advanced rules, if any were configured.
    pub fn advanced_rules(&self) -> Result<Option<AdvancedRules>, ValidationError> {
        self.advanced_rules
            .as_ref()
            .map(AdvancedRules::from_value)
            .transpose()
    }
}

impl SyncConfig {
    /// Whether every site of the tenant is selected.
    pub fn all_sites(&self) -> bool {
        self.site_collections.iter().any(|s| s == WILDCARD)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            site_collections: vec![WILDCARD.to_string()],
            use_text_extraction_service: false,
            enable_document_level_security: false,
            fetch_content: true,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_attempts: 3,
            default_retry_seconds: 30,
            override_url: None,
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:9200".to_string(),
            index: "search-sharepoint-online".to_string(),
            api_key: None,
            max_retries: 3,
            retry_interval: 10,
            retry_strategy: RetryStrategyConfig::Linear,
            request_timeout: 120,
            bulk_size: 100,
            max_wait_duration: 60,
            initial_backoff_duration: 5,
            backoff_multiplier: 2,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"http.concurrency"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- tenant ---
        for (field, value) in [
            ("tenant.tenant_id", &self.tenant.tenant_id),
            ("tenant.tenant_name", &self.tenant.tenant_name),
            ("tenant.client_id", &self.tenant.client_id),
            ("tenant.secret_value", &self.tenant.secret_value),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must not be empty".into(),
                });
            }
        }
        if self.tenant.tenant_name.contains('.') {
            errors.push(ValidationError {
                field: "tenant.tenant_name".into(),
                message: format!(
                    "expected the bare tenant name, e.g. 'contoso' for contoso.sharepoint.com, got '{}'",
                    self.tenant.tenant_name
                ),
            });
        }

        // --- sync ---
        if self.sync.site_collections.is_empty() {
            errors.push(ValidationError {
                field: "sync.site_collections".into(),
                message: format!("list at least one site, or '{WILDCARD}' for all sites"),
            });
        }

        // --- http ---
        if self.http.concurrency == 0 {
            errors.push(ValidationError {
                field: "http.concurrency".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.http.max_attempts == 0 {
            errors.push(ValidationError {
                field: "http.max_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- filtering ---
        if let Err(e) = self.filtering.advanced_rules() {
            errors.push(e);
        }

        // --- indexer ---
        if self.indexer.max_retries == 0 {
            errors.push(ValidationError {
                field: "indexer.max_retries".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.indexer.bulk_size == 0 {
            errors.push(ValidationError {
                field: "indexer.bulk_size".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.indexer.index.trim().is_empty() {
            errors.push(ValidationError {
                field: "indexer.index".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use spindex_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .tenant("tenant-guid", "contoso", "client-id", "secret")
///     .site_collections(vec!["engineering".to_string()])
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- tenant ---

    pub fn tenant(
        mut self,
        tenant_id: impl Into<String>,
        tenant_name: impl Into<String>,
        client_id: impl Into<String>,
        secret_value: impl Into<String>,
    ) -> Self {
        self.config.tenant = TenantConfig {
            tenant_id: tenant_id.into(),
            tenant_name: tenant_name.into(),
            client_id: client_id.into(),
            secret_value: secret_value.into(),
        };
        self
    }

    // --- sync ---

    pub fn site_collections(mut self, sites: Vec<String>) -> Self {
        self.config.sync.site_collections = sites;
        self
    }

    pub fn use_text_extraction_service(mut self, enabled: bool) -> Self {
        self.config.sync.use_text_extraction_service = enabled;
        self
    }

    pub fn enable_document_level_security(mut self, enabled: bool) -> Self {
        self.config.sync.enable_document_level_security = enabled;
        self
    }

    pub fn fetch_content(mut self, enabled: bool) -> Self {
        self.config.sync.fetch_content = enabled;
        self
    }

    // --- http ---

    pub fn http_concurrency(mut self, n: usize) -> Self {
        self.config.http.concurrency = n;
        self
    }

    pub fn http_max_attempts(mut self, n: u32) -> Self {
        self.config.http.max_attempts = n;
        self
    }

    pub fn http_default_retry_seconds(mut self, seconds: u64) -> Self {
        self.config.http.default_retry_seconds = seconds;
        self
    }

    pub fn override_url(mut self, url: impl Into<String>) -> Self {
        self.config.http.override_url = Some(url.into());
        self
    }

    // --- filtering ---

    pub fn advanced_rules(mut self, rules: Value) -> Self {
        self.config.filtering.advanced_rules = Some(rules);
        self
    }

    // --- indexer ---

    pub fn indexer_host(mut self, host: impl Into<String>) -> Self {
        self.config.indexer.host = host.into();
        self
    }

    pub fn indexer_index(mut self, index: impl Into<String>) -> Self {
        self.config.indexer.index = index.into();
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Consume the builder, validate, and return the [`Config`] or errors.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
