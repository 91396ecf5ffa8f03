//! Config command - Show, edit and validate the configuration file

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::Value;
use spindex_core::config::{Config, RetryStrategyConfig};
use tracing::info;

use crate::output::{get_formatter, OutputFormat};

/// Placeholder shown instead of secrets
const REDACTED: &str = "********";

/// Keys accepted by `config set`, with a short description
const SUPPORTED_KEYS: &[(&str, &str)] = &[
    ("tenant.tenant_id", "Azure AD tenant id"),
    ("tenant.tenant_name", "Tenant name, e.g. contoso"),
    ("tenant.client_id", "Application (client) id"),
    ("tenant.secret_value", "Client secret"),
    ("sync.site_collections", "Comma-separated site names, or *"),
    ("sync.use_text_extraction_service", "true|false"),
    ("sync.enable_document_level_security", "true|false"),
    ("sync.fetch_content", "true|false"),
    ("http.concurrency", "Concurrent calls per API"),
    ("http.max_attempts", "Attempts per throttled call"),
    ("http.default_retry_seconds", "Backoff without Retry-After"),
    ("http.override_url", "Base URL for every API (testing), or none"),
    ("filtering.advanced_rules", "JSON object, or none"),
    ("indexer.host", "Index host URL"),
    ("indexer.index", "Index name"),
    ("indexer.api_key", "API key, or none"),
    ("indexer.max_retries", "Attempts per bulk request"),
    ("indexer.retry_interval", "Seconds between bulk attempts"),
    ("indexer.retry_strategy", "constant|linear|exponential"),
    ("indexer.request_timeout", "Seconds per index request"),
    ("indexer.bulk_size", "Documents per bulk request"),
    ("logging.level", "trace|debug|info|warn|error"),
];

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the current configuration, secrets redacted
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "sync.site_collections")
        key: String,
        /// New value
        value: String,
    },
    /// Validate the configuration file
    Validate,
}

impl ConfigCommand {
    /// Execute the config command
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(config_path, format),
            ConfigCommand::Set { key, value } => execute_set(config_path, key, value, format),
            ConfigCommand::Validate => execute_validate(config_path, format),
        }
    }
}

fn execute_show(config_path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let config = redacted(Config::load_or_default(config_path));
    info!(config_path = %config_path.display(), "Showing configuration");

    if matches!(format, OutputFormat::Json) {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
        return Ok(());
    }

    formatter.success(&format!("Configuration ({})", config_path.display()));
    formatter.info("");
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn execute_set(config_path: &Path, key: &str, value: &str, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let mut config = Config::load_or_default(config_path);
    info!(key = %key, "Setting configuration value");

    if let Err(e) = apply_config_value(&mut config, key, value) {
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "success": false,
                "key": key,
                "error": e.to_string(),
            }));
        } else {
            formatter.error(&format!("Failed to set '{key}': {e}"));
            formatter.info("");
            formatter.info("Supported keys:");
            for (supported, description) in SUPPORTED_KEYS {
                formatter.info(&format!("  {supported:<38} - {description}"));
            }
        }
        return Err(e);
    }

    // Other sections may still be incomplete while the file is being built up
    let errors: Vec<String> = config
        .validate()
        .into_iter()
        .filter(|e| e.field == key)
        .map(|e| e.message)
        .collect();
    if !errors.is_empty() {
        anyhow::bail!("Invalid value for '{key}': {}", errors.join("; "));
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
    std::fs::write(config_path, yaml).context("Failed to write configuration file")?;

    if matches!(format, OutputFormat::Json) {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "key": key,
            "config_path": config_path.display().to_string(),
        }));
    } else {
        formatter.success(&format!("Set {key}"));
        formatter.info(&format!("Saved to {}", config_path.display()));
    }
    Ok(())
}

fn execute_validate(config_path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let config = Config::load(config_path).with_context(|| {
        format!("Failed to load configuration from {}", config_path.display())
    })?;
    info!(config_path = %config_path.display(), "Validating configuration");

    let errors = config.validate();
    if matches!(format, OutputFormat::Json) {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": config_path.display().to_string(),
            "errors": messages,
        }));
    } else if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", config_path.display()));
    } else {
        formatter.error(&format!(
            "Configuration has {} error{}:",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" }
        ));
        formatter.info(&format!("File: {}", config_path.display()));
        for error in &errors {
            formatter.info(&format!("  {} - {}", error.field, error.message));
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Configuration is invalid");
    }
    Ok(())
}

/// Copy of `config` safe to print
fn redacted(mut config: Config) -> Config {
    if !config.tenant.secret_value.is_empty() {
        config.tenant.secret_value = REDACTED.to_string();
    }
    if config.indexer.api_key.is_some() {
        config.indexer.api_key = Some(REDACTED.to_string());
    }
    config
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .with_context(|| format!("Expected true or false, got '{value}'"))
}

/// Apply a dot-notation key/value pair to a Config struct
///
/// See [`SUPPORTED_KEYS`] for the accepted keys.
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        // --- tenant ---
        "tenant.tenant_id" => config.tenant.tenant_id = value.to_string(),
        "tenant.tenant_name" => config.tenant.tenant_name = value.to_string(),
        "tenant.client_id" => config.tenant.client_id = value.to_string(),
        "tenant.secret_value" => config.tenant.secret_value = value.to_string(),

        // --- sync ---
        "sync.site_collections" => {
            config.sync.site_collections = value
                .split(',')
                .map(str::trim)
                .filter(|site| !site.is_empty())
                .map(str::to_string)
                .collect();
        }
        "sync.use_text_extraction_service" => {
            config.sync.use_text_extraction_service = parse_bool(value)?;
        }
        "sync.enable_document_level_security" => {
            config.sync.enable_document_level_security = parse_bool(value)?;
        }
        "sync.fetch_content" => config.sync.fetch_content = parse_bool(value)?,

        // --- http ---
        "http.concurrency" => {
            config.http.concurrency = value
                .parse::<usize>()
                .context("Expected a positive integer")?;
        }
        "http.max_attempts" => {
            config.http.max_attempts = value
                .parse::<u32>()
                .context("Expected a positive integer")?;
        }
        "http.default_retry_seconds" => {
            config.http.default_retry_seconds = value
                .parse::<u64>()
                .context("Expected a positive integer")?;
        }
        "http.override_url" => config.http.override_url = optional(value),

        // --- filtering ---
        "filtering.advanced_rules" => {
            config.filtering.advanced_rules = match optional(value) {
                Some(raw) => Some(
                    serde_json::from_str::<Value>(&raw)
                        .context("Expected a JSON object for filtering.advanced_rules")?,
                ),
                None => None,
            };
        }

        // --- indexer ---
        "indexer.host" => config.indexer.host = value.to_string(),
        "indexer.index" => config.indexer.index = value.to_string(),
        "indexer.api_key" => config.indexer.api_key = optional(value),
        "indexer.max_retries" => {
            config.indexer.max_retries = value
                .parse::<u32>()
                .context("Expected a positive integer")?;
        }
        "indexer.retry_interval" => {
            config.indexer.retry_interval = value
                .parse::<u64>()
                .context("Expected a positive integer")?;
        }
        "indexer.retry_strategy" => {
            config.indexer.retry_strategy = match value {
                "constant" => RetryStrategyConfig::Constant,
                "linear" => RetryStrategyConfig::Linear,
                "exponential" => RetryStrategyConfig::Exponential,
                other => anyhow::bail!(
                    "Unknown retry strategy '{other}'; expected constant, linear or exponential"
                ),
            };
        }
        "indexer.request_timeout" => {
            config.indexer.request_timeout = value
                .parse::<u64>()
                .context("Expected a positive integer")?;
        }
        "indexer.bulk_size" => {
            config.indexer.bulk_size = value
                .parse::<usize>()
                .context("Expected a positive integer")?;
        }

        // --- logging ---
        "logging.level" => config.logging.level = value.to_string(),

        _ => anyhow::bail!("Unknown configuration key: '{key}'"),
    }

    Ok(())
}
