//! Validate command - Check credentials, tenant and sites remotely

use std::path::Path;

use anyhow::Result;
use clap::Args;
use spindex_graph::wait::CancellableWait;
use spindex_sync::connector::SharepointConnector;
use tracing::info;

use super::{cancel_on_shutdown, load_valid_config};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct ValidateCommand {}

impl ValidateCommand {
    /// Execute the validate command
    ///
    /// Fails with the connector's message when the tenant is unknown, the
    /// credentials are rejected or configured sites do not exist.
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_valid_config(config_path)?;
        let tenant = config.tenant.tenant_name.clone();
        let sites = config.sync.site_collections.clone();
        info!(tenant = %tenant, "Validating connection");

        let wait = CancellableWait::new();
        cancel_on_shutdown(wait.clone());
        let connector = SharepointConnector::new(config, wait)?;

        match connector.validate().await {
            Ok(()) => {
                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::json!({
                        "valid": true,
                        "tenant": tenant,
                        "sites": sites,
                    }));
                } else {
                    formatter.success(&format!("Connected to tenant {tenant}"));
                    formatter.info(&format!("Sites: {}", sites.join(", ")));
                }
                Ok(())
            }
            Err(e) => {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "tenant": tenant,
                    "error": e.to_string(),
                }));
                Err(e.into())
            }
        }
    }
}
