//! Connector dispatch: build a configured connector or a full batched run.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::batch::BatchedRun;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::connector_export::ExportConnector;
use crate::connector_fs::DirectoryConnector;
use crate::connector_messaging::{MessagingConnector, TOKEN_ENV_VAR};
use crate::traits::Connector;

/// Construct the named connector from config. The messaging connector
/// picks its credential up from `MESSAGING_BOT_TOKEN` when present;
/// otherwise it is built credential-less and fails on first use.
pub fn connector_from_config(config: &Config, name: &str) -> Result<Box<dyn Connector>> {
    match name {
        "directory" => {
            let cfg = config
                .connectors
                .directory
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Directory connector not configured"))?;
            Ok(Box::new(DirectoryConnector::new(cfg)))
        }
        "messaging" => {
            let cfg = config
                .connectors
                .messaging
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Messaging connector not configured"))?;
            let mut connector = MessagingConnector::new(cfg);
            if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
                connector.load_credentials(&token);
            }
            Ok(Box::new(connector))
        }
        "export" => {
            let cfg = config
                .connectors
                .export
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Export connector not configured"))?;
            Ok(Box::new(ExportConnector::new(cfg)))
        }
        _ => bail!(
            "Unknown connector: '{}'. Available: directory, messaging, export",
            name
        ),
    }
}

/// Build a ready-to-drive batched run for the named connector.
pub fn batched_run(
    config: &Config,
    store: Arc<dyn CheckpointStore>,
    connector_name: &str,
) -> Result<BatchedRun> {
    let connector = connector_from_config(config, connector_name)?;
    Ok(BatchedRun::new(
        connector,
        store,
        config.ingest.batch_size,
        config.ingest.max_batches,
    ))
}
