//! azcpi
//!
//! Reads one CPI request from stdin, handles it, and writes the response
//! to stdout. Logs go to stderr.
//!
//! ## Architecture
//!
//! - **Config**: provider settings from `AZCPI_*` environment variables
//! - **Cloud**: in-memory until the vendor backend is wired, optionally
//!   seeded from the JSON fixture at `AZCPI_FIXTURE`
//! - **Registry**: HTTP client against `AZCPI_REGISTRY_ENDPOINT`

use std::sync::Arc;

use anyhow::{Context, Result};
use azcpi::config::Config;
use azcpi::fakes::{Fixture, InMemoryCloud};
use azcpi::protocol::{self, CpiRequest, CpiResponse, CLOUD_ERROR};
use azcpi::{logging, Orchestrator, RegistryClient};
use azcpi_id::StorageAccountName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(&config.log_level);

    info!(
        disk_mode = ?config.disk_mode,
        resource_group = %config.resource_group,
        registry = %config.registry.endpoint,
        "Configuration loaded"
    );

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read request from stdin")?;

    let response = match serde_json::from_str::<CpiRequest>(&input) {
        Ok(request) => {
            let orchestrator = build_orchestrator(&config).await?;
            protocol::handle(&orchestrator, request).await
        }
        Err(e) => {
            error!(error = %e, "Malformed request");
            CpiResponse::error(CLOUD_ERROR, format!("Malformed request: {e}"), false)
        }
    };

    let mut output = serde_json::to_vec(&response)?;
    output.push(b'\n');
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&output).await?;
    stdout.flush().await?;

    Ok(())
}

async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let fixture = match std::env::var("AZCPI_FIXTURE") {
        Ok(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read fixture {path}"))?;
            serde_json::from_str::<Fixture>(&raw)
                .with_context(|| format!("Failed to parse fixture {path}"))?
        }
        Err(_) => Fixture::default(),
    };

    // Under managed disks no storage account is ever selected; the name only
    // satisfies the in-memory selector.
    let default_account = match &config.default_storage_account {
        Some(account) => account.clone(),
        None => StorageAccountName::parse("managed")?,
    };

    let cloud = Arc::new(InMemoryCloud::from_fixture(default_account, fixture).await);
    let mut collaborators = cloud.collaborators();
    collaborators.registry = Arc::new(RegistryClient::new(
        &config.registry,
        config.operation_timeout,
    )?);

    Ok(Orchestrator::new(config.clone(), collaborators))
}
