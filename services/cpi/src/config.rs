//! Configuration for the CPI.
//!
//! Provider-level settings are fixed per deployment, so they are loaded once
//! and handed to the orchestrator explicitly. Nothing reads the environment
//! after startup.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use azcpi_id::{ResourceGroupName, StorageAccountName};
use azcpi_networking::NetworkDefaults;

/// Default bound on each remote call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Where VM disks live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskMode {
    /// Disks are page blobs in a caller-owned storage account.
    Unmanaged,
    /// Disks are vendor-managed resources.
    Managed,
}

impl DiskMode {
    pub fn from_use_managed_disks(use_managed_disks: bool) -> Self {
        if use_managed_disks {
            DiskMode::Managed
        } else {
            DiskMode::Unmanaged
        }
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, DiskMode::Managed)
    }
}

/// Registry endpoint and credentials.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL (example: http://10.0.0.10:25777).
    pub endpoint: String,
    pub user: String,
    pub password: String,
}

/// Agent properties merged into every registry entry.
#[derive(Debug, Clone, Default)]
pub struct AgentProperties {
    pub mbus: Option<String>,
    pub ntp: Vec<String>,
    pub blobstore: Option<serde_json::Value>,
}

/// CPI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Managed vs unmanaged disks.
    pub disk_mode: DiskMode,

    /// Resource group networks default to.
    pub resource_group: ResourceGroupName,

    /// Storage account used when a resource spec does not name one.
    pub default_storage_account: Option<StorageAccountName>,

    pub registry: RegistryConfig,

    pub agent: AgentProperties,

    /// Bound on each remote call.
    pub operation_timeout: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let disk_mode = DiskMode::from_use_managed_disks(
            lookup("AZCPI_USE_MANAGED_DISKS")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        );

        let resource_group = lookup("AZCPI_RESOURCE_GROUP")
            .context("Missing resource group. Set AZCPI_RESOURCE_GROUP.")?;
        let resource_group = ResourceGroupName::parse(&resource_group)
            .context("AZCPI_RESOURCE_GROUP is not a valid resource group name.")?;

        let default_storage_account = lookup("AZCPI_DEFAULT_STORAGE_ACCOUNT")
            .map(|v| StorageAccountName::parse(&v))
            .transpose()
            .context("AZCPI_DEFAULT_STORAGE_ACCOUNT is not a valid storage account name.")?;

        if disk_mode == DiskMode::Unmanaged && default_storage_account.is_none() {
            bail!("AZCPI_DEFAULT_STORAGE_ACCOUNT is required when managed disks are disabled.");
        }

        let registry = RegistryConfig {
            endpoint: lookup("AZCPI_REGISTRY_ENDPOINT")
                .unwrap_or_else(|| "http://127.0.0.1:25777".to_string()),
            user: lookup("AZCPI_REGISTRY_USER").unwrap_or_else(|| "admin".to_string()),
            password: lookup("AZCPI_REGISTRY_PASSWORD").unwrap_or_default(),
        };

        let blobstore = lookup("AZCPI_AGENT_BLOBSTORE")
            .map(|v| serde_json::from_str(&v))
            .transpose()
            .context("AZCPI_AGENT_BLOBSTORE must be a JSON object.")?;

        let agent = AgentProperties {
            mbus: lookup("AZCPI_AGENT_MBUS"),
            ntp: lookup("AZCPI_AGENT_NTP")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            blobstore,
        };

        let operation_timeout = lookup("AZCPI_OPERATION_TIMEOUT_SECS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("AZCPI_OPERATION_TIMEOUT_SECS must be an integer (seconds).")?
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT);

        let log_level = lookup("AZCPI_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            disk_mode,
            resource_group,
            default_storage_account,
            registry,
            agent,
            operation_timeout,
            log_level,
        })
    }

    /// Defaults handed to the network configurator.
    pub fn network_defaults(&self) -> NetworkDefaults {
        NetworkDefaults {
            resource_group: self.resource_group.clone(),
        }
    }
}
