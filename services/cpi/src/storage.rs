//! Storage account selection for unmanaged disks.

use async_trait::async_trait;
use azcpi_id::StorageAccountName;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::resources::ResourceSpec;

/// A storage account that will hold the VM's disks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAccount {
    pub name: StorageAccountName,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
}

/// Picks the storage account for a VM.
#[async_trait]
pub trait StorageAccountSelector: Send + Sync {
    async fn select(&self, spec: &ResourceSpec, location: &str) -> anyhow::Result<StorageAccount>;
}

/// Uses the account named in the resource spec, else a fixed default.
pub struct StaticStorageAccountSelector {
    default_account: StorageAccountName,
}

impl StaticStorageAccountSelector {
    pub fn new(default_account: StorageAccountName) -> Self {
        Self { default_account }
    }
}

#[async_trait]
impl StorageAccountSelector for StaticStorageAccountSelector {
    async fn select(&self, spec: &ResourceSpec, location: &str) -> anyhow::Result<StorageAccount> {
        let name = spec
            .storage_account_name
            .clone()
            .unwrap_or_else(|| self.default_account.clone());

        debug!(storage_account = %name, location, "Selected storage account");

        Ok(StorageAccount {
            name,
            location: location.to_string(),
            account_type: spec.storage_account_type.clone(),
        })
    }
}
