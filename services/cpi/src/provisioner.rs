//! VM provisioner interface.
//!
//! The provisioner abstracts the cloud calls that allocate and remove a
//! virtual machine:
//! - `create` allocates the VM from resolved inputs
//! - `delete` removes it again; the orchestrator only calls it to undo a
//!   creation whose registry update failed

use async_trait::async_trait;
use azcpi_id::InstanceId;
use azcpi_networking::NetworkConfiguration;
use serde::{Deserialize, Serialize};

use crate::resources::ResourceSpec;
use crate::stemcell::ImageMetadata;
use crate::storage::StorageAccount;

/// Everything the provisioner needs to allocate a VM.
#[derive(Debug, Clone, Copy)]
pub struct VmCreateParams<'a> {
    pub instance_id: &'a InstanceId,
    pub location: &'a str,
    pub image: &'a ImageMetadata,
    pub resource_spec: &'a ResourceSpec,
    pub networks: &'a NetworkConfiguration,
    pub environment: &'a serde_json::Value,
    /// Set under unmanaged disks.
    pub storage_account: Option<&'a StorageAccount>,
}

/// A provisioned VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    pub instance_id: InstanceId,
    pub location: String,
    /// Whether an ephemeral data disk was attached.
    #[serde(default)]
    pub ephemeral_disk: bool,
    /// Provider-returned parameters.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// VM provisioning interface.
#[async_trait]
pub trait VmProvisioner: Send + Sync {
    /// Allocate a VM.
    async fn create(&self, params: VmCreateParams<'_>) -> anyhow::Result<VmRecord>;

    /// Delete a VM. Deleting a VM that no longer exists succeeds.
    async fn delete(&self, instance_id: &InstanceId) -> anyhow::Result<()>;
}
