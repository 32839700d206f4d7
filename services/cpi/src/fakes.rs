//! In-memory cloud for testing and development.
//!
//! [`InMemoryCloud`] implements every collaborator the orchestrator needs
//! and records each call it receives, so tests can assert which backends
//! were (or were not) consulted. Individual operations can be told to fail.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use azcpi_id::{InstanceId, ResourceGroupName, StemcellId, StorageAccountName};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::network::{VirtualNetwork, VirtualNetworks};
use crate::orchestrator::Collaborators;
use crate::provisioner::{VmCreateParams, VmProvisioner, VmRecord};
use crate::registry::{AgentSettings, Registry};
use crate::resources::ResourceSpec;
use crate::stemcell::{ImageMetadata, LightStemcellStore, StemcellStore, UserImages};
use crate::storage::{StaticStorageAccountSelector, StorageAccount, StorageAccountSelector};

/// A call received by the in-memory cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    GetVirtualNetwork {
        resource_group: String,
        name: String,
    },
    SelectStorageAccount {
        location: String,
    },
    StemcellExists {
        storage_account: String,
        stemcell_id: String,
    },
    StemcellInfo {
        storage_account: String,
        stemcell_id: String,
    },
    LightStemcellExists {
        location: String,
        stemcell_id: String,
    },
    LightStemcellInfo {
        stemcell_id: String,
    },
    UserImageInfo {
        stemcell_id: String,
        location: String,
    },
    CreateVm {
        instance_id: String,
        location: String,
    },
    DeleteVm {
        instance_id: String,
    },
    UpdateSettings {
        instance_id: String,
    },
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    GetVirtualNetwork,
    StemcellInfo,
    UserImageInfo,
    CreateVm,
    DeleteVm,
    UpdateSettings,
}

/// A light stemcell available in one location.
#[derive(Debug, Clone, Deserialize)]
pub struct LightStemcellEntry {
    pub location: String,
    pub image: ImageMetadata,
}

/// A heavy stemcell stored in one storage account.
#[derive(Debug, Clone, Deserialize)]
pub struct StemcellEntry {
    pub storage_account: StorageAccountName,
    pub image: ImageMetadata,
}

/// Seed data for the in-memory cloud.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub virtual_networks: Vec<VirtualNetwork>,
    pub stemcells: Vec<StemcellEntry>,
    pub light_stemcells: Vec<LightStemcellEntry>,
    pub user_images: Vec<ImageMetadata>,
}

#[derive(Default)]
struct CloudState {
    vnets: HashMap<(String, String), VirtualNetwork>,
    stemcells: HashMap<(String, String), ImageMetadata>,
    light_stemcells: HashMap<String, LightStemcellEntry>,
    user_images: HashMap<String, ImageMetadata>,
    vms: HashMap<String, VmRecord>,
    settings: HashMap<String, AgentSettings>,
    failures: HashMap<FailPoint, String>,
    create_delay: Option<Duration>,
    create_stall: Option<Duration>,
    registry_delay: Option<Duration>,
    ephemeral_disk: bool,
}

/// In-memory implementation of every cloud collaborator.
pub struct InMemoryCloud {
    selector: StaticStorageAccountSelector,
    state: RwLock<CloudState>,
    calls: RwLock<Vec<CloudCall>>,
}

impl InMemoryCloud {
    /// Create an empty cloud whose default storage account is `default_account`.
    pub fn new(default_account: StorageAccountName) -> Self {
        Self {
            selector: StaticStorageAccountSelector::new(default_account),
            state: RwLock::new(CloudState::default()),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Create a cloud seeded from a fixture.
    pub async fn from_fixture(default_account: StorageAccountName, fixture: Fixture) -> Self {
        let cloud = Self::new(default_account);
        for vnet in fixture.virtual_networks {
            cloud.add_virtual_network(vnet).await;
        }
        for entry in fixture.stemcells {
            cloud.add_stemcell(&entry.storage_account, entry.image).await;
        }
        for entry in fixture.light_stemcells {
            cloud.add_light_stemcell(&entry.location, entry.image).await;
        }
        for image in fixture.user_images {
            cloud.add_user_image(image).await;
        }
        cloud
    }

    /// Wire this cloud in as every collaborator.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            virtual_networks: self.clone(),
            storage_accounts: self.clone(),
            stemcells: self.clone(),
            light_stemcells: self.clone(),
            user_images: self.clone(),
            vms: self.clone(),
            registry: self.clone(),
        }
    }

    pub async fn add_virtual_network(&self, vnet: VirtualNetwork) {
        let key = (vnet.resource_group.to_string(), vnet.name.clone());
        self.state.write().await.vnets.insert(key, vnet);
    }

    pub async fn add_stemcell(&self, account: &StorageAccountName, image: ImageMetadata) {
        let key = (account.to_string(), image.stemcell_id.to_string());
        self.state.write().await.stemcells.insert(key, image);
    }

    pub async fn add_light_stemcell(&self, location: &str, image: ImageMetadata) {
        let entry = LightStemcellEntry {
            location: location.to_string(),
            image,
        };
        self.state
            .write()
            .await
            .light_stemcells
            .insert(entry.image.stemcell_id.to_string(), entry);
    }

    pub async fn add_user_image(&self, image: ImageMetadata) {
        self.state
            .write()
            .await
            .user_images
            .insert(image.stemcell_id.to_string(), image);
    }

    /// Make an operation fail with `message`.
    pub async fn fail(&self, point: FailPoint, message: &str) {
        self.state
            .write()
            .await
            .failures
            .insert(point, message.to_string());
    }

    /// Delay every VM creation.
    pub async fn set_create_delay(&self, delay: Duration) {
        self.state.write().await.create_delay = Some(delay);
    }

    /// Allocate each VM, then delay the reply to the caller.
    pub async fn set_create_stall(&self, stall: Duration) {
        self.state.write().await.create_stall = Some(stall);
    }

    /// Delay every registry update.
    pub async fn set_registry_delay(&self, delay: Duration) {
        self.state.write().await.registry_delay = Some(delay);
    }

    /// Report an ephemeral disk on created VMs.
    pub async fn set_ephemeral_disk(&self, ephemeral_disk: bool) {
        self.state.write().await.ephemeral_disk = ephemeral_disk;
    }

    /// All calls received so far, in order.
    pub async fn calls(&self) -> Vec<CloudCall> {
        self.calls.read().await.clone()
    }

    /// Number of recorded calls matching a predicate.
    pub async fn count_calls(&self, predicate: impl Fn(&CloudCall) -> bool) -> usize {
        self.calls.read().await.iter().filter(|c| predicate(c)).count()
    }

    /// VMs currently allocated.
    pub async fn vm(&self, instance_id: &str) -> Option<VmRecord> {
        self.state.read().await.vms.get(instance_id).cloned()
    }

    pub async fn vm_count(&self) -> usize {
        self.state.read().await.vms.len()
    }

    /// Settings stored in the registry.
    pub async fn settings(&self, instance_id: &str) -> Option<AgentSettings> {
        self.state.read().await.settings.get(instance_id).cloned()
    }

    async fn record(&self, call: CloudCall) {
        self.calls.write().await.push(call);
    }

    async fn check(&self, point: FailPoint) -> Result<()> {
        match self.state.read().await.failures.get(&point) {
            Some(message) => Err(anyhow::anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VirtualNetworks for InMemoryCloud {
    async fn get(
        &self,
        resource_group: &ResourceGroupName,
        name: &str,
    ) -> Result<Option<VirtualNetwork>> {
        self.record(CloudCall::GetVirtualNetwork {
            resource_group: resource_group.to_string(),
            name: name.to_string(),
        })
        .await;
        self.check(FailPoint::GetVirtualNetwork).await?;

        let key = (resource_group.to_string(), name.to_string());
        Ok(self.state.read().await.vnets.get(&key).cloned())
    }
}

#[async_trait]
impl StorageAccountSelector for InMemoryCloud {
    async fn select(&self, spec: &ResourceSpec, location: &str) -> Result<StorageAccount> {
        self.record(CloudCall::SelectStorageAccount {
            location: location.to_string(),
        })
        .await;
        self.selector.select(spec, location).await
    }
}

#[async_trait]
impl StemcellStore for InMemoryCloud {
    async fn exists(&self, storage_account: &StorageAccountName, stemcell_id: &StemcellId) -> Result<bool> {
        self.record(CloudCall::StemcellExists {
            storage_account: storage_account.to_string(),
            stemcell_id: stemcell_id.to_string(),
        })
        .await;

        let key = (storage_account.to_string(), stemcell_id.to_string());
        Ok(self.state.read().await.stemcells.contains_key(&key))
    }

    async fn info(&self, storage_account: &StorageAccountName, stemcell_id: &StemcellId) -> Result<ImageMetadata> {
        self.record(CloudCall::StemcellInfo {
            storage_account: storage_account.to_string(),
            stemcell_id: stemcell_id.to_string(),
        })
        .await;
        self.check(FailPoint::StemcellInfo).await?;

        let key = (storage_account.to_string(), stemcell_id.to_string());
        self.state
            .read()
            .await
            .stemcells
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("stemcell `{stemcell_id}' not found in `{storage_account}'"))
    }
}

#[async_trait]
impl LightStemcellStore for InMemoryCloud {
    async fn exists(&self, location: &str, stemcell_id: &StemcellId) -> Result<bool> {
        self.record(CloudCall::LightStemcellExists {
            location: location.to_string(),
            stemcell_id: stemcell_id.to_string(),
        })
        .await;

        Ok(self
            .state
            .read()
            .await
            .light_stemcells
            .get(stemcell_id.as_str())
            .is_some_and(|entry| entry.location == location))
    }

    async fn info(&self, stemcell_id: &StemcellId) -> Result<ImageMetadata> {
        self.record(CloudCall::LightStemcellInfo {
            stemcell_id: stemcell_id.to_string(),
        })
        .await;
        self.check(FailPoint::StemcellInfo).await?;

        self.state
            .read()
            .await
            .light_stemcells
            .get(stemcell_id.as_str())
            .map(|entry| entry.image.clone())
            .ok_or_else(|| anyhow::anyhow!("light stemcell `{stemcell_id}' not found"))
    }
}

#[async_trait]
impl UserImages for InMemoryCloud {
    async fn info(&self, stemcell_id: &StemcellId, location: &str) -> Result<ImageMetadata> {
        self.record(CloudCall::UserImageInfo {
            stemcell_id: stemcell_id.to_string(),
            location: location.to_string(),
        })
        .await;
        self.check(FailPoint::UserImageInfo).await?;

        self.state
            .read()
            .await
            .user_images
            .get(stemcell_id.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("stemcell blob `{stemcell_id}' not found"))
    }
}

#[async_trait]
impl VmProvisioner for InMemoryCloud {
    async fn create(&self, params: VmCreateParams<'_>) -> Result<VmRecord> {
        self.record(CloudCall::CreateVm {
            instance_id: params.instance_id.to_string(),
            location: params.location.to_string(),
        })
        .await;

        let delay = self.state.read().await.create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(FailPoint::CreateVm).await?;

        info!(
            instance_id = %params.instance_id,
            location = %params.location,
            instance_type = %params.resource_spec.instance_type,
            "[IN-MEMORY] Creating VM"
        );

        let mut state = self.state.write().await;
        let stall = state.create_stall;
        let mut extra = serde_json::Map::new();
        extra.insert(
            "instance_type".to_string(),
            params.resource_spec.instance_type.clone().into(),
        );
        if let Some(size) = params.resource_spec.root_disk_size_mib() {
            extra.insert("root_disk_size_mib".to_string(), size.into());
        }
        let record = VmRecord {
            instance_id: params.instance_id.clone(),
            location: params.location.to_string(),
            ephemeral_disk: state.ephemeral_disk,
            params: extra,
        };
        state
            .vms
            .insert(params.instance_id.to_string(), record.clone());
        drop(state);

        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(record)
    }

    async fn delete(&self, instance_id: &InstanceId) -> Result<()> {
        self.record(CloudCall::DeleteVm {
            instance_id: instance_id.to_string(),
        })
        .await;
        self.check(FailPoint::DeleteVm).await?;

        info!(instance_id = %instance_id, "[IN-MEMORY] Deleting VM");
        self.state.write().await.vms.remove(instance_id.as_str());
        Ok(())
    }
}

#[async_trait]
impl Registry for InMemoryCloud {
    async fn update_settings(&self, instance_id: &InstanceId, settings: &AgentSettings) -> Result<()> {
        self.record(CloudCall::UpdateSettings {
            instance_id: instance_id.to_string(),
        })
        .await;
        let delay = self.state.read().await.registry_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(FailPoint::UpdateSettings).await?;

        self.state
            .write()
            .await
            .settings
            .insert(instance_id.to_string(), settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> StorageAccountName {
        StorageAccountName::parse("mockstorage").unwrap()
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cloud = InMemoryCloud::new(account());
        let id = InstanceId::parse("mockstorage-agent").unwrap();

        cloud.delete(&id).await.unwrap();
        cloud.delete(&id).await.unwrap();
        assert_eq!(
            cloud.count_calls(|c| matches!(c, CloudCall::DeleteVm { .. })).await,
            2
        );
    }

    #[tokio::test]
    async fn test_fail_point() {
        let cloud = InMemoryCloud::new(account());
        cloud.fail(FailPoint::DeleteVm, "delete exploded").await;

        let id = InstanceId::parse("mockstorage-agent").unwrap();
        let err = cloud.delete(&id).await.unwrap_err();
        assert_eq!(err.to_string(), "delete exploded");
    }

    #[tokio::test]
    async fn test_fixture_seeding() {
        let fixture: Fixture = serde_json::from_value(serde_json::json!({
            "virtual_networks": [
                { "name": "vnet", "resource_group": "bosh-rg", "location": "westus" }
            ],
            "light_stemcells": [{
                "location": "westus",
                "image": {
                    "stemcell_id": "bosh-light-stemcell-xxx",
                    "source": { "type": "marketplace", "publisher": "p", "offer": "o", "sku": "s", "version": "1" }
                }
            }],
        }))
        .unwrap();

        let cloud = InMemoryCloud::from_fixture(account(), fixture).await;
        let rg = ResourceGroupName::parse("bosh-rg").unwrap();
        assert!(cloud.get(&rg, "vnet").await.unwrap().is_some());

        let light = StemcellId::parse("bosh-light-stemcell-xxx").unwrap();
        assert!(LightStemcellStore::exists(&cloud, "westus", &light).await.unwrap());
        assert!(!LightStemcellStore::exists(&cloud, "eastus", &light).await.unwrap());
    }
}
