//! VM creation.
//!
//! `create_vm` is a multi-step transaction over independent backends with no
//! native atomicity:
//!
//! 1. validate the network spec and resource spec
//! 2. check every virtual network exists; the first one fixes the location
//! 3. pick a storage account (unmanaged disks only)
//! 4. resolve the stemcell to image metadata
//! 5. provision the VM
//! 6. write the agent settings to the registry (commit point)
//!
//! Steps 1-4 leave nothing behind when they fail. If step 6 fails, or step 5
//! times out or is cancelled after the backend may already have allocated
//! the VM, the VM is deleted before the error is returned; if that delete
//! fails too, the VM is leaked and reported as [`CpiError::Orphaned`].

use std::sync::Arc;

use azcpi_id::{AgentId, InstanceId, StemcellId};
use azcpi_networking::NetworkConfiguration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::CpiError;
use crate::network::{self, VirtualNetworks};
use crate::provisioner::{VmCreateParams, VmProvisioner};
use crate::registry::{AgentSettings, Registry};
use crate::remote::RemoteCalls;
use crate::resources::ResourceSpec;
use crate::stemcell::{
    DiskPlacement, LightStemcellStore, StemcellKind, StemcellResolver, StemcellStore, UserImages,
};
use crate::storage::StorageAccountSelector;

/// The external systems VM creation talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub virtual_networks: Arc<dyn VirtualNetworks>,
    pub storage_accounts: Arc<dyn StorageAccountSelector>,
    pub stemcells: Arc<dyn StemcellStore>,
    pub light_stemcells: Arc<dyn LightStemcellStore>,
    pub user_images: Arc<dyn UserImages>,
    pub vms: Arc<dyn VmProvisioner>,
    pub registry: Arc<dyn Registry>,
}

/// Arguments of `create_vm`.
#[derive(Debug, Clone)]
pub struct CreateVmRequest {
    pub agent_id: AgentId,
    pub stemcell_id: StemcellId,
    /// Raw resource spec (cloud properties).
    pub resource_spec: serde_json::Value,
    /// Raw network spec.
    pub networks: serde_json::Value,
    /// Disk ids the VM should be placed near. Accepted for interface
    /// compatibility; placement does not use it.
    pub disk_locality: Vec<String>,
    pub environment: serde_json::Value,
}

/// Orchestrates VM creation.
pub struct Orchestrator {
    config: Config,
    virtual_networks: Arc<dyn VirtualNetworks>,
    storage_accounts: Arc<dyn StorageAccountSelector>,
    stemcells: StemcellResolver,
    vms: Arc<dyn VmProvisioner>,
    registry: Arc<dyn Registry>,
}

impl Orchestrator {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        Self {
            config,
            virtual_networks: collaborators.virtual_networks,
            storage_accounts: collaborators.storage_accounts,
            stemcells: StemcellResolver::new(
                collaborators.stemcells,
                collaborators.light_stemcells,
                collaborators.user_images,
            ),
            vms: collaborators.vms,
            registry: collaborators.registry,
        }
    }

    /// Create a VM and register it, returning its instance id.
    pub async fn create_vm(&self, request: CreateVmRequest) -> Result<InstanceId, CpiError> {
        // Never cancelled: the sender is dropped immediately.
        let (_, cancel) = watch::channel(false);
        self.create_vm_with_cancel(request, cancel).await
    }

    /// Create a VM, aborting at the next remote call once `cancel` turns `true`.
    ///
    /// Cancellation after the VM exists still rolls it back.
    pub async fn create_vm_with_cancel(
        &self,
        request: CreateVmRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<InstanceId, CpiError> {
        let mut calls = RemoteCalls::new(self.config.operation_timeout, cancel);
        let CreateVmRequest {
            agent_id,
            stemcell_id,
            resource_spec,
            networks: network_spec,
            disk_locality,
            environment,
        } = request;

        info!(
            agent_id = %agent_id,
            stemcell_id = %stemcell_id,
            disk_mode = ?self.config.disk_mode,
            disk_locality = ?disk_locality,
            "Creating VM"
        );

        let networks = NetworkConfiguration::new(&self.config.network_defaults(), &network_spec)?;
        let resource_spec = ResourceSpec::from_value(&resource_spec)?;
        debug!(
            primary_network = %networks.primary().name,
            networks = networks.networks().len(),
            "Network configuration validated"
        );

        let location = calls
            .call(
                "virtual network lookup",
                network::resolve_location(self.virtual_networks.as_ref(), &networks),
            )
            .await?;

        let storage_account = if self.config.disk_mode.is_managed() {
            None
        } else {
            Some(
                calls
                    .call("storage account selection", async {
                        self.storage_accounts
                            .select(&resource_spec, &location)
                            .await
                            .map_err(CpiError::Backend)
                    })
                    .await?,
            )
        };

        let (instance_id, placement) = match &storage_account {
            Some(account) => (
                InstanceId::unmanaged(&account.name, &agent_id),
                DiskPlacement::StorageAccount(&account.name),
            ),
            None => (InstanceId::managed(&agent_id), DiskPlacement::Managed),
        };

        let stemcell = StemcellKind::classify(stemcell_id);
        let image = self
            .stemcells
            .resolve(&mut calls, &stemcell, &location, placement)
            .await?;

        let params = VmCreateParams {
            instance_id: &instance_id,
            location: &location,
            image: &image,
            resource_spec: &resource_spec,
            networks: &networks,
            environment: &environment,
            storage_account: storage_account.as_ref(),
        };
        let created = calls
            .call("vm creation", async {
                self.vms.create(params).await.map_err(CpiError::Backend)
            })
            .await;
        let vm = match created {
            Ok(vm) => vm,
            // The backend may have allocated the VM before the call was
            // abandoned.
            Err(cause @ (CpiError::Timeout { .. } | CpiError::Cancelled { .. })) => {
                return Err(self.roll_back(&calls, &instance_id, cause).await);
            }
            Err(e) => return Err(e),
        };

        if vm.instance_id != instance_id {
            warn!(
                expected = %instance_id,
                actual = %vm.instance_id,
                "Provisioner returned a different instance id"
            );
        }

        let settings = AgentSettings::initial(
            &agent_id,
            &instance_id,
            &vm,
            &network_spec,
            &environment,
            &self.config.agent,
        );
        self.register(&mut calls, &instance_id, &settings).await?;

        info!(
            agent_id = %agent_id,
            instance_id = %instance_id,
            location = %vm.location,
            "VM created"
        );
        Ok(instance_id)
    }

    /// Write the agent settings; on failure delete the VM and report why.
    async fn register(
        &self,
        calls: &mut RemoteCalls,
        instance_id: &InstanceId,
        settings: &AgentSettings,
    ) -> Result<(), CpiError> {
        let result = calls
            .call("registry update", async {
                self.registry
                    .update_settings(instance_id, settings)
                    .await
                    .map_err(CpiError::Registry)
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(cause) => Err(self.roll_back(calls, instance_id, cause).await),
        }
    }

    /// Delete a VM whose creation could not be completed.
    ///
    /// Returns [`CpiError::RolledBack`] if the delete succeeded and
    /// [`CpiError::Orphaned`] if it did not.
    async fn roll_back(
        &self,
        calls: &RemoteCalls,
        instance_id: &InstanceId,
        cause: CpiError,
    ) -> CpiError {
        warn!(
            instance_id = %instance_id,
            error = %cause,
            "VM creation did not complete, deleting VM"
        );

        let cleanup = calls
            .call_uncancellable("vm deletion", async {
                self.vms
                    .delete(instance_id)
                    .await
                    .map_err(CpiError::Backend)
            })
            .await;

        match cleanup {
            Ok(()) => {
                info!(instance_id = %instance_id, "VM deleted after failed creation");
                CpiError::RolledBack {
                    instance_id: instance_id.clone(),
                    cause: Box::new(cause),
                }
            }
            Err(cleanup) => {
                error!(
                    instance_id = %instance_id,
                    error = %cleanup,
                    cause = %cause,
                    "Failed to delete VM after failed creation; VM is orphaned"
                );
                CpiError::Orphaned {
                    instance_id: instance_id.clone(),
                    cause: Box::new(cause),
                    cleanup: Box::new(cleanup),
                }
            }
        }
    }
}
