//! Virtual network resolution.
//!
//! The network configurator only validates the caller's spec; whether each
//! referenced virtual network exists is checked here, against the cloud,
//! before anything is provisioned. The VM's location is taken from the
//! virtual network of the first configured network.

use async_trait::async_trait;
use azcpi_id::ResourceGroupName;
use azcpi_networking::NetworkConfiguration;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CpiError;

/// A virtual network as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetwork {
    pub name: String,
    pub resource_group: ResourceGroupName,
    pub location: String,
    #[serde(default)]
    pub address_space: Vec<String>,
}

/// Virtual network lookup.
#[async_trait]
pub trait VirtualNetworks: Send + Sync {
    /// Look up a virtual network; `None` if it does not exist.
    async fn get(
        &self,
        resource_group: &ResourceGroupName,
        name: &str,
    ) -> anyhow::Result<Option<VirtualNetwork>>;
}

/// Check every configured network's virtual network and return the location
/// of the first one.
///
/// Lookups run concurrently, but results are examined in configuration
/// order, so both the reported error and the chosen location are
/// deterministic.
pub async fn resolve_location(
    lookup: &dyn VirtualNetworks,
    networks: &NetworkConfiguration,
) -> Result<String, CpiError> {
    let lookups = networks
        .networks()
        .iter()
        .map(|n| lookup.get(&n.resource_group, &n.virtual_network_name));
    let results = join_all(lookups).await;

    let mut location = None;
    for (network, result) in networks.networks().iter().zip(results) {
        let vnet = result.map_err(CpiError::Backend)?.ok_or_else(|| {
            CpiError::VirtualNetworkNotFound {
                resource_group: network.resource_group.to_string(),
                name: network.virtual_network_name.clone(),
            }
        })?;

        debug!(
            network = %network.name,
            virtual_network = %vnet.name,
            location = %vnet.location,
            "Resolved virtual network"
        );

        location.get_or_insert(vnet.location);
    }

    // The configurator guarantees at least one network.
    location.ok_or(CpiError::Validation(
        azcpi_networking::NetworkError::NoPrimaryNetwork,
    ))
}
