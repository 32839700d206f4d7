//! Stemcell resolution.
//!
//! A stemcell id names either a heavy stemcell (a VHD stored as a page blob
//! in a storage account) or a light stemcell (a pointer to a marketplace
//! image). The kind is decided once from the id; resolution then depends on
//! the kind and on the disk mode:
//!
//! | disk mode | kind  | path                                                 |
//! |-----------|-------|------------------------------------------------------|
//! | unmanaged | heavy | blob lookup in the selected storage account          |
//! | unmanaged | light | marketplace lookup in the location                   |
//! | managed   | heavy | user image built from the stemcell blob              |
//! | managed   | light | marketplace lookup in the location (same as above)   |

use std::sync::Arc;

use async_trait::async_trait;
use azcpi_id::{StemcellId, StorageAccountName};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CpiError;
use crate::remote::RemoteCalls;

/// Light stemcell ids start with this prefix.
pub const LIGHT_STEMCELL_PREFIX: &str = "bosh-light-stemcell";

/// A stemcell id, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StemcellKind {
    Heavy(StemcellId),
    Light(StemcellId),
}

impl StemcellKind {
    /// Classify a stemcell id by its prefix.
    pub fn classify(id: StemcellId) -> Self {
        if id.as_str().starts_with(LIGHT_STEMCELL_PREFIX) {
            StemcellKind::Light(id)
        } else {
            StemcellKind::Heavy(id)
        }
    }

    pub fn id(&self) -> &StemcellId {
        match self {
            StemcellKind::Heavy(id) | StemcellKind::Light(id) => id,
        }
    }

    pub fn is_light(&self) -> bool {
        matches!(self, StemcellKind::Light(_))
    }
}

/// Where the VM image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// VHD page blob in a storage account.
    Blob {
        storage_account: StorageAccountName,
        uri: String,
    },
    /// Managed user image.
    UserImage { id: String },
    /// Marketplace image reference.
    Marketplace {
        publisher: String,
        offer: String,
        sku: String,
        version: String,
    },
}

/// Resolved image metadata, ready for provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub stemcell_id: StemcellId,
    pub source: ImageSource,
    /// Guest OS family (e.g. `linux`).
    #[serde(default = "default_os_type")]
    pub os_type: String,
    /// Minimum root disk size in MiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_mib: Option<u64>,
}

fn default_os_type() -> String {
    "linux".to_string()
}

/// Heavy stemcells stored as blobs.
#[async_trait]
pub trait StemcellStore: Send + Sync {
    async fn exists(
        &self,
        storage_account: &StorageAccountName,
        stemcell_id: &StemcellId,
    ) -> anyhow::Result<bool>;

    async fn info(
        &self,
        storage_account: &StorageAccountName,
        stemcell_id: &StemcellId,
    ) -> anyhow::Result<ImageMetadata>;
}

/// Light stemcells backed by marketplace images.
#[async_trait]
pub trait LightStemcellStore: Send + Sync {
    async fn exists(&self, location: &str, stemcell_id: &StemcellId) -> anyhow::Result<bool>;

    async fn info(&self, stemcell_id: &StemcellId) -> anyhow::Result<ImageMetadata>;
}

/// User images for heavy stemcells under managed disks.
#[async_trait]
pub trait UserImages: Send + Sync {
    /// Return (creating if needed) the user image for a stemcell in a location.
    async fn info(&self, stemcell_id: &StemcellId, location: &str) -> anyhow::Result<ImageMetadata>;
}

/// Disk placement chosen before stemcell resolution.
#[derive(Debug, Clone, Copy)]
pub enum DiskPlacement<'a> {
    /// Unmanaged disks in this storage account.
    StorageAccount(&'a StorageAccountName),
    Managed,
}

/// Resolves a stemcell to image metadata.
pub struct StemcellResolver {
    stemcells: Arc<dyn StemcellStore>,
    light_stemcells: Arc<dyn LightStemcellStore>,
    user_images: Arc<dyn UserImages>,
}

impl StemcellResolver {
    pub fn new(
        stemcells: Arc<dyn StemcellStore>,
        light_stemcells: Arc<dyn LightStemcellStore>,
        user_images: Arc<dyn UserImages>,
    ) -> Self {
        Self {
            stemcells,
            light_stemcells,
            user_images,
        }
    }

    pub async fn resolve(
        &self,
        calls: &mut RemoteCalls,
        stemcell: &StemcellKind,
        location: &str,
        placement: DiskPlacement<'_>,
    ) -> Result<ImageMetadata, CpiError> {
        let image = match (stemcell, placement) {
            (StemcellKind::Light(id), _) => self.resolve_light(calls, id, location).await?,
            (StemcellKind::Heavy(id), DiskPlacement::StorageAccount(account)) => {
                self.resolve_heavy(calls, id, account).await?
            }
            (StemcellKind::Heavy(id), DiskPlacement::Managed) => {
                self.resolve_user_image(calls, id, location).await?
            }
        };

        info!(
            stemcell_id = %stemcell.id(),
            light = stemcell.is_light(),
            location,
            "Resolved stemcell"
        );
        Ok(image)
    }

    async fn resolve_heavy(
        &self,
        calls: &mut RemoteCalls,
        id: &StemcellId,
        account: &StorageAccountName,
    ) -> Result<ImageMetadata, CpiError> {
        let exists = calls
            .call("stemcell lookup", async {
                self.stemcells
                    .exists(account, id)
                    .await
                    .map_err(CpiError::Backend)
            })
            .await?;
        if !exists {
            return Err(CpiError::StemcellNotFound(id.clone()));
        }

        debug!(stemcell_id = %id, storage_account = %account, "Fetching stemcell info");
        calls
            .call("stemcell info", async {
                self.stemcells
                    .info(account, id)
                    .await
                    .map_err(CpiError::Backend)
            })
            .await
    }

    async fn resolve_light(
        &self,
        calls: &mut RemoteCalls,
        id: &StemcellId,
        location: &str,
    ) -> Result<ImageMetadata, CpiError> {
        let exists = calls
            .call("light stemcell lookup", async {
                self.light_stemcells
                    .exists(location, id)
                    .await
                    .map_err(CpiError::Backend)
            })
            .await?;
        if !exists {
            return Err(CpiError::StemcellNotFound(id.clone()));
        }

        calls
            .call("light stemcell info", async {
                self.light_stemcells
                    .info(id)
                    .await
                    .map_err(CpiError::Backend)
            })
            .await
    }

    async fn resolve_user_image(
        &self,
        calls: &mut RemoteCalls,
        id: &StemcellId,
        location: &str,
    ) -> Result<ImageMetadata, CpiError> {
        calls
            .call("user image info", async {
                self.user_images
                    .info(id, location)
                    .await
                    .map_err(|source| CpiError::UserImage {
                        stemcell_id: id.clone(),
                        source,
                    })
            })
            .await
    }
}
