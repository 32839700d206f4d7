//! Error types for VM creation.

use std::time::Duration;

use azcpi_id::{IdError, InstanceId, StemcellId};
use azcpi_networking::NetworkError;
use thiserror::Error;

/// Errors surfaced by `create_vm`.
///
/// Collaborator failures arrive as `anyhow::Error` and are carried as-is,
/// so the caller sees the backend's own message.
#[derive(Debug, Error)]
pub enum CpiError {
    /// Malformed network spec.
    #[error(transparent)]
    Validation(#[from] NetworkError),

    /// Malformed agent or stemcell id.
    #[error(transparent)]
    InvalidId(#[from] IdError),

    /// Malformed request arguments.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Malformed resource spec.
    #[error("invalid resource spec: {0}")]
    InvalidResourceSpec(String),

    /// A network references a virtual network that does not exist.
    #[error("Cannot find the virtual network `{name}' under resource group `{resource_group}'")]
    VirtualNetworkNotFound {
        resource_group: String,
        name: String,
    },

    /// The stemcell is not present in the backend it should live in.
    #[error("Given stemcell `{0}' does not exist")]
    StemcellNotFound(StemcellId),

    /// Managed-disk user image lookup failed.
    #[error("Failed to get the user image information for the stemcell `{stemcell_id}': {source}")]
    UserImage {
        stemcell_id: StemcellId,
        #[source]
        source: anyhow::Error,
    },

    /// Any other collaborator failure, unchanged.
    #[error(transparent)]
    Backend(anyhow::Error),

    /// The registry rejected the agent settings.
    #[error(transparent)]
    Registry(anyhow::Error),

    /// A remote call did not finish in time.
    #[error("timeout after {elapsed:?} waiting for {operation}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// The caller cancelled the operation.
    #[error("cancelled while waiting for {operation}")]
    Cancelled { operation: &'static str },

    /// The VM was created, registering it failed, and the VM was deleted.
    ///
    /// Displays as the original cause.
    #[error("{cause}")]
    RolledBack {
        instance_id: InstanceId,
        #[source]
        cause: Box<CpiError>,
    },

    /// The VM was created, registering it failed, and deleting it failed too.
    /// The VM is leaked.
    #[error("VM `{instance_id}' was left behind: registry update failed ({cause}) and deleting the VM failed: {cleanup}")]
    Orphaned {
        instance_id: InstanceId,
        cause: Box<CpiError>,
        #[source]
        cleanup: Box<CpiError>,
    },
}

impl CpiError {
    /// Stable snake_case code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            CpiError::Validation(_)
            | CpiError::InvalidId(_)
            | CpiError::InvalidArguments(_)
            | CpiError::InvalidResourceSpec(_) => "validation_error",
            CpiError::VirtualNetworkNotFound { .. } | CpiError::StemcellNotFound(_) => "not_found",
            CpiError::UserImage { .. } | CpiError::Backend(_) => "backend_error",
            CpiError::Registry(_) => "registry_error",
            CpiError::Timeout { .. } => "timeout",
            CpiError::Cancelled { .. } => "cancelled",
            CpiError::RolledBack { .. } => "compensated",
            CpiError::Orphaned { .. } => "orphaned",
        }
    }

    /// The error that triggered a rollback, or `self` otherwise.
    pub fn cause(&self) -> &CpiError {
        match self {
            CpiError::RolledBack { cause, .. } | CpiError::Orphaned { cause, .. } => cause.as_ref(),
            other => other,
        }
    }

    /// Returns true if a VM may exist without a registry entry.
    pub fn is_orphan(&self) -> bool {
        matches!(self, CpiError::Orphaned { .. })
    }

    /// Returns true if a VM was provisioned at some point during the call.
    pub fn vm_was_created(&self) -> bool {
        matches!(self, CpiError::RolledBack { .. } | CpiError::Orphaned { .. })
    }
}
