//! azcpi: VM creation for the Azure CPI.
//!
//! Given an agent id, a stemcell, a resource spec and a network spec, the
//! orchestrator resolves the stemcell for the deployment's disk mode,
//! provisions a VM and registers its agent settings, deleting the VM again
//! if registration fails.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator::create_vm
//! ├── NetworkConfiguration   (azcpi-networking, spec validation)
//! ├── VirtualNetworks        (existence check, location)
//! ├── StorageAccountSelector (unmanaged disks only)
//! ├── StemcellResolver       (heavy / light x unmanaged / managed)
//! ├── VmProvisioner          (create, delete for rollback)
//! └── Registry               (agent settings, commit point)
//! ```
//!
//! Every collaborator is a trait object, so the cloud can be swapped for
//! [`fakes::InMemoryCloud`] in tests and local runs.
//!
//! ## Modules
//!
//! - `orchestrator`: the `create_vm` transaction and its rollback
//! - `stemcell`: stemcell classification and resolution
//! - `network`: virtual network existence and location
//! - `registry`: agent settings and the HTTP registry client
//! - `protocol`: JSON request/response handling for the binary

pub mod config;
pub mod error;
pub mod fakes;
pub mod logging;
pub mod network;
pub mod orchestrator;
pub mod protocol;
pub mod provisioner;
pub mod registry;
pub mod remote;
pub mod resources;
pub mod stemcell;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, DiskMode};
pub use error::CpiError;
pub use orchestrator::{Collaborators, CreateVmRequest, Orchestrator};
pub use provisioner::{VmCreateParams, VmProvisioner, VmRecord};
pub use registry::{AgentSettings, Registry, RegistryClient};
pub use stemcell::{ImageMetadata, ImageSource, StemcellKind};
