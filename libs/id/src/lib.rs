//! # azcpi-id
//!
//! Typed, validated identifiers for the azcpi provisioning core.
//!
//! ## Design Principles
//!
//! - Every name that crosses a collaborator boundary has its own type
//! - Validation happens once, at parse time; a constructed value is valid
//! - Names roundtrip through their string form (parse → format → parse)
//!
//! ## Instance IDs
//!
//! The instance identity returned from `create_vm` depends on the disk mode:
//!
//! - unmanaged disks: `{storage_account}-{agent_id}`
//! - managed disks: `{agent_id}`
//!
//! Agent ids may themselves contain `-`, so an instance id is treated as
//! opaque once built.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
