//! Resource spec: the caller's VM sizing and placement hints.

use azcpi_id::StorageAccountName;
use serde::{Deserialize, Serialize};

use crate::error::CpiError;

/// Root disk overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDisk {
    /// Size in MiB.
    pub size: Option<u64>,
}

/// VM sizing and placement, as supplied by the caller.
///
/// Unknown keys are kept in `extra` and passed through to the provisioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub instance_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account_name: Option<StorageAccountName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_set: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk: Option<RootDisk>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResourceSpec {
    /// Parse a resource spec from the caller's JSON object.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CpiError> {
        if !value.is_object() {
            return Err(CpiError::InvalidResourceSpec(
                "expected an object of cloud properties".to_string(),
            ));
        }

        let spec: ResourceSpec = serde_json::from_value(value.clone())
            .map_err(|e| CpiError::InvalidResourceSpec(e.to_string()))?;

        if spec.instance_type.trim().is_empty() {
            return Err(CpiError::InvalidResourceSpec(
                "`instance_type' must not be empty".to_string(),
            ));
        }

        Ok(spec)
    }

    /// Root disk size in MiB, if overridden.
    pub fn root_disk_size_mib(&self) -> Option<u64> {
        self.root_disk.as_ref().and_then(|d| d.size)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_minimal_spec() {
        let spec = ResourceSpec::from_value(&json!({ "instance_type": "Standard_D1_v2" })).unwrap();
        assert_eq!(spec.instance_type, "Standard_D1_v2");
        assert!(spec.storage_account_name.is_none());
        assert!(spec.extra.is_empty());
    }

    #[test]
    fn test_full_spec_keeps_unknown_keys() {
        let spec = ResourceSpec::from_value(&json!({
            "instance_type": "Standard_D1_v2",
            "storage_account_name": "explicitstorage",
            "storage_account_type": "Premium_LRS",
            "availability_set": "web-as",
            "root_disk": { "size": 51200 },
            "caching": "ReadWrite",
        }))
        .unwrap();

        assert_eq!(
            spec.storage_account_name.as_ref().map(|n| n.as_str()),
            Some("explicitstorage")
        );
        assert_eq!(spec.root_disk_size_mib(), Some(51200));
        assert_eq!(spec.extra["caching"], "ReadWrite");
    }

    #[test]
    fn test_missing_instance_type() {
        let err = ResourceSpec::from_value(&json!({ "availability_set": "x" })).unwrap_err();
        assert!(matches!(err, CpiError::InvalidResourceSpec(_)));
        assert!(err.to_string().contains("instance_type"));
    }

    #[test]
    fn test_invalid_storage_account_name() {
        let err = ResourceSpec::from_value(&json!({
            "instance_type": "Standard_D1_v2",
            "storage_account_name": "Not_Valid",
        }))
        .unwrap_err();
        assert!(matches!(err, CpiError::InvalidResourceSpec(_)));
    }

    #[test]
    fn test_not_an_object() {
        let err = ResourceSpec::from_value(&json!("Standard_D1_v2")).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
}
