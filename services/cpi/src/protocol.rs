//! JSON request/response protocol.
//!
//! The director invokes the CPI binary with one JSON request on stdin:
//!
//! ```json
//! {"method": "create_vm", "arguments": [agent_id, stemcell_id, cloud_properties, networks, disk_cids, env], "context": {}}
//! ```
//!
//! and expects one JSON response on stdout with either `result` or `error`
//! set.

use azcpi_id::{AgentId, StemcellId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::CpiError;
use crate::orchestrator::{CreateVmRequest, Orchestrator};

pub const CLOUD_ERROR: &str = "Bosh::Clouds::CloudError";
pub const VM_CREATION_FAILED: &str = "Bosh::Clouds::VMCreationFailed";
pub const NOT_IMPLEMENTED: &str = "Bosh::Clouds::NotImplemented";

#[derive(Debug, Clone, Deserialize)]
pub struct CpiRequest {
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub ok_to_retry: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpiResponse {
    pub result: Option<Value>,
    pub error: Option<ResponseError>,
    #[serde(default)]
    pub log: String,
}

impl CpiResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            log: String::new(),
        }
    }

    pub fn error(kind: &str, message: impl Into<String>, ok_to_retry: bool) -> Self {
        Self {
            result: None,
            error: Some(ResponseError {
                kind: kind.to_string(),
                message: message.into(),
                ok_to_retry,
            }),
            log: String::new(),
        }
    }

    /// Map a `create_vm` failure to a response.
    ///
    /// Failures after the VM existed are reported as VM creation failures;
    /// only a clean rollback is safe to retry.
    pub fn from_create_vm_error(err: &CpiError) -> Self {
        if err.vm_was_created() {
            return Self::error(VM_CREATION_FAILED, err.to_string(), !err.is_orphan());
        }
        match err {
            CpiError::Timeout { .. } | CpiError::Cancelled { .. } | CpiError::Backend(_) => {
                Self::error(VM_CREATION_FAILED, err.to_string(), false)
            }
            _ => Self::error(CLOUD_ERROR, err.to_string(), false),
        }
    }
}

fn argument<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a Value, CpiError> {
    args.get(index)
        .ok_or_else(|| CpiError::InvalidArguments(format!("missing argument `{name}'")))
}

fn string_argument<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str, CpiError> {
    argument(args, index, name)?
        .as_str()
        .ok_or_else(|| CpiError::InvalidArguments(format!("argument `{name}' must be a string")))
}

/// Parse the positional `create_vm` arguments.
pub fn create_vm_request(args: &[Value]) -> Result<CreateVmRequest, CpiError> {
    let agent_id = AgentId::parse(string_argument(args, 0, "agent_id")?)?;
    let stemcell_id = StemcellId::parse(string_argument(args, 1, "stemcell_id")?)?;
    let resource_spec = argument(args, 2, "cloud_properties")?.clone();
    let networks = argument(args, 3, "networks")?.clone();

    let disk_locality = match args.get(4) {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
            CpiError::InvalidArguments("argument `disk_cids' must be a list of strings".to_string())
        })?,
    };
    let environment = args.get(5).cloned().unwrap_or(Value::Null);

    Ok(CreateVmRequest {
        agent_id,
        stemcell_id,
        resource_spec,
        networks,
        disk_locality,
        environment,
    })
}

/// Handle one request.
pub async fn handle(orchestrator: &Orchestrator, request: CpiRequest) -> CpiResponse {
    match request.method.as_str() {
        "create_vm" => {
            let request = match create_vm_request(&request.arguments) {
                Ok(request) => request,
                Err(e) => return CpiResponse::error(CLOUD_ERROR, e.to_string(), false),
            };
            match orchestrator.create_vm(request).await {
                Ok(instance_id) => CpiResponse::ok(Value::String(instance_id.into_inner())),
                Err(e) => CpiResponse::from_create_vm_error(&e),
            }
        }
        other => {
            warn!(method = %other, "Unsupported CPI method");
            CpiResponse::error(
                NOT_IMPLEMENTED,
                format!("Method `{other}' is not implemented"),
                false,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_create_vm_arguments() {
        let args = vec![
            json!("agent-1"),
            json!("bosh-stemcell-xxx"),
            json!({ "instance_type": "Standard_D1_v2" }),
            json!({}),
            json!(["disk-1"]),
            json!({ "bosh": {} }),
        ];
        let request = create_vm_request(&args).unwrap();
        assert_eq!(request.agent_id.as_str(), "agent-1");
        assert_eq!(request.stemcell_id.as_str(), "bosh-stemcell-xxx");
        assert_eq!(request.disk_locality, vec!["disk-1"]);
        assert_eq!(request.environment, json!({ "bosh": {} }));
    }

    #[test]
    fn test_optional_trailing_arguments() {
        let args = vec![json!("agent-1"), json!("bosh-stemcell-xxx"), json!({}), json!({})];
        let request = create_vm_request(&args).unwrap();
        assert!(request.disk_locality.is_empty());
        assert!(request.environment.is_null());
    }

    #[test]
    fn test_missing_argument() {
        let err = create_vm_request(&[json!("agent-1")]).unwrap_err();
        assert_eq!(err.to_string(), "invalid arguments: missing argument `stemcell_id'");
    }

    #[test]
    fn test_invalid_agent_id() {
        let err = create_vm_request(&[json!("agent/1"), json!("s"), json!({}), json!({})])
            .unwrap_err();
        assert!(matches!(err, CpiError::InvalidId(_)));
    }

    #[test]
    fn test_error_mapping() {
        let rolled_back = CpiError::RolledBack {
            instance_id: azcpi_id::InstanceId::parse("agent-1").unwrap(),
            cause: Box::new(CpiError::Registry(anyhow::anyhow!("registry down"))),
        };
        let response = CpiResponse::from_create_vm_error(&rolled_back);
        let error = response.error.unwrap();
        assert_eq!(error.kind, VM_CREATION_FAILED);
        assert_eq!(error.message, "registry down");
        assert!(error.ok_to_retry);

        let orphaned = CpiError::Orphaned {
            instance_id: azcpi_id::InstanceId::parse("agent-1").unwrap(),
            cause: Box::new(CpiError::Registry(anyhow::anyhow!("registry down"))),
            cleanup: Box::new(CpiError::Backend(anyhow::anyhow!("delete failed"))),
        };
        let error = CpiResponse::from_create_vm_error(&orphaned).error.unwrap();
        assert_eq!(error.kind, VM_CREATION_FAILED);
        assert!(!error.ok_to_retry);

        let not_found = CpiError::StemcellNotFound(StemcellId::parse("s").unwrap());
        let error = CpiResponse::from_create_vm_error(&not_found).error.unwrap();
        assert_eq!(error.kind, CLOUD_ERROR);
        assert!(!error.ok_to_retry);
    }

    #[test]
    fn test_response_json_shape() {
        let json = serde_json::to_value(CpiResponse::ok(json!("agent-1"))).unwrap();
        assert_eq!(json, json!({ "result": "agent-1", "error": null, "log": "" }));
    }
}
