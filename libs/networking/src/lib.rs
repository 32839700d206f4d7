//! Network configuration for VM provisioning.
//!
//! This library turns the caller-supplied network specification (a JSON
//! object of network name to attributes) into a validated
//! [`NetworkConfiguration`]:
//!
//! - `manual` networks carry a static private IP
//! - `dynamic` networks get their IP from the platform
//! - at most one `vip` network carries a public IP
//!
//! Networks keep the order the caller listed them in, so the first network
//! is the one the caller put first. Construction is pure: the same input
//! always yields an equal value.
//! Checking that each virtual network actually exists is left to the
//! caller, since it needs a cloud lookup.

use std::net::IpAddr;

use azcpi_id::{IdError, ResourceGroupName};
use serde::Deserialize;
use thiserror::Error;

/// Networking errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The network spec is not a JSON object, or an entry is malformed.
    #[error("invalid network spec: {0}")]
    InvalidSpec(String),

    /// Unknown network type.
    #[error(
        "Invalid network type `{kind}' for Azure, can only handle `dynamic', `vip', or `manual' network types"
    )]
    InvalidType { name: String, kind: String },

    /// A required attribute is missing.
    #[error("`{field}' is required for {kind} network `{name}'")]
    MissingField {
        name: String,
        kind: &'static str,
        field: &'static str,
    },

    /// Invalid IP address.
    #[error("invalid IP address `{value}' for network `{name}'")]
    InvalidAddress { name: String, value: String },

    /// Invalid resource group name.
    #[error("network `{name}': {source}")]
    InvalidResourceGroup {
        name: String,
        #[source]
        source: IdError,
    },

    /// More than one vip network.
    #[error("More than one vip network for `{name}'")]
    DuplicateVip { name: String },

    /// More than one network claims the default gateway or DNS.
    #[error("Only one network can provide the default {field}, found `{first}' and `{second}'")]
    DuplicateDefault {
        field: &'static str,
        first: String,
        second: String,
    },

    /// No manual or dynamic network.
    #[error("At least one dynamic or manual network should be defined")]
    NoPrimaryNetwork,
}

// ============================================================================
// Model
// ============================================================================

/// Provider-level settings the configurator falls back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDefaults {
    /// Resource group used when a network omits `resource_group_name`.
    pub resource_group: ResourceGroupName,
}

/// How a network attachment gets its private IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Manual,
    Dynamic,
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKind::Manual => "manual",
            NetworkKind::Dynamic => "dynamic",
        }
    }
}

impl std::fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A manual or dynamic network attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// Name of the network in the caller's spec.
    pub name: String,
    pub kind: NetworkKind,
    /// Static private IP (manual networks only).
    pub ip: Option<IpAddr>,
    pub dns: Vec<IpAddr>,
    pub resource_group: ResourceGroupName,
    pub virtual_network_name: String,
    pub subnet_name: String,
    pub security_group: Option<String>,
    pub application_security_groups: Vec<String>,
    pub ip_forwarding: bool,
    pub accelerated_networking: bool,
    pub has_default_dns: bool,
    pub has_default_gateway: bool,
}

/// The public IP attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VipNetwork {
    pub name: String,
    pub ip: IpAddr,
}

/// A validated set of network attachments, in the caller's order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfiguration {
    networks: Vec<Network>,
    vip: Option<VipNetwork>,
}

// ============================================================================
// Raw spec
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawNetwork {
    #[serde(rename = "type")]
    kind: Option<String>,
    ip: Option<String>,
    #[serde(default)]
    dns: Vec<String>,
    #[serde(default)]
    default: Vec<String>,
    #[serde(default)]
    cloud_properties: RawCloudProperties,
}

#[derive(Debug, Default, Deserialize)]
struct RawCloudProperties {
    virtual_network_name: Option<String>,
    subnet_name: Option<String>,
    resource_group_name: Option<String>,
    security_group: Option<String>,
    #[serde(default)]
    application_security_groups: Vec<String>,
    #[serde(default)]
    ip_forwarding: bool,
    #[serde(default)]
    accelerated_networking: bool,
}

fn parse_ip(name: &str, value: &str) -> Result<IpAddr, NetworkError> {
    value
        .parse::<IpAddr>()
        .map_err(|_| NetworkError::InvalidAddress {
            name: name.to_string(),
            value: value.to_string(),
        })
}

fn required(
    value: Option<String>,
    name: &str,
    kind: NetworkKind,
    field: &'static str,
) -> Result<String, NetworkError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(NetworkError::MissingField {
            name: name.to_string(),
            kind: kind.as_str(),
            field,
        }),
    }
}

impl Network {
    fn from_raw(
        defaults: &NetworkDefaults,
        name: &str,
        kind: NetworkKind,
        raw: RawNetwork,
    ) -> Result<Self, NetworkError> {
        let ip = match kind {
            NetworkKind::Manual => {
                let ip = required(raw.ip, name, kind, "ip")?;
                Some(parse_ip(name, &ip)?)
            }
            NetworkKind::Dynamic => None,
        };

        let dns = raw
            .dns
            .iter()
            .map(|d| parse_ip(name, d))
            .collect::<Result<Vec<_>, _>>()?;

        let props = raw.cloud_properties;
        let virtual_network_name =
            required(props.virtual_network_name, name, kind, "virtual_network_name")?;
        let subnet_name = required(props.subnet_name, name, kind, "subnet_name")?;

        let resource_group = match props.resource_group_name {
            Some(rg) => ResourceGroupName::parse(&rg).map_err(|source| {
                NetworkError::InvalidResourceGroup {
                    name: name.to_string(),
                    source,
                }
            })?,
            None => defaults.resource_group.clone(),
        };

        Ok(Self {
            name: name.to_string(),
            kind,
            ip,
            dns,
            resource_group,
            virtual_network_name,
            subnet_name,
            security_group: props.security_group,
            application_security_groups: props.application_security_groups,
            ip_forwarding: props.ip_forwarding,
            accelerated_networking: props.accelerated_networking,
            has_default_dns: raw.default.iter().any(|d| d == "dns"),
            has_default_gateway: raw.default.iter().any(|d| d == "gateway"),
        })
    }
}

impl NetworkConfiguration {
    /// Validate and normalize a raw network spec.
    pub fn new(defaults: &NetworkDefaults, spec: &serde_json::Value) -> Result<Self, NetworkError> {
        let Some(map) = spec.as_object() else {
            return Err(NetworkError::InvalidSpec(format!(
                "expected an object of networks, got {}",
                json_type_name(spec)
            )));
        };

        let mut networks = Vec::new();
        let mut vip: Option<VipNetwork> = None;

        for (name, value) in map {
            let raw: RawNetwork = serde_json::from_value(value.clone())
                .map_err(|e| NetworkError::InvalidSpec(format!("network `{name}': {e}")))?;

            match raw.kind.as_deref().unwrap_or("manual") {
                "manual" => {
                    networks.push(Network::from_raw(defaults, name, NetworkKind::Manual, raw)?)
                }
                "dynamic" => {
                    networks.push(Network::from_raw(defaults, name, NetworkKind::Dynamic, raw)?)
                }
                "vip" => {
                    if vip.is_some() {
                        return Err(NetworkError::DuplicateVip { name: name.clone() });
                    }
                    let Some(ip) = raw.ip.filter(|ip| !ip.is_empty()) else {
                        return Err(NetworkError::MissingField {
                            name: name.clone(),
                            kind: "vip",
                            field: "ip",
                        });
                    };
                    vip = Some(VipNetwork {
                        name: name.clone(),
                        ip: parse_ip(name, &ip)?,
                    });
                }
                other => {
                    return Err(NetworkError::InvalidType {
                        name: name.clone(),
                        kind: other.to_string(),
                    })
                }
            }
        }

        if networks.is_empty() {
            return Err(NetworkError::NoPrimaryNetwork);
        }

        check_single_default(&networks, "dns", |n| n.has_default_dns)?;
        check_single_default(&networks, "gateway", |n| n.has_default_gateway)?;

        // A lone network is the default for everything.
        if let [only] = networks.as_mut_slice() {
            only.has_default_dns = true;
            only.has_default_gateway = true;
        }

        Ok(Self { networks, vip })
    }

    /// Manual and dynamic attachments, in the caller's order.
    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    /// The public IP attachment, if any.
    pub fn vip(&self) -> Option<&VipNetwork> {
        self.vip.as_ref()
    }

    /// The network carrying the default gateway, falling back to the first.
    pub fn primary(&self) -> &Network {
        self.networks
            .iter()
            .find(|n| n.has_default_gateway)
            .unwrap_or(&self.networks[0])
    }
}

fn check_single_default(
    networks: &[Network],
    field: &'static str,
    has_default: impl Fn(&Network) -> bool,
) -> Result<(), NetworkError> {
    let mut defaults = networks.iter().filter(|n| has_default(n));
    if let (Some(first), Some(second)) = (defaults.next(), defaults.next()) {
        return Err(NetworkError::DuplicateDefault {
            field,
            first: first.name.clone(),
            second: second.name.clone(),
        });
    }
    Ok(())
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn defaults() -> NetworkDefaults {
        NetworkDefaults {
            resource_group: ResourceGroupName::parse("bosh-rg").unwrap(),
        }
    }

    fn manual(ip: &str) -> serde_json::Value {
        json!({
            "type": "manual",
            "ip": ip,
            "dns": ["168.63.129.16"],
            "cloud_properties": {
                "virtual_network_name": "vnet",
                "subnet_name": "subnet",
            }
        })
    }

    #[test]
    fn test_single_manual_network() {
        let config = NetworkConfiguration::new(&defaults(), &json!({ "private": manual("10.0.0.4") }))
            .unwrap();

        assert_eq!(config.networks().len(), 1);
        let net = &config.networks()[0];
        assert_eq!(net.kind, NetworkKind::Manual);
        assert_eq!(net.ip, Some("10.0.0.4".parse().unwrap()));
        assert_eq!(net.resource_group.as_str(), "bosh-rg");
        assert_eq!(net.virtual_network_name, "vnet");
        assert!(net.has_default_dns && net.has_default_gateway);
        assert!(config.vip().is_none());
    }

    #[test]
    fn test_type_defaults_to_manual() {
        let mut spec = manual("10.0.0.4");
        spec.as_object_mut().unwrap().remove("type");
        let config = NetworkConfiguration::new(&defaults(), &json!({ "a": spec })).unwrap();
        assert_eq!(config.networks()[0].kind, NetworkKind::Manual);
    }

    #[test]
    fn test_explicit_resource_group_overrides_default() {
        let spec = json!({
            "a": {
                "type": "dynamic",
                "cloud_properties": {
                    "virtual_network_name": "vnet",
                    "subnet_name": "subnet",
                    "resource_group_name": "other-rg",
                    "security_group": "nsg",
                    "application_security_groups": ["asg1", "asg2"],
                    "ip_forwarding": true,
                }
            }
        });
        let config = NetworkConfiguration::new(&defaults(), &spec).unwrap();
        let net = &config.networks()[0];
        assert_eq!(net.resource_group.as_str(), "other-rg");
        assert_eq!(net.ip, None);
        assert_eq!(net.security_group.as_deref(), Some("nsg"));
        assert_eq!(net.application_security_groups, vec!["asg1", "asg2"]);
        assert!(net.ip_forwarding);
        assert!(!net.accelerated_networking);
    }

    #[test]
    fn test_networks_keep_caller_order() {
        let mut zeta = manual("10.0.0.4");
        zeta["default"] = json!(["dns", "gateway"]);
        let spec = json!({ "zeta": zeta, "alpha": manual("10.0.1.4") });
        let config = NetworkConfiguration::new(&defaults(), &spec).unwrap();
        let names: Vec<_> = config.networks().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(config.primary().name, "zeta");
    }

    #[test]
    fn test_order_from_parsed_json() {
        let spec: serde_json::Value = serde_json::from_str(
            r#"{"b": {"ip": "10.0.1.4", "default": ["dns", "gateway"], "cloud_properties": {"virtual_network_name": "v", "subnet_name": "s"}},
                "a": {"ip": "10.0.0.4", "cloud_properties": {"virtual_network_name": "v", "subnet_name": "s"}}}"#,
        )
        .unwrap();
        let config = NetworkConfiguration::new(&defaults(), &spec).unwrap();
        assert_eq!(config.networks()[0].name, "b");
    }

    #[test]
    fn test_vip_network() {
        let spec = json!({
            "private": manual("10.0.0.4"),
            "public": { "type": "vip", "ip": "52.1.2.3" },
        });
        let config = NetworkConfiguration::new(&defaults(), &spec).unwrap();
        assert_eq!(config.networks().len(), 1);
        assert_eq!(config.vip().unwrap().ip, "52.1.2.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_duplicate_vip() {
        let spec = json!({
            "private": manual("10.0.0.4"),
            "public1": { "type": "vip", "ip": "52.1.2.3" },
            "public2": { "type": "vip", "ip": "52.1.2.4" },
        });
        let err = NetworkConfiguration::new(&defaults(), &spec).unwrap_err();
        assert_eq!(
            err,
            NetworkError::DuplicateVip {
                name: "public2".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_default_gateway() {
        let mut a = manual("10.0.0.4");
        a["default"] = json!(["gateway"]);
        let mut b = manual("10.0.1.4");
        b["default"] = json!(["gateway"]);
        let err = NetworkConfiguration::new(&defaults(), &json!({ "a": a, "b": b })).unwrap_err();
        assert!(matches!(err, NetworkError::DuplicateDefault { field: "gateway", .. }));
    }

    #[test]
    fn test_invalid_type_message() {
        let spec = json!({ "a": { "type": "floating" } });
        let err = NetworkConfiguration::new(&defaults(), &spec).unwrap_err();
        assert!(err
            .to_string()
            .contains("Invalid network type `floating' for Azure"));
    }

    #[rstest]
    #[case::missing_ip(json!({ "a": { "cloud_properties": { "virtual_network_name": "v", "subnet_name": "s" } } }), "ip")]
    #[case::missing_vnet(json!({ "a": { "ip": "10.0.0.4", "cloud_properties": { "subnet_name": "s" } } }), "virtual_network_name")]
    #[case::missing_subnet(json!({ "a": { "type": "dynamic", "cloud_properties": { "virtual_network_name": "v" } } }), "subnet_name")]
    #[case::vip_without_ip(json!({ "p": { "ip": "10.0.0.4", "cloud_properties": { "virtual_network_name": "v", "subnet_name": "s" } }, "v": { "type": "vip" } }), "ip")]
    fn test_missing_required_field(#[case] spec: serde_json::Value, #[case] expected: &str) {
        let err = NetworkConfiguration::new(&defaults(), &spec).unwrap_err();
        match err {
            NetworkError::MissingField { field, .. } => assert_eq!(field, expected),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    #[case::not_an_object(json!([]))]
    #[case::entry_not_an_object(json!({ "a": "manual" }))]
    fn test_invalid_spec(#[case] spec: serde_json::Value) {
        let err = NetworkConfiguration::new(&defaults(), &spec).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidSpec(_)));
    }

    #[test]
    fn test_empty_spec_has_no_primary_network() {
        let err = NetworkConfiguration::new(&defaults(), &json!({})).unwrap_err();
        assert_eq!(err, NetworkError::NoPrimaryNetwork);
    }

    #[test]
    fn test_only_vip_has_no_primary_network() {
        let spec = json!({ "public": { "type": "vip", "ip": "52.1.2.3" } });
        let err = NetworkConfiguration::new(&defaults(), &spec).unwrap_err();
        assert_eq!(err, NetworkError::NoPrimaryNetwork);
    }

    #[test]
    fn test_invalid_ip() {
        let err = NetworkConfiguration::new(&defaults(), &json!({ "a": manual("10.0.0.400") }))
            .unwrap_err();
        assert!(matches!(err, NetworkError::InvalidAddress { .. }));
    }

    #[test]
    fn test_invalid_resource_group() {
        let mut spec = manual("10.0.0.4");
        spec["cloud_properties"]["resource_group_name"] = json!("bad.");
        let err = NetworkConfiguration::new(&defaults(), &json!({ "a": spec })).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidResourceGroup { .. }));
    }

    #[test]
    fn test_construction_is_deterministic() {
        let spec = json!({
            "b": manual("10.0.1.4"),
            "a": { "type": "dynamic", "default": ["dns", "gateway"], "cloud_properties": { "virtual_network_name": "v", "subnet_name": "s" } },
            "public": { "type": "vip", "ip": "52.1.2.3" },
        });
        let first = NetworkConfiguration::new(&defaults(), &spec).unwrap();
        let second = NetworkConfiguration::new(&defaults(), &spec).unwrap();
        assert_eq!(first, second);
    }
}
