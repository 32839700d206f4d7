//! Typed name definitions for provisioning resources.
//!
//! Each name type carries its own validation rules; the vendor rules for
//! storage accounts and resource groups are enforced here so malformed
//! names never reach a collaborator.

use crate::define_name;
use crate::IdError;

/// Maximum length of an agent id.
pub const AGENT_ID_MAX_LEN: usize = 64;

/// Maximum length of a stemcell or instance id.
pub const RESOURCE_ID_MAX_LEN: usize = 128;

// =============================================================================
// Validators
// =============================================================================

fn check_length(kind: &'static str, s: &str, min: usize, max: usize) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { kind });
    }
    let len = s.chars().count();
    if len < min {
        return Err(IdError::TooShort {
            kind,
            value: s.to_string(),
            min,
        });
    }
    if len > max {
        return Err(IdError::TooLong {
            kind,
            value: s.to_string(),
            max,
        });
    }
    Ok(())
}

fn check_charset(
    kind: &'static str,
    s: &str,
    allowed: impl Fn(char) -> bool,
) -> Result<(), IdError> {
    match s.chars().find(|c| !allowed(*c)) {
        Some(ch) => Err(IdError::InvalidCharacter {
            kind,
            value: s.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn validate_agent_id(kind: &'static str, s: &str) -> Result<(), IdError> {
    check_length(kind, s, 1, AGENT_ID_MAX_LEN)?;
    check_charset(kind, s, is_token_char)
}

fn validate_resource_id(kind: &'static str, s: &str) -> Result<(), IdError> {
    check_length(kind, s, 1, RESOURCE_ID_MAX_LEN)?;
    check_charset(kind, s, is_token_char)
}

fn validate_storage_account(kind: &'static str, s: &str) -> Result<(), IdError> {
    check_length(kind, s, 3, 24)?;
    check_charset(kind, s, |c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

fn validate_resource_group(kind: &'static str, s: &str) -> Result<(), IdError> {
    check_length(kind, s, 1, 90)?;
    check_charset(kind, s, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')')
    })?;
    if s.ends_with('.') {
        return Err(IdError::InvalidFormat {
            kind,
            value: s.to_string(),
            message: "must not end with a period".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Names
// =============================================================================

define_name!(AgentId, "agent id", validate_agent_id);
define_name!(StemcellId, "stemcell id", validate_resource_id);
define_name!(InstanceId, "instance id", validate_resource_id);
define_name!(StorageAccountName, "storage account name", validate_storage_account);
define_name!(ResourceGroupName, "resource group name", validate_resource_group);

impl InstanceId {
    /// Instance id for a VM whose disks live in a caller-owned storage account.
    #[must_use]
    pub fn unmanaged(storage_account: &StorageAccountName, agent_id: &AgentId) -> Self {
        Self(format!("{}-{}", storage_account, agent_id))
    }

    /// Instance id for a VM using managed disks: the agent id itself.
    #[must_use]
    pub fn managed(agent_id: &AgentId) -> Self {
        Self(agent_id.as_str().to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const AGENT: &str = "e55144a3-0c06-4240-8f15-9a7bc7b35d1f";

    #[test]
    fn test_agent_id_uuid_accepted() {
        let id: AgentId = AGENT.parse().unwrap();
        assert_eq!(id.as_str(), AGENT);
        assert_eq!(id.to_string(), AGENT);
    }

    #[test]
    fn test_agent_id_empty() {
        let result: Result<AgentId, _> = "".parse();
        assert!(result.unwrap_err().is_empty());
    }

    #[test]
    fn test_agent_id_invalid_character() {
        let err = AgentId::parse("agent/1").unwrap_err();
        assert!(matches!(err, IdError::InvalidCharacter { ch: '/', .. }));
        assert_eq!(err.kind(), "agent id");
    }

    #[test]
    fn test_agent_id_too_long() {
        let err = AgentId::parse(&"a".repeat(AGENT_ID_MAX_LEN + 1)).unwrap_err();
        assert!(matches!(err, IdError::TooLong { max: AGENT_ID_MAX_LEN, .. }));
    }

    #[test]
    fn test_storage_account_rules() {
        assert!(StorageAccountName::parse("mockstorage01").is_ok());
        assert!(matches!(
            StorageAccountName::parse("ab").unwrap_err(),
            IdError::TooShort { min: 3, .. }
        ));
        assert!(matches!(
            StorageAccountName::parse("MockStorage").unwrap_err(),
            IdError::InvalidCharacter { ch: 'M', .. }
        ));
        assert!(StorageAccountName::parse(&"a".repeat(25)).is_err());
    }

    #[test]
    fn test_resource_group_trailing_period() {
        assert!(ResourceGroupName::parse("bosh-rg(1)").is_ok());
        let err = ResourceGroupName::parse("bosh-rg.").unwrap_err();
        assert!(matches!(err, IdError::InvalidFormat { .. }));
        assert!(err.to_string().contains("must not end with a period"));
    }

    #[test]
    fn test_instance_id_unmanaged() {
        let account = StorageAccountName::parse("mockstorage").unwrap();
        let agent = AgentId::parse(AGENT).unwrap();
        let id = InstanceId::unmanaged(&account, &agent);
        assert_eq!(id.as_str(), format!("mockstorage-{AGENT}"));
    }

    #[test]
    fn test_instance_id_managed() {
        let agent = AgentId::parse(AGENT).unwrap();
        assert_eq!(InstanceId::managed(&agent).as_str(), AGENT);
    }

    #[test]
    fn test_stemcell_id_json_roundtrip() {
        let id = StemcellId::parse("bosh-stemcell-xxx").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"bosh-stemcell-xxx\"");
        let parsed: StemcellId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        let result: Result<StorageAccountName, _> = serde_json::from_str("\"Bad_Name\"");
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_valid_storage_accounts_parse(s in "[a-z0-9]{3,24}") {
            let parsed = StorageAccountName::parse(&s).unwrap();
            prop_assert_eq!(parsed.as_str(), s.as_str());
        }

        #[test]
        fn prop_token_names_roundtrip(s in "[A-Za-z0-9._-]{1,64}") {
            let id = AgentId::parse(&s).unwrap();
            let again: AgentId = id.to_string().parse().unwrap();
            prop_assert_eq!(id, again);
        }

        #[test]
        fn prop_unmanaged_instance_id_is_valid(
            account in "[a-z0-9]{3,24}",
            agent in "[A-Za-z0-9._-]{1,64}",
        ) {
            let account = StorageAccountName::parse(&account).unwrap();
            let agent = AgentId::parse(&agent).unwrap();
            let id = InstanceId::unmanaged(&account, &agent);
            prop_assert!(InstanceId::parse(id.as_str()).is_ok());
        }
    }
}
