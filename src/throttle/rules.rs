//! Route rules configuration and lookup.
//!
//! Rules are an explicit table mapping resource groups and their operations
//! to optional policy overrides. The table is loaded once and consulted by
//! plain lookup for every request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::policy::PolicyOverride;
use crate::config::validate_ttl;
use crate::error::{Result, TurnstileError};

/// All configured resource groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRules {
    /// Map of group name to group rule
    #[serde(default)]
    pub groups: HashMap<String, GroupRule>,
}

/// Overrides for one resource group and its operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupRule {
    /// Override applied to every operation in the group
    #[serde(flatten)]
    pub policy: PolicyOverride,
    /// Per-operation overrides, keyed by operation name
    #[serde(default)]
    pub operations: HashMap<String, PolicyOverride>,
}

impl RouteRules {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading route rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RouteRules = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse route rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Attach an override to a whole group.
    pub fn with_group(mut self, group: &str, policy: PolicyOverride) -> Self {
        self.groups.entry(group.to_string()).or_default().policy = policy;
        self
    }

    /// Attach an override to one operation of a group.
    pub fn with_operation(mut self, group: &str, operation: &str, policy: PolicyOverride) -> Self {
        self.groups
            .entry(group.to_string())
            .or_default()
            .operations
            .insert(operation.to_string(), policy);
        self
    }

    /// Find the group and operation overrides that apply to a target.
    pub fn lookup(
        &self,
        group: &str,
        operation: &str,
    ) -> (Option<&PolicyOverride>, Option<&PolicyOverride>) {
        match self.groups.get(group) {
            Some(rule) => (Some(&rule.policy), rule.operations.get(operation)),
            None => (None, None),
        }
    }

    /// Reject ttls the store could not represent. Rules built through
    /// `with_group`/`with_operation` are only checked here.
    pub fn validate(&self) -> Result<()> {
        for (name, rule) in &self.groups {
            if let Some(ttl) = rule.policy.ttl_secs {
                validate_ttl(&format!("groups.{}.ttl_secs", name), ttl)?;
            }
            for (op, policy) in &rule.operations {
                if let Some(ttl) = policy.ttl_secs {
                    validate_ttl(&format!("groups.{}.operations.{}.ttl_secs", name, op), ttl)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules() {
        let yaml = r#"
groups:
  users:
    limit: 5
    ttl_secs: 60
    operations:
      login:
        limit: 3
        ttl_secs: 30
      health:
        skip: true
  AdminPanel:
    skip: true
"#;
        let rules = RouteRules::from_yaml(yaml).unwrap();
        assert_eq!(rules.groups.len(), 2);

        let (group, op) = rules.lookup("users", "login");
        assert_eq!(group, Some(&PolicyOverride::limit(5, 60)));
        assert_eq!(op, Some(&PolicyOverride::limit(3, 30)));

        let (_, op) = rules.lookup("users", "health");
        assert_eq!(op, Some(&PolicyOverride::skip(true)));

        // Names are case-sensitive identifiers
        let (group, _) = rules.lookup("AdminPanel", "anything");
        assert_eq!(group.and_then(|g| g.skip), Some(true));
        assert_eq!(rules.lookup("adminpanel", "anything"), (None, None));
    }

    #[test]
    fn test_lookup_unknown_operation() {
        let rules = RouteRules::new().with_group("users", PolicyOverride::limit(5, 60));

        let (group, op) = rules.lookup("users", "missing");
        assert!(group.is_some());
        assert!(op.is_none());
    }

    #[test]
    fn test_builder_operation_creates_group() {
        let rules = RouteRules::new().with_operation("files", "upload", PolicyOverride::limit(1, 10));

        let (group, op) = rules.lookup("files", "upload");
        assert_eq!(group, Some(&PolicyOverride::default()));
        assert_eq!(op, Some(&PolicyOverride::limit(1, 10)));
    }

    #[test]
    fn test_negative_override_rejected() {
        let yaml = r#"
groups:
  users:
    limit: -3
"#;
        assert!(matches!(
            RouteRules::from_yaml(yaml),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_oversized_operation_ttl_rejected() {
        let yaml = r#"
groups:
  users:
    operations:
      login:
        ttl_secs: 999999999999
"#;
        assert!(matches!(
            RouteRules::from_yaml(yaml),
            Err(TurnstileError::Config(_))
        ));
    }
}
