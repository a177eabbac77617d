//! # Access policies
//!
//! Named capability sets stored in the backend as Vault ACL policies. A policy
//! is an ordered set of `(path pattern, capability)` pairs; bindings refer to it
//! by name, so redefining a policy changes what every bound role may do.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::errors::{BootstrapError, Result};
use crate::secrets::SecretsBackend;

/// Operations a policy can grant on a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Create,
    Read,
    Update,
    Delete,
    List,
    Sudo,
    Deny,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Sudo => "sudo",
            Self::Deny => "deny",
        }
    }

    /// Create, read, update, delete and list.
    pub fn manage() -> [Capability; 5] {
        [Self::Create, Self::Read, Self::Update, Self::Delete, Self::List]
    }
}

impl FromStr for Capability {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "list" => Ok(Self::List),
            "sudo" => Ok(Self::Sudo),
            "deny" => Ok(Self::Deny),
            other => Err(BootstrapError::validation_field(
                format!("unknown capability '{}'", other),
                "capabilities",
            )),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(resource pattern, capability)` grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    pub pattern: String,
    pub capability: Capability,
}

impl Grant {
    pub fn new(pattern: impl Into<String>, capability: Capability) -> Self {
        Self { pattern: pattern.into(), capability }
    }

    /// One grant per capability on `pattern`.
    pub fn all(pattern: &str, capabilities: &[Capability]) -> Vec<Grant> {
        capabilities.iter().map(|c| Grant::new(pattern, *c)).collect()
    }
}

/// A named policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    pub capabilities: BTreeSet<Grant>,
}

impl PolicyDocument {
    pub fn new(name: impl Into<String>, capabilities: impl IntoIterator<Item = Grant>) -> Self {
        Self { name: name.into(), capabilities: capabilities.into_iter().collect() }
    }

    /// Reject empty or overly broad documents.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(BootstrapError::validation_field(
                format!("invalid policy name '{}'", self.name),
                "name",
            ));
        }
        if self.capabilities.is_empty() {
            return Err(BootstrapError::validation_field(
                format!("policy '{}' grants nothing", self.name),
                "capabilities",
            ));
        }
        if let Some(grant) = self
            .capabilities
            .iter()
            .find(|g| matches!(g.pattern.trim_start_matches('/'), "" | "*" | "+"))
        {
            return Err(BootstrapError::validation_field(
                format!("policy '{}' grants '{}' on every path", self.name, grant.capability),
                "capabilities",
            ));
        }
        Ok(())
    }

    fn grouped(&self) -> BTreeMap<&str, Vec<Capability>> {
        let mut grouped: BTreeMap<&str, Vec<Capability>> = BTreeMap::new();
        for grant in &self.capabilities {
            grouped.entry(grant.pattern.as_str()).or_default().push(grant.capability);
        }
        grouped
    }

    /// Render as Vault HCL, one `path` block per pattern.
    pub fn to_hcl(&self) -> String {
        self.grouped()
            .into_iter()
            .map(|(pattern, caps)| {
                let list =
                    caps.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ");
                format!("path \"{}\" {{\n  capabilities = [{}]\n}}\n", pattern, list)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse the `path` blocks of a Vault HCL policy.
    pub fn from_hcl(name: &str, hcl: &str) -> Result<Self> {
        let mut grants = BTreeSet::new();
        let mut rest = hcl;

        while let Some(start) = rest.find("path") {
            rest = &rest[start + 4..];
            let pattern = quoted(rest)
                .ok_or_else(|| malformed(name, "expected quoted path after 'path'"))?;
            let open = rest.find('{').ok_or_else(|| malformed(name, "missing '{'"))?;
            let close = rest.find('}').ok_or_else(|| malformed(name, "missing '}'"))?;
            if close < open {
                return Err(malformed(name, "unbalanced braces"));
            }
            let body = &rest[open + 1..close];

            let list_start = body.find('[').ok_or_else(|| malformed(name, "missing '['"))?;
            let list_end = body.find(']').ok_or_else(|| malformed(name, "missing ']'"))?;
            for item in body[list_start + 1..list_end].split(',') {
                let item = item.trim().trim_matches('"');
                if !item.is_empty() {
                    grants.insert(Grant::new(pattern, item.parse()?));
                }
            }
            rest = &rest[close + 1..];
        }

        Ok(Self { name: name.to_string(), capabilities: grants })
    }
}

fn quoted(input: &str) -> Option<&str> {
    let start = input.find('"')? + 1;
    let len = input[start..].find('"')?;
    Some(&input[start..start + len])
}

fn malformed(name: &str, reason: &str) -> BootstrapError {
    BootstrapError::validation(format!("malformed policy '{}': {}", name, reason))
}

/// Stores and reads named policies.
#[derive(Debug, Clone)]
pub struct PolicyManager {
    backend: Arc<dyn SecretsBackend>,
}

impl PolicyManager {
    pub fn new(backend: Arc<dyn SecretsBackend>) -> Self {
        Self { backend }
    }

    /// Create or replace the policy `name`.
    #[instrument(skip(self, capabilities), fields(policy = %name))]
    pub async fn define_policy(
        &self,
        name: &str,
        capabilities: impl IntoIterator<Item = Grant>,
    ) -> Result<PolicyDocument> {
        let document = PolicyDocument::new(name, capabilities);
        self.apply(&document).await?;
        Ok(document)
    }

    /// Store `document`; skips the write when the stored rules already match.
    pub async fn apply(&self, document: &PolicyDocument) -> Result<()> {
        document.validate()?;
        let rules = document.to_hcl();

        if let Some(existing) = self.backend.policy_read(&document.name).await? {
            let unchanged = existing == rules
                || PolicyDocument::from_hcl(&document.name, &existing)
                    .map(|parsed| parsed.capabilities == document.capabilities)
                    .unwrap_or(false);
            if unchanged {
                debug!(policy = %document.name, "Policy unchanged");
                return Ok(());
            }
        }

        self.backend.policy_write(&document.name, &rules).await?;
        info!(policy = %document.name, grants = document.capabilities.len(), "Policy written");
        Ok(())
    }

    pub async fn get_policy(&self, name: &str) -> Result<PolicyDocument> {
        let rules = self
            .backend
            .policy_read(name)
            .await?
            .ok_or_else(|| BootstrapError::not_found("policy", name))?;
        PolicyDocument::from_hcl(name, &rules)
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.backend.policy_read(name).await?.is_some())
    }

    pub async fn delete_policy(&self, name: &str) -> Result<()> {
        self.backend.policy_delete(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::InMemoryBackend;

    fn connect_ca() -> PolicyDocument {
        let mut grants = vec![Grant::new("/sys/mounts", Capability::Read)];
        grants.extend(Grant::all("/connect_root/*", &Capability::manage()));
        PolicyDocument::new("consul-connect-ca", grants)
    }

    #[test]
    fn test_hcl_rendering() {
        let doc = PolicyDocument::new(
            "gossip",
            vec![Grant::new("consul/data/secret/gossip", Capability::Read)],
        );
        assert_eq!(
            doc.to_hcl(),
            "path \"consul/data/secret/gossip\" {\n  capabilities = [\"read\"]\n}\n"
        );
    }

    #[test]
    fn test_hcl_parse_reads_back_rendered_policy() {
        let doc = connect_ca();
        let parsed = PolicyDocument::from_hcl("consul-connect-ca", &doc.to_hcl()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_hcl_parse_accepts_vault_formatting() {
        let hcl = r#"
path "pki/issue/consul-server" {
    capabilities = [ "create", "update" ]
}
"#;
        let parsed = PolicyDocument::from_hcl("consul-server", hcl).unwrap();
        assert_eq!(parsed.capabilities.len(), 2);
        assert!(parsed.capabilities.contains(&Grant::new("pki/issue/consul-server", Capability::Update)));
    }

    #[test]
    fn test_hcl_parse_rejects_unknown_capability() {
        let hcl = "path \"x\" {\n  capabilities = [\"fly\"]\n}";
        assert!(PolicyDocument::from_hcl("bad", hcl).is_err());
    }

    #[test]
    fn test_validate_rejects_broad_and_empty_policies() {
        assert!(PolicyDocument::new("empty", Vec::new()).validate().is_err());
        assert!(PolicyDocument::new("root", vec![Grant::new("*", Capability::Sudo)])
            .validate()
            .is_err());
        assert!(PolicyDocument::new("bad name", vec![Grant::new("a/b", Capability::Read)])
            .validate()
            .is_err());
        assert!(connect_ca().validate().is_ok());
    }

    #[tokio::test]
    async fn test_define_policy_is_idempotent_upsert() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = PolicyManager::new(backend.clone());

        manager.apply(&connect_ca()).await.unwrap();
        let writes = backend.write_count();
        manager.apply(&connect_ca()).await.unwrap();
        assert_eq!(backend.write_count(), writes);

        manager
            .define_policy("consul-connect-ca", vec![Grant::new("/sys/mounts", Capability::Read)])
            .await
            .unwrap();
        let stored = manager.get_policy("consul-connect-ca").await.unwrap();
        assert_eq!(stored.capabilities.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_policy_is_not_found() {
        let manager = PolicyManager::new(Arc::new(InMemoryBackend::new()));
        let err = manager.get_policy("missing").await.unwrap_err();
        assert!(matches!(err, BootstrapError::NotFound { .. }));
    }
}
