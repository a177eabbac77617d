//! Typed Helm values for a Consul install that reads its secrets from Vault.
//!
//! Field names serialize to the chart's keys, so `to_set_flags` yields the
//! exact `--set` paths (`global.secretsBackend.vault.connectCA.rootPKIPath`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::errors::{BootstrapError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    #[validate(length(min = 1, message = "secretName cannot be empty"))]
    pub secret_name: String,
    #[validate(length(min = 1, message = "secretKey cannot be empty"))]
    pub secret_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SecretNameRef {
    #[validate(length(min = 1, message = "secretName cannot be empty"))]
    pub secret_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ConnectCaValues {
    #[validate(url(message = "connectCA.address must be a URL"))]
    pub address: String,
    #[serde(rename = "rootPKIPath")]
    #[validate(length(min = 1, message = "rootPKIPath cannot be empty"))]
    pub root_pki_path: String,
    #[serde(rename = "intermediatePKIPath")]
    #[validate(length(min = 1, message = "intermediatePKIPath cannot be empty"))]
    pub intermediate_pki_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VaultValues {
    pub enabled: bool,
    #[validate(length(min = 1, message = "consulServerRole cannot be empty"))]
    pub consul_server_role: String,
    #[validate(length(min = 1, message = "consulClientRole cannot be empty"))]
    pub consul_client_role: String,
    #[validate(length(min = 1, message = "consulCARole cannot be empty"))]
    #[serde(rename = "consulCARole")]
    pub consul_ca_role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub ca: Option<SecretKeyRef>,
    #[serde(rename = "connectCA", skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub connect_ca: Option<ConnectCaValues>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsBackendValues {
    pub vault: VaultValues,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclValues {
    #[serde(rename = "manageSystemACLs")]
    pub manage_system_acls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsValues {
    pub enabled: bool,
    pub enable_auto_encrypt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<SecretNameRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalValues {
    pub secrets_backend: SecretsBackendValues,
    pub acls: AclValues,
    pub tls: TlsValues,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gossip_encryption: Option<SecretKeyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enterprise_license: Option<SecretKeyRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraVolume {
    #[serde(rename = "type")]
    pub volume_type: String,
    pub name: String,
    pub load: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_cert: Option<SecretNameRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_volumes: Vec<ExtraVolume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotAgentValues {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientValues {
    pub snapshot_agent: SnapshotAgentValues,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransparentProxyValues {
    pub default_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectInjectValues {
    pub enabled: bool,
    pub replicas: u32,
    pub transparent_proxy: TransparentProxyValues,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerValues {
    pub enabled: bool,
}

/// Complete values payload handed to the mesh deployer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshValues {
    pub global: GlobalValues,
    pub server: ServerValues,
    pub client: ClientValues,
    pub connect_inject: ConnectInjectValues,
    pub controller: ControllerValues,
}

impl MeshValues {
    /// Field-level and cross-field checks.
    pub fn check(&self) -> Result<()> {
        let vault = &self.global.secrets_backend.vault;
        vault.validate()?;
        for reference in [&self.global.gossip_encryption, &self.global.enterprise_license]
            .into_iter()
            .flatten()
        {
            reference.validate()?;
        }
        if let Some(ca_cert) = &self.global.tls.ca_cert {
            ca_cert.validate()?;
        }
        if let Some(server_cert) = &self.server.server_cert {
            server_cert.validate()?;
        }

        let tls = &self.global.tls;
        if tls.enable_auto_encrypt && !tls.enabled {
            return Err(BootstrapError::validation_field(
                "global.tls.enableAutoEncrypt requires global.tls.enabled",
                "global.tls.enableAutoEncrypt",
            ));
        }
        if tls.enabled && tls.ca_cert.is_none() {
            return Err(BootstrapError::validation_field(
                "global.tls.enabled requires global.tls.caCert.secretName",
                "global.tls.caCert.secretName",
            ));
        }

        let agent = &self.client.snapshot_agent;
        if agent.enabled && (agent.secret_name.is_none() || agent.secret_key.is_none()) {
            return Err(BootstrapError::validation_field(
                "client.snapshotAgent requires secretName and secretKey",
                "client.snapshotAgent",
            ));
        }

        if self.connect_inject.enabled && self.connect_inject.replicas == 0 {
            return Err(BootstrapError::validation_field(
                "connectInject.replicas must be at least 1",
                "connectInject.replicas",
            ));
        }
        Ok(())
    }

    /// Flatten into Helm `--set` pairs keyed by dotted path.
    pub fn to_set_flags(&self) -> Result<BTreeMap<String, String>> {
        let tree = serde_json::to_value(self)
            .map_err(|e| BootstrapError::internal(format!("serialize mesh values: {}", e)))?;
        let mut flags = BTreeMap::new();
        flatten(&tree, String::new(), &mut flags);
        Ok(flags)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn flatten(value: &Value, prefix: String, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };
                flatten(child, path, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(child, format!("{}[{}]", prefix, index), out);
            }
        }
        Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        Value::Null => {}
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_paths() {
        let mut out = BTreeMap::new();
        flatten(
            &json!({"server": {"extraVolumes": [{"type": "secret", "load": false}]}, "n": 1}),
            String::new(),
            &mut out,
        );
        assert_eq!(out["server.extraVolumes[0].type"], "secret");
        assert_eq!(out["server.extraVolumes[0].load"], "false");
        assert_eq!(out["n"], "1");
    }
}
