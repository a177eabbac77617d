//! # Mesh configuration mapping
//!
//! Turns provisioned secret locations into the configuration the mesh consumes.
//! [`MeshConfigMapper::map`] gates every requested feature on a resolved secret;
//! [`MeshConfigMapper::build_values`] renders the typed Helm values from those
//! references and the static [`MeshSettings`].

pub mod values;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

pub use values::MeshValues;
use values::{
    AclValues, ClientValues, ConnectCaValues, ConnectInjectValues, ControllerValues, ExtraVolume,
    GlobalValues, SecretKeyRef, SecretNameRef, SecretsBackendValues, ServerValues,
    SnapshotAgentValues, TlsValues, TransparentProxyValues, VaultValues,
};

use crate::errors::{BootstrapError, Result};
use crate::secrets::SecretRef;

/// Mesh features that consume a provisioned secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureKey {
    #[serde(rename = "gossipEncryption")]
    GossipEncryption,
    #[serde(rename = "connectCA")]
    ConnectCa,
    #[serde(rename = "snapshotAgent")]
    SnapshotAgent,
    #[serde(rename = "enterpriseLicense")]
    EnterpriseLicense,
    #[serde(rename = "serverCert")]
    ServerCert,
    #[serde(rename = "caCert")]
    CaCert,
}

impl FeatureKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GossipEncryption => "gossipEncryption",
            Self::ConnectCa => "connectCA",
            Self::SnapshotAgent => "snapshotAgent",
            Self::EnterpriseLicense => "enterpriseLicense",
            Self::ServerCert => "serverCert",
            Self::CaCert => "caCert",
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every feature toggle the mapper understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshFeatures {
    /// `global.acls.manageSystemACLs`
    pub acls: bool,
    /// `global.tls.enabled`; requires the server cert and CA cert secrets
    pub tls: bool,
    /// `global.tls.enableAutoEncrypt`; only honored with `tls`
    pub auto_encrypt: bool,
    pub gossip_encryption: bool,
    /// Mesh identity CA backed by the PKI hierarchy
    pub connect_ca: bool,
    pub snapshot_agent: bool,
    pub enterprise_license: bool,
    pub connect_inject: bool,
    /// Changes the connectivity probe target, not the secrets
    pub transparent_proxy: bool,
}

impl Default for MeshFeatures {
    fn default() -> Self {
        Self {
            acls: true,
            tls: true,
            auto_encrypt: true,
            gossip_encryption: true,
            connect_ca: true,
            snapshot_agent: true,
            enterprise_license: false,
            connect_inject: true,
            transparent_proxy: false,
        }
    }
}

impl MeshFeatures {
    /// Features that need a secret reference, in [`FeatureKey`] order.
    pub fn requested(&self) -> BTreeSet<FeatureKey> {
        let mut keys = BTreeSet::new();
        if self.gossip_encryption {
            keys.insert(FeatureKey::GossipEncryption);
        }
        if self.connect_ca {
            keys.insert(FeatureKey::ConnectCa);
        }
        if self.snapshot_agent {
            keys.insert(FeatureKey::SnapshotAgent);
        }
        if self.enterprise_license {
            keys.insert(FeatureKey::EnterpriseLicense);
        }
        if self.tls {
            keys.insert(FeatureKey::ServerCert);
            keys.insert(FeatureKey::CaCert);
        }
        keys
    }
}

/// Static inputs for the values payload: backend address, role names, PKI paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MeshSettings {
    pub features: MeshFeatures,

    /// Vault address as seen from inside the mesh cluster
    #[validate(url(message = "Vault address must be a URL"))]
    pub vault_address: String,

    /// Kubernetes secret holding Vault's TLS CA certificate
    pub vault_ca_secret_name: Option<String>,

    #[validate(length(min = 1, message = "Vault CA secret key cannot be empty"))]
    pub vault_ca_secret_key: String,

    #[validate(length(min = 1, message = "Server role cannot be empty"))]
    pub server_role: String,

    #[validate(length(min = 1, message = "Client role cannot be empty"))]
    pub client_role: String,

    #[validate(length(min = 1, message = "CA role cannot be empty"))]
    pub ca_role: String,

    #[validate(length(min = 1, message = "Root PKI path cannot be empty"))]
    pub root_pki_path: String,

    #[validate(length(min = 1, message = "Intermediate PKI path cannot be empty"))]
    pub intermediate_pki_path: String,

    #[validate(range(min = 1, max = 10, message = "Connect inject replicas must be between 1 and 10"))]
    pub connect_inject_replicas: u32,

    pub controller_enabled: bool,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            features: MeshFeatures::default(),
            vault_address: "http://vault.default.svc:8200".to_string(),
            vault_ca_secret_name: None,
            vault_ca_secret_key: "tls.crt".to_string(),
            server_role: "consul-server".to_string(),
            client_role: "consul-client".to_string(),
            ca_role: "consul-ca".to_string(),
            root_pki_path: "connect_root".to_string(),
            intermediate_pki_path: "dc1/connect_inter".to_string(),
            connect_inject_replicas: 1,
            controller_enabled: true,
        }
    }
}

/// Where the mesh reads the secret for one feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshConsumptionReference {
    pub feature: FeatureKey,
    pub secret_path: String,
    pub secret_field: String,
}

/// Stateless mapping from provisioned secrets to mesh configuration.
pub struct MeshConfigMapper;

impl MeshConfigMapper {
    /// One reference per requested feature, in [`FeatureKey`] order.
    ///
    /// Fails with [`BootstrapError::MissingSecret`] for the first requested
    /// feature that has no resolved secret.
    pub fn map(
        features: &BTreeSet<FeatureKey>,
        resolved: &BTreeMap<FeatureKey, SecretRef>,
    ) -> Result<Vec<MeshConsumptionReference>> {
        features
            .iter()
            .map(|feature| {
                let secret = resolved
                    .get(feature)
                    .ok_or_else(|| BootstrapError::missing_secret(feature.as_str()))?;
                Ok(MeshConsumptionReference {
                    feature: *feature,
                    secret_path: secret.path.clone(),
                    secret_field: secret.field.clone(),
                })
            })
            .collect()
    }

    /// Render validated Helm values from `references`.
    pub fn build_values(
        settings: &MeshSettings,
        references: &[MeshConsumptionReference],
    ) -> Result<MeshValues> {
        settings.validate()?;

        let by_feature: BTreeMap<FeatureKey, &MeshConsumptionReference> =
            references.iter().map(|r| (r.feature, r)).collect();
        let key_ref = |feature: FeatureKey| {
            by_feature.get(&feature).map(|r| SecretKeyRef {
                secret_name: r.secret_path.clone(),
                secret_key: r.secret_field.clone(),
            })
        };
        let name_ref = |feature: FeatureKey| {
            by_feature.get(&feature).map(|r| SecretNameRef { secret_name: r.secret_path.clone() })
        };

        let features = &settings.features;
        let snapshot = by_feature.get(&FeatureKey::SnapshotAgent);

        let values = MeshValues {
            global: GlobalValues {
                secrets_backend: SecretsBackendValues {
                    vault: VaultValues {
                        enabled: true,
                        consul_server_role: settings.server_role.clone(),
                        consul_client_role: settings.client_role.clone(),
                        consul_ca_role: settings.ca_role.clone(),
                        ca: settings.vault_ca_secret_name.as_ref().map(|name| SecretKeyRef {
                            secret_name: name.clone(),
                            secret_key: settings.vault_ca_secret_key.clone(),
                        }),
                        connect_ca: by_feature.get(&FeatureKey::ConnectCa).map(|_| {
                            ConnectCaValues {
                                address: settings.vault_address.clone(),
                                root_pki_path: settings.root_pki_path.clone(),
                                intermediate_pki_path: settings.intermediate_pki_path.clone(),
                            }
                        }),
                    },
                },
                acls: AclValues { manage_system_acls: features.acls },
                tls: TlsValues {
                    enabled: features.tls,
                    enable_auto_encrypt: features.tls && features.auto_encrypt,
                    ca_cert: name_ref(FeatureKey::CaCert),
                },
                gossip_encryption: key_ref(FeatureKey::GossipEncryption),
                enterprise_license: key_ref(FeatureKey::EnterpriseLicense),
            },
            server: ServerValues {
                server_cert: name_ref(FeatureKey::ServerCert),
                extra_volumes: settings
                    .vault_ca_secret_name
                    .iter()
                    .map(|name| ExtraVolume {
                        volume_type: "secret".to_string(),
                        name: name.clone(),
                        load: false,
                    })
                    .collect(),
            },
            client: ClientValues {
                snapshot_agent: SnapshotAgentValues {
                    enabled: snapshot.is_some(),
                    secret_name: snapshot.map(|r| r.secret_path.clone()),
                    secret_key: snapshot.map(|r| r.secret_field.clone()),
                },
            },
            connect_inject: ConnectInjectValues {
                enabled: features.connect_inject,
                replicas: settings.connect_inject_replicas,
                transparent_proxy: TransparentProxyValues {
                    default_enabled: features.transparent_proxy,
                },
            },
            controller: ControllerValues { enabled: settings.controller_enabled },
        };

        values.check()?;
        debug!(references = references.len(), "Mesh values built");
        Ok(values)
    }
}
