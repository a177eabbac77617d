//! What a bootstrap run provisions, derived once from [`AppConfig`].
//!
//! The plan is plain data. The orchestrator walks it stage by stage and never
//! consults the configuration again.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Serialize;

use super::cleanup::ResourceHandle;
use crate::auth::IdentitySelector;
use crate::config::AppConfig;
use crate::errors::{BootstrapError, Result};
use crate::mesh::{FeatureKey, MeshSettings};
use crate::policy::{Capability, Grant, PolicyDocument};
use crate::secrets::{PkiRoleConfig, SecretRef, SecretString};

pub const GOSSIP_POLICY: &str = "gossip";
pub const CONNECT_CA_POLICY: &str = "consul-connect-ca";
pub const SERVER_POLICY: &str = "consul-server";
pub const CA_POLICY: &str = "consul-ca";
pub const SNAPSHOT_AGENT_POLICY: &str = "snapshot-agent-config";
pub const LICENSE_POLICY: &str = "license";

/// Field every PKI-backed reference reads.
const CERTIFICATE_FIELD: &str = "certificate";

/// How a secret's value is obtained.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SecretSource {
    /// Random gossip encryption key, generated only when none is stored
    GossipKey,
    /// Supplied value, written as is
    Value { value: SecretString },
}

/// One KV secret to provision.
#[derive(Debug, Clone, Serialize)]
pub struct SecretSpec {
    pub feature: FeatureKey,
    pub path: String,
    pub field: String,
    pub source: SecretSource,
}

impl SecretSpec {
    pub fn reference(&self) -> SecretRef {
        SecretRef::new(&self.path, &self.field)
    }
}

/// One Kubernetes auth role to bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSpec {
    pub name: String,
    pub identity: IdentitySelector,
    pub policies: Vec<String>,
}

/// One certificate authority to provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthoritySpec {
    pub mount: String,
    /// `None` for a self-signed root
    pub parent: Option<String>,
    pub common_name: String,
    pub ttl: Duration,
}

/// A PKI role registered on an issuer mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PkiRoleSpec {
    pub mount: String,
    pub role: PkiRoleConfig,
}

/// Everything one bootstrap run provisions.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapPlan {
    pub auth_mount: String,
    pub kubernetes_host: String,
    pub token_ttl: Duration,
    pub policies: Vec<PolicyDocument>,
    pub roles: Vec<RoleSpec>,
    /// Roots first, then intermediates in dependency order
    pub authorities: Vec<AuthoritySpec>,
    pub pki_roles: Vec<PkiRoleSpec>,
    pub secrets: Vec<SecretSpec>,
    /// Features served straight from PKI endpoints rather than KV
    pub pki_references: BTreeMap<FeatureKey, SecretRef>,
    pub features: BTreeSet<FeatureKey>,
    pub mesh: MeshSettings,
}

impl BootstrapPlan {
    /// The Consul-on-Vault layout: gossip, connect CA, server TLS, snapshot
    /// agent and optional enterprise license, each gated on its feature flag.
    pub fn consul(config: &AppConfig) -> Result<Self> {
        let bootstrap = &config.bootstrap;
        let pki = &config.pki;
        let mesh = &config.mesh;
        let features = &mesh.features;

        let kv = |name: &str| format!("{}/data/secret/{}", bootstrap.kv_mount, name);
        let fullname = chart_fullname(&bootstrap.release_name);
        let server_sa = format!("{}-server", fullname);
        let client_sa = format!("{}-client", fullname);
        let server_issue_path = format!("{}/issue/{}", pki.server_ca_mount, pki.server_role_name);
        let server_ca_path = format!("{}/cert/ca", pki.server_ca_mount);

        let mut policies = Vec::new();
        let mut secrets = Vec::new();
        let mut authorities = Vec::new();
        let mut pki_roles = Vec::new();
        let mut pki_references = BTreeMap::new();
        let mut server_policies = Vec::new();
        let mut client_policies = Vec::new();
        let mut ca_policies = Vec::new();

        if features.gossip_encryption {
            let path = kv("gossip");
            policies.push(PolicyDocument::new(
                GOSSIP_POLICY,
                [Grant::new(path.clone(), Capability::Read)],
            ));
            secrets.push(SecretSpec {
                feature: FeatureKey::GossipEncryption,
                path,
                field: "gossip".to_string(),
                source: SecretSource::GossipKey,
            });
            server_policies.push(GOSSIP_POLICY);
            client_policies.push(GOSSIP_POLICY);
        }

        if features.connect_ca {
            let root = &mesh.root_pki_path;
            let inter = &mesh.intermediate_pki_path;

            let mut grants = vec![Grant::new("/sys/mounts", Capability::Read)];
            for mount in [root, inter] {
                grants.extend(Grant::all(&format!("/sys/mounts/{}", mount), &Capability::manage()));
                grants.extend(Grant::all(&format!("/{}/*", mount), &Capability::manage()));
            }
            policies.push(PolicyDocument::new(CONNECT_CA_POLICY, grants));
            server_policies.push(CONNECT_CA_POLICY);

            authorities.push(AuthoritySpec {
                mount: root.clone(),
                parent: None,
                common_name: pki.root_common_name.clone(),
                ttl: pki.root_ttl(),
            });
            authorities.push(AuthoritySpec {
                mount: inter.clone(),
                parent: Some(root.clone()),
                common_name: pki.intermediate_common_name.clone(),
                ttl: pki.intermediate_ttl(),
            });
            pki_roles.push(PkiRoleSpec { mount: inter.clone(), role: server_role(config) });
            pki_references
                .insert(FeatureKey::ConnectCa, SecretRef::new(format!("{}/cert/ca", inter), CERTIFICATE_FIELD));
        }

        if features.tls {
            policies.push(PolicyDocument::new(
                SERVER_POLICY,
                Grant::all(&server_issue_path, &[Capability::Create, Capability::Update]),
            ));
            policies.push(PolicyDocument::new(
                CA_POLICY,
                [Grant::new(server_ca_path.clone(), Capability::Read)],
            ));
            server_policies.push(SERVER_POLICY);
            ca_policies.push(CA_POLICY);

            authorities.insert(
                0,
                AuthoritySpec {
                    mount: pki.server_ca_mount.clone(),
                    parent: None,
                    common_name: pki.server_ca_common_name.clone(),
                    ttl: pki.root_ttl(),
                },
            );
            pki_roles.insert(
                0,
                PkiRoleSpec { mount: pki.server_ca_mount.clone(), role: server_role(config) },
            );
            pki_references.insert(
                FeatureKey::ServerCert,
                SecretRef::new(server_issue_path, CERTIFICATE_FIELD),
            );
            pki_references.insert(FeatureKey::CaCert, SecretRef::new(server_ca_path, CERTIFICATE_FIELD));
        }

        if features.snapshot_agent {
            let path = kv("snapshotagentconfig");
            policies.push(PolicyDocument::new(
                SNAPSHOT_AGENT_POLICY,
                [Grant::new(path.clone(), Capability::Read)],
            ));
            secrets.push(SecretSpec {
                feature: FeatureKey::SnapshotAgent,
                path,
                field: "snapshotagentconfig".to_string(),
                source: SecretSource::Value { value: bootstrap.snapshot_agent_config.clone() },
            });
            client_policies.push(SNAPSHOT_AGENT_POLICY);
        }

        if features.enterprise_license {
            let value = bootstrap
                .enterprise_license
                .clone()
                .filter(|license| !license.is_empty())
                .ok_or_else(|| {
                    BootstrapError::config("enterprise license feature enabled without a license")
                })?;
            let path = kv("enterpriselicense");
            policies.push(PolicyDocument::new(
                LICENSE_POLICY,
                [Grant::new(path.clone(), Capability::Read)],
            ));
            secrets.push(SecretSpec {
                feature: FeatureKey::EnterpriseLicense,
                path,
                field: "enterpriselicense".to_string(),
                source: SecretSource::Value { value },
            });
            server_policies.push(LICENSE_POLICY);
            client_policies.push(LICENSE_POLICY);
        }

        let namespace = &bootstrap.namespace;
        let roles = [
            (&mesh.server_role, IdentitySelector::new(namespace, server_sa), server_policies),
            (&mesh.client_role, IdentitySelector::new(namespace, client_sa), client_policies),
            (&mesh.ca_role, IdentitySelector::new(namespace, "*"), ca_policies),
        ]
        .into_iter()
        .filter(|(_, _, policies)| !policies.is_empty())
        .map(|(name, identity, policies)| RoleSpec {
            name: name.clone(),
            identity,
            policies: policies.into_iter().map(String::from).collect(),
        })
        .collect();

        Ok(Self {
            auth_mount: config.auth.mount.clone(),
            kubernetes_host: config.auth.kubernetes_host.clone(),
            token_ttl: config.auth.token_ttl(),
            policies,
            roles,
            authorities,
            pki_roles,
            secrets,
            pki_references,
            features: features.requested(),
            mesh: mesh.clone(),
        })
    }

    /// Every secret reference the plan produces once it has run.
    pub fn expected_references(&self) -> BTreeMap<FeatureKey, SecretRef> {
        let mut resolved = self.pki_references.clone();
        for spec in &self.secrets {
            resolved.insert(spec.feature, spec.reference());
        }
        resolved
    }

    /// Handles for everything the plan provisions, in provisioning order.
    pub fn handles(&self) -> Vec<ResourceHandle> {
        let policies = self.policies.iter().map(|p| ResourceHandle::Policy { name: p.name.clone() });
        let roles = self.roles.iter().map(|r| ResourceHandle::AuthRole {
            mount: self.auth_mount.clone(),
            name: r.name.clone(),
        });
        let mounts = self.roots().chain(self.intermediates()).map(|a| ResourceHandle::PkiMount {
            mount: a.mount.clone(),
        });
        let secrets = self.secrets.iter().map(|s| ResourceHandle::Secret { path: s.path.clone() });

        policies.chain(roles).chain(mounts).chain(secrets).collect()
    }

    pub fn roots(&self) -> impl Iterator<Item = &AuthoritySpec> {
        self.authorities.iter().filter(|a| a.parent.is_none())
    }

    pub fn intermediates(&self) -> impl Iterator<Item = &AuthoritySpec> {
        self.authorities.iter().filter(|a| a.parent.is_some())
    }

    /// PKI roles whose issuer mount is one of `mounts`.
    pub fn pki_roles_on<'a>(&'a self, mounts: &'a [String]) -> impl Iterator<Item = &'a PkiRoleSpec> {
        self.pki_roles.iter().filter(move |r| mounts.contains(&r.mount))
    }
}

/// Resource prefix the chart derives from the release name.
fn chart_fullname(release_name: &str) -> String {
    if release_name.contains("consul") {
        release_name.to_string()
    } else {
        format!("{}-consul", release_name)
    }
}

/// Server certificate role: the datacenter domain plus the in-cluster service names.
fn server_role(config: &AppConfig) -> PkiRoleConfig {
    let dc = &config.bootstrap.datacenter;
    let server = format!("{}-server", chart_fullname(&config.bootstrap.release_name));
    let namespace = &config.bootstrap.namespace;

    PkiRoleConfig {
        name: config.pki.server_role_name.clone(),
        allowed_domains: vec![
            format!("{}.consul", dc),
            server.clone(),
            format!("{}.{}", server, namespace),
            format!("{}.{}.svc", server, namespace),
        ],
        allow_subdomains: true,
        allow_bare_domains: true,
        allow_localhost: true,
        allow_any_name: false,
        generate_lease: true,
        max_ttl: config.pki.server_cert_max_ttl(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy<'a>(plan: &'a BootstrapPlan, name: &str) -> Option<&'a PolicyDocument> {
        plan.policies.iter().find(|p| p.name == name)
    }

    fn role<'a>(plan: &'a BootstrapPlan, name: &str) -> &'a RoleSpec {
        plan.roles.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn test_default_plan_layout() {
        let plan = BootstrapPlan::consul(&AppConfig::default()).unwrap();

        let names: Vec<_> = plan.policies.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["gossip", "consul-connect-ca", "consul-server", "consul-ca", "snapshot-agent-config"]
        );

        let mounts: Vec<_> = plan.authorities.iter().map(|a| a.mount.as_str()).collect();
        assert_eq!(mounts, vec!["pki", "connect_root", "dc1/connect_inter"]);
        assert_eq!(plan.intermediates().next().unwrap().parent.as_deref(), Some("connect_root"));

        assert_eq!(plan.secrets[0].path, "consul/data/secret/gossip");
        assert_eq!(plan.secrets[0].field, "gossip");
        assert!(plan.features.contains(&FeatureKey::ConnectCa));
        assert!(!plan.features.contains(&FeatureKey::EnterpriseLicense));
    }

    #[test]
    fn test_roles_carry_expected_policies() {
        let plan = BootstrapPlan::consul(&AppConfig::default()).unwrap();

        let server = role(&plan, "consul-server");
        assert_eq!(server.identity, IdentitySelector::new("default", "consul-server"));
        assert_eq!(server.policies, vec!["gossip", "consul-connect-ca", "consul-server"]);

        let client = role(&plan, "consul-client");
        assert_eq!(client.policies, vec!["gossip", "snapshot-agent-config"]);

        let ca = role(&plan, "consul-ca");
        assert_eq!(ca.identity.service_account, "*");
        assert_eq!(ca.policies, vec!["consul-ca"]);
    }

    #[test]
    fn test_connect_ca_policy_covers_both_mounts() {
        let plan = BootstrapPlan::consul(&AppConfig::default()).unwrap();
        let hcl = policy(&plan, CONNECT_CA_POLICY).unwrap().to_hcl();

        assert!(hcl.contains("path \"/sys/mounts\""));
        assert!(hcl.contains("path \"/connect_root/*\""));
        assert!(hcl.contains("path \"/dc1/connect_inter/*\""));
        assert!(hcl.contains("path \"/sys/mounts/dc1/connect_inter\""));
    }

    #[test]
    fn test_license_requires_value() {
        let mut config = AppConfig::default();
        config.mesh.features.enterprise_license = true;
        let err = BootstrapPlan::consul(&config).unwrap_err();
        assert!(matches!(err, BootstrapError::Config { .. }));

        config.bootstrap.enterprise_license = Some(SecretString::new("license-text"));
        let plan = BootstrapPlan::consul(&config).unwrap();
        assert!(policy(&plan, LICENSE_POLICY).is_some());
        assert!(role(&plan, "consul-server").policies.contains(&LICENSE_POLICY.to_string()));
        assert!(role(&plan, "consul-client").policies.contains(&LICENSE_POLICY.to_string()));
    }

    #[test]
    fn test_disabled_features_drop_resources() {
        let mut config = AppConfig::default();
        config.mesh.features.tls = false;
        config.mesh.features.snapshot_agent = false;

        let plan = BootstrapPlan::consul(&config).unwrap();
        assert!(policy(&plan, SERVER_POLICY).is_none());
        assert!(policy(&plan, SNAPSHOT_AGENT_POLICY).is_none());
        assert!(plan.roles.iter().all(|r| r.name != "consul-ca"));
        assert!(plan.authorities.iter().all(|a| a.mount != "pki"));
        assert!(!plan.pki_references.contains_key(&FeatureKey::ServerCert));
        assert_eq!(plan.secrets.len(), 1);
    }

    #[test]
    fn test_service_accounts_follow_chart_naming() {
        let mut config = AppConfig::default();
        config.bootstrap.release_name = "mesh".to_string();
        let plan = BootstrapPlan::consul(&config).unwrap();
        assert_eq!(role(&plan, "consul-server").identity.service_account, "mesh-consul-server");
        assert_eq!(role(&plan, "consul-client").identity.service_account, "mesh-consul-client");
    }

    #[test]
    fn test_handles_follow_provisioning_order() {
        let plan = BootstrapPlan::consul(&AppConfig::default()).unwrap();
        let handles = plan.handles();

        assert_eq!(handles.first(), Some(&ResourceHandle::Policy { name: "gossip".into() }));
        assert_eq!(
            handles.last(),
            Some(&ResourceHandle::Secret { path: "consul/data/secret/snapshotagentconfig".into() })
        );
        let root = handles
            .iter()
            .position(|h| h == &ResourceHandle::PkiMount { mount: "connect_root".into() })
            .unwrap();
        let inter = handles
            .iter()
            .position(|h| h == &ResourceHandle::PkiMount { mount: "dc1/connect_inter".into() })
            .unwrap();
        assert!(root < inter);
        assert_eq!(plan.expected_references().len(), plan.features.len());
    }

    #[test]
    fn test_server_role_domains() {
        let plan = BootstrapPlan::consul(&AppConfig::default()).unwrap();
        let mounts = ["dc1/connect_inter".to_string()];
        let on_inter: Vec<_> = plan.pki_roles_on(&mounts).collect();
        assert_eq!(on_inter.len(), 1);

        let role = &on_inter[0].role;
        assert!(role.allows("server.dc1.consul"));
        assert!(role.allows("consul-server.default.svc"));
        assert_eq!(role.max_ttl, Duration::from_secs(3600));
    }
}
