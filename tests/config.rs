use std::env;
use std::io::Write;
use std::sync::Mutex;

use meshvault::mesh::FeatureKey;
use meshvault::secrets::BackendType;
use meshvault::{AppConfig, BootstrapPlan};

// Serializes tests that read or modify environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

#[test]
fn yaml_file_drives_the_plan() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        r#"
bootstrap:
  backend: in_memory
  datacenter: dc2
  release_name: mesh
  enterprise_license: "02MV4UU43BK5"
mesh:
  intermediate_pki_path: dc2/connect_inter
  features:
    enterprise_license: true
    snapshot_agent: false
"#
    )
    .unwrap();

    let config = AppConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.bootstrap.backend, BackendType::InMemory);

    let plan = BootstrapPlan::consul(&config).unwrap();
    assert!(plan.features.contains(&FeatureKey::EnterpriseLicense));
    assert!(!plan.features.contains(&FeatureKey::SnapshotAgent));
    assert!(plan.authorities.iter().any(|a| a.mount == "dc2/connect_inter"));
    assert!(plan
        .roles
        .iter()
        .any(|r| r.identity.service_account == "mesh-consul-server"));
}

#[test]
fn environment_overrides_file_values() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[validation]\nexpected_status = 200\n").unwrap();

    env::set_var("MESHVAULT__VALIDATION__EXPECTED_STATUS", "204");
    let config = AppConfig::load(Some(file.path()));
    env::remove_var("MESHVAULT__VALIDATION__EXPECTED_STATUS");

    assert_eq!(config.unwrap().validation.expected_status, 204);
}

#[test]
fn license_without_value_is_rejected_at_load() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[mesh.features]\nenterprise_license = true\n").unwrap();

    assert!(AppConfig::load(Some(file.path())).is_err());
}
