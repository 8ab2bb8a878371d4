#![allow(deprecated)]
use armada_core::catalog::{Catalog, NewHost, NewInventory};
use armada_core::config::Config;
use armada_core::hooks::HookRegistry;
use armada_core::identity::Identity;
use armada_core::types::EntityRef;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn armada(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("armada").unwrap();
    cmd.current_dir(dir.path())
        .env("ARMADA_ROOT", dir.path())
        .env_remove("ARMADA_USER");
    cmd
}

fn init(dir: &TempDir) {
    armada(dir).arg("init").assert().success();
}

/// Inventory with two hosts, created by the default admin. Returns the
/// inventory id.
fn seed_inventory(dir: &TempDir) -> u64 {
    let config = Config::load(dir.path()).unwrap();
    let store = armada_core::open_store(dir.path(), &config, HookRegistry::new()).unwrap();
    let catalog = Catalog::new(store);
    let admin = Identity::superuser(1);

    let inventory = catalog
        .create_inventory(
            &admin,
            NewInventory {
                name: "prod".into(),
                notes: String::new(),
            },
        )
        .unwrap();
    for name in ["web01", "db01"] {
        let host = catalog
            .create_host(
                &admin,
                serde_json::from_value::<NewHost>(serde_json::json!({ "name": name })).unwrap(),
            )
            .unwrap();
        catalog
            .add_host(&admin, EntityRef::inventory(inventory.id), host.id)
            .unwrap();
    }
    inventory.id
}

// ---------------------------------------------------------------------------
// armada init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_workspace() {
    let dir = TempDir::new().unwrap();
    armada(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .armada/config.yaml"));

    assert!(dir.path().join(".armada").is_dir());
    assert!(dir.path().join(".armada/runs").is_dir());
    assert!(dir.path().join(".armada/config.yaml").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    armada(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .armada/config.yaml"));
}

// ---------------------------------------------------------------------------
// armada config
// ---------------------------------------------------------------------------

#[test]
fn config_requires_init() {
    let dir = TempDir::new().unwrap();
    armada(&dir)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn fresh_config_is_valid() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    armada(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_show_json_has_defaults() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let output = armada(&dir)
        .args(["--json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["server"]["bind"], "127.0.0.1:8640");
    assert_eq!(value["engine"]["playbook_bin"], "ansible-playbook");
}

#[test]
fn invalid_bind_fails_validation() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let path = dir.path().join(".armada/config.yaml");
    let yaml = std::fs::read_to_string(&path)
        .unwrap()
        .replace("127.0.0.1:8640", "not-an-address");
    std::fs::write(&path, yaml).unwrap();

    armada(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"));
}

// ---------------------------------------------------------------------------
// armada history / inventory
// ---------------------------------------------------------------------------

#[test]
fn history_is_empty_on_fresh_store() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    armada(&dir)
        .args(["history", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs."));
}

#[test]
fn history_show_unknown_run_fails() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    armada(&dir)
        .args(["history", "show", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("history 42"));
}

#[test]
fn inventory_hosts_lists_members() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let inventory = seed_inventory(&dir);

    armada(&dir)
        .args(["inventory", "hosts", &inventory.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("web01"))
        .stdout(predicate::str::contains("db01"));
}

#[test]
fn unknown_user_cannot_act() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    armada(&dir)
        .args(["--user", "77", "history", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot act as user 77"));
}
