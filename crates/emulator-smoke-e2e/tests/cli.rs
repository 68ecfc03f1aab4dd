//! `emulator-smoke` binary against emulators that are not there

use assert_cmd::Command;
use emulator_smoke_clients::config::{AZURITE_KEY, COSMOS_EMULATOR_KEY};
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "EMULATOR_SMOKE_CONFIG",
    "EMULATOR_SMOKE_COSMOS_ENDPOINT",
    "EMULATOR_SMOKE_COSMOS_KEY",
    "EMULATOR_SMOKE_MONGO_URI",
    "EMULATOR_SMOKE_STORAGE_CONNECTION_STRING",
    "EMULATOR_SMOKE_SERVICEBUS_CONNECTION_STRING",
    "EMULATOR_SMOKE_SERVICEBUS_QUEUE",
    "EMULATOR_SMOKE_RECEIVE_WAIT_SECS",
    "EMULATOR_SMOKE_CONTAINER_RUNTIME",
];

fn closed_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Config file pointing every emulator at a port nothing listens on
fn write_unreachable_config(dir: &Path) -> std::path::PathBuf {
    let port = closed_port();
    let content = format!(
        r#"receive_wait_secs = 1
container_runtime = "emulator-smoke-no-such-runtime"

[cosmos]
endpoint = "https://127.0.0.1:{port}/"

[mongo]
uri = "mongodb://127.0.0.1:{port}/?serverSelectionTimeoutMS=500"

[storage]
connection_string = "DefaultEndpointsProtocol=http;AccountName=devstoreaccount1;AccountKey={key};BlobEndpoint=http://127.0.0.1:{port}/devstoreaccount1;QueueEndpoint=http://127.0.0.1:{port}/devstoreaccount1;TableEndpoint=http://127.0.0.1:{port}/devstoreaccount1;"

[service_bus]
connection_string = "Endpoint=sb://127.0.0.1;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=SAS_KEY_VALUE;UseDevelopmentEmulator=true;"
"#,
        port = port,
        key = AZURITE_KEY,
    );
    let path = dir.join("emulator-smoke.toml");
    std::fs::write(&path, content).expect("Failed to write config");
    path
}

fn cli(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("emulator-smoke").expect("binary not built");
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.arg("--config").arg(config);
    cmd
}

// ============================================================================
// config
// ============================================================================

#[test]
fn test_config_redacts_keys() {
    let dir = TempDir::new().unwrap();
    let config = write_unreachable_config(dir.path());

    cli(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cosmos key:"))
        .stdout(predicate::str::contains("****"))
        .stdout(predicate::str::contains(COSMOS_EMULATOR_KEY).not())
        .stdout(predicate::str::contains(AZURITE_KEY).not());
}

#[test]
fn test_missing_config_file_is_usage_error() {
    let dir = TempDir::new().unwrap();

    cli(&dir.path().join("missing.toml"))
        .arg("config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_unknown_group_is_usage_error() {
    let dir = TempDir::new().unwrap();
    let config = write_unreachable_config(dir.path());

    cli(&config)
        .args(["run", "--group", "eventhub"])
        .assert()
        .code(2);
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_unreachable_group_is_skipped() {
    let dir = TempDir::new().unwrap();
    let config = write_unreachable_config(dir.path());

    cli(&config)
        .args(["run", "--group", "cosmos"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("SKIP cosmos-crud"))
        .stdout(predicate::str::contains("0 passed, 0 failed, 1 skipped"));
}

#[test]
fn test_run_require_all_fails_on_skip() {
    let dir = TempDir::new().unwrap();
    let config = write_unreachable_config(dir.path());

    cli(&config)
        .args(["run", "--group", "storage", "--require-all"])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("SKIP blob-crud"))
        .stdout(predicate::str::contains("SKIP table-crud"))
        .stdout(predicate::str::contains("0 passed, 0 failed, 3 skipped"));
}

// ============================================================================
// probe and diagnose
// ============================================================================

#[test]
fn test_probe_unreachable_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_unreachable_config(dir.path());

    cli(&config)
        .args(["probe", "--group", "storage"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("blob"))
        .stdout(predicate::str::contains("FAIL"));
}

#[test]
fn test_diagnose_reports_missing_runtime() {
    let dir = TempDir::new().unwrap();
    let config = write_unreachable_config(dir.path());

    cli(&config)
        .args(["diagnose", "--group", "service-bus"])
        .assert()
        .success()
        .stdout(predicate::str::contains("service-bus"))
        .stdout(predicate::str::contains("emulator-smoke-no-such-runtime"));
}
