use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_mentions_the_daemon_flags() {
    let mut cmd = Command::cargo_bin("caskyd").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--port"))
        .stdout(predicate::str::contains("--sync-on-write"));
}

#[test]
fn version_flag_prints_the_crate_version() {
    let mut cmd = Command::cargo_bin("caskyd").unwrap();
    cmd.arg("--version").assert().success();
}

#[test]
fn malformed_config_file_fails_fast_before_binding_a_socket() {
    let dir = tempfile::tempdir().unwrap();
    let bad_config = dir.path().join("broken.toml");
    std::fs::write(&bad_config, b"this is not = [valid toml").unwrap();

    let mut cmd = Command::cargo_bin("caskyd").unwrap();
    cmd.args(["--config", bad_config.to_str().unwrap()]).assert().failure();
}
