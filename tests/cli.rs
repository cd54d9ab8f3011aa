use assert_cmd::Command;
use predicates::prelude::*;

fn transcriptor() -> Command {
    let mut cmd = Command::cargo_bin("transcriptor").unwrap();
    cmd.env_remove("FAL_KEY").env_remove("TRANSCRIPTOR_CONFIG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    transcriptor()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("transcribe"))
        .stdout(predicate::str::contains("probe"));
}

#[test]
fn test_missing_api_key_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");

    transcriptor()
        .args(["--quiet", "--config"])
        .arg(&config)
        .args(["transcribe", "https://example.com/episode"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("FAL_KEY"));

    // the default configuration is written on first use
    assert!(config.exists());
}

#[test]
fn test_config_show_masks_key() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");

    transcriptor()
        .env("FAL_KEY", "secret-key-value")
        .arg("--config")
        .arg(&config)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("secr****"))
        .stdout(predicate::str::contains("secret-key-value").not());
}

#[test]
fn test_probe_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();

    transcriptor()
        .arg("--config")
        .arg(dir.path().join("config.yaml"))
        .args(["probe"])
        .arg(dir.path().join("missing.mp3"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.mp3"));
}
