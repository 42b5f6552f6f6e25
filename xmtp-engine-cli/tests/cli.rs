//! Runs the `xmtp-engine` binary for the configuration commands

use std::process::Command;

fn engine_cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_xmtp-engine"))
}

#[test]
fn test_config_show_prints_defaults() {
    let output = engine_cli().args(["config", "show"]).output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("[cron]"));
    assert!(stdout.contains("tick_interval = \"300ms\""));
    assert!(stdout.contains("consent_stream_enabled = false"));
}

#[test]
fn test_config_show_applies_env_override() {
    let output = engine_cli()
        .args(["config", "show"])
        .env("XMTP_ENGINE_CRON_MIN_INTERVAL", "2s")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("min_interval = \"2s\""));
}

#[test]
fn test_config_check_accepts_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "[streaming]\nconsent_stream_enabled = true\n").unwrap();

    let output = engine_cli()
        .args(["config", "check"])
        .arg(&path)
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout).unwrap().contains("is valid"));
}

#[test]
fn test_config_check_rejects_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "[cron]\ntick_interval = \"5s\"\nmin_interval = \"1s\"\n").unwrap();

    let output = engine_cli()
        .args(["config", "check"])
        .arg(&path)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("not a valid engine configuration"));
}
