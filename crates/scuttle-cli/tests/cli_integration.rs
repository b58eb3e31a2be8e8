//! CLI Integration Tests
//!
//! These tests run the `scuttle` binary end-to-end and check the wiring
//! between the CLI and the core library.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

fn cli_cmd() -> Command {
    Command::cargo_bin("scuttle").expect("Failed to find scuttle binary")
}

/// Extract a value from `Label: value` output lines
fn extract_field(output: &str, label: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix(label)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(|value| value.trim().to_string())
    })
}

fn keygen() -> (String, String) {
    let output = cli_cmd().arg("keygen").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    (
        extract_field(&stdout, "Identity").expect("identity in output"),
        extract_field(&stdout, "Secret").expect("secret in output"),
    )
}

fn sign(secret: &str, extra: &[&str]) -> String {
    let output = cli_cmd()
        .arg("sign")
        .arg("--secret")
        .arg(secret)
        .args(extra)
        .arg(r#"{"type":"post","text":"hello"}"#)
        .output()
        .unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap()
}

// ============================================================================
// Keygen / Sign / Verify
// ============================================================================

#[test]
fn test_keygen_prints_identity_and_secret() {
    let (identity, secret) = keygen();
    assert!(identity.starts_with('@'));
    assert!(identity.ends_with(".ed25519"));
    assert_eq!(secret.len(), 64);
}

#[test]
fn test_signed_message_verifies() {
    let (identity, secret) = keygen();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("msg.json");
    fs::write(&path, sign(&secret, &[])).unwrap();

    cli_cmd()
        .arg("verify")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Valid message"))
        .stdout(predicate::str::contains(identity))
        .stdout(predicate::str::contains("Sequence: 1"))
        .stdout(predicate::str::contains("Type:     post"));
}

#[test]
fn test_verify_reads_stdin() {
    let (_, secret) = keygen();

    cli_cmd()
        .arg("verify")
        .arg("-")
        .write_stdin(sign(&secret, &[]))
        .assert()
        .success()
        .stdout(predicate::str::contains("Valid message"));
}

#[test]
fn test_tampered_message_fails() {
    let (_, secret) = keygen();
    let tampered = sign(&secret, &[]).replace("hello", "HELLO");

    cli_cmd()
        .arg("verify")
        .arg("-")
        .write_stdin(tampered)
        .assert()
        .failure()
        .stderr(predicate::str::contains("message is not valid"));
}

#[test]
fn test_hmac_must_match() {
    let (_, secret) = keygen();
    let key = "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=";
    let signed = sign(&secret, &["--hmac", key]);

    cli_cmd()
        .arg("verify")
        .arg("-")
        .write_stdin(signed.clone())
        .assert()
        .failure();

    cli_cmd()
        .arg("verify")
        .arg("-")
        .arg("--hmac")
        .arg(key)
        .write_stdin(signed)
        .assert()
        .success();
}

#[test]
fn test_verify_missing_file_fails() {
    let dir = TempDir::new().unwrap();

    cli_cmd()
        .arg("verify")
        .arg(dir.path().join("missing.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn test_sign_rejects_bad_secret() {
    cli_cmd()
        .arg("sign")
        .arg("--secret")
        .arg("not-hex")
        .arg("{}")
        .assert()
        .failure()
        .stderr(predicate::str::contains("secret is not hex"));
}

// ============================================================================
// Demo Command Tests
// ============================================================================

#[test]
fn test_demo_replicates_with_ebt() {
    cli_cmd()
        .arg("demo")
        .arg("--messages")
        .arg("10")
        .assert()
        .success()
        .stdout(predicate::str::contains("Protocol: Ebt"))
        .stdout(predicate::str::contains("Replicated 10 messages"));
}

#[test]
fn test_demo_falls_back_to_gossip() {
    cli_cmd()
        .arg("demo")
        .arg("--messages")
        .arg("5")
        .arg("--no-ebt")
        .assert()
        .success()
        .stdout(predicate::str::contains("Protocol: Gossip"))
        .stdout(predicate::str::contains("Replicated 5 messages"));
}

#[test]
fn test_demo_reads_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{"ebt_enabled": false, "gossip_pass_interval": "100ms", "message_buffer_flush_interval": "10ms"}"#,
    )
    .unwrap();

    cli_cmd()
        .arg("demo")
        .arg("--messages")
        .arg("3")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Protocol: Gossip"));
}

#[test]
fn test_demo_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, r#"{"gossip_fan_out": 0}"#).unwrap();

    cli_cmd()
        .arg("demo")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));
}
