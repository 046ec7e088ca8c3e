//! Integration tests for `statecrypt resolve`.
//!
//! Covers source precedence (root < override files < environment), both
//! document syntaxes, and how diagnostics reach the user.

mod common;

use common::{TestEnv, parse_json};
use predicates::prelude::*;
use serde_json::json;

// ============================================================================
// Precedence
// ============================================================================

#[test]
fn test_override_file_escalates_required() {
    let env = TestEnv::new();
    env.write("root.kdl", "statefile { required #false }\n");
    env.write("override.kdl", "statefile { required #true }\n");

    let output = env
        .statecrypt()
        .args(["--root", "root.kdl", "-e", "override.kdl", "resolve"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = parse_json(&output.stdout);
    assert_eq!(json["config"]["configs"]["statefile"]["required"], true);
    assert_eq!(json["sources"][0], json!({"kind": "root"}));
    assert_eq!(json["sources"][1]["kind"], "file");
}

#[test]
fn test_last_override_file_wins() {
    let env = TestEnv::new();
    env.write(
        "one.kdl",
        r#"backend { key_provider "x" { region "us-east-1" } }"#,
    );
    env.write(
        "two.kdl",
        r#"backend { key_provider "x" { region "eu-west-1" } }"#,
    );

    let output = env
        .statecrypt()
        .args(["-e", "one.kdl", "-e", "two.kdl", "resolve"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = parse_json(&output.stdout);
    assert_eq!(
        json["config"]["configs"]["backend"]["key_provider"]["body"]["region"],
        "eu-west-1"
    );
}

#[test]
fn test_every_override_file_is_applied() {
    let env = TestEnv::new();
    env.write("a.kdl", "statefile { required #true }\n");
    env.write("b.kdl", "planfile { }\n");

    let output = env
        .statecrypt()
        .args(["-e", "a.kdl", "-e", "b.kdl", "resolve"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = parse_json(&output.stdout);
    assert_eq!(json["sources"].as_array().unwrap().len(), 2);
    assert_eq!(json["config"]["configs"]["statefile"]["required"], true);
    assert!(json["config"]["configs"]["planfile"].is_object());
}

#[test]
fn test_override_file_after_subcommand_is_rejected() {
    let env = TestEnv::new();
    env.write("a.kdl", "statefile { }\n");
    env.write("b.kdl", "planfile { }\n");

    env.statecrypt()
        .args(["-e", "a.kdl", "resolve", "-e", "b.kdl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_environment_json_beats_files() {
    let env = TestEnv::new();
    env.write(
        "override.kdl",
        r#"planfile { method "aes_gcm" { nonce_size 12 } }"#,
    );

    let output = env
        .statecrypt()
        .args(["-e", "override.kdl", "resolve"])
        .env(
            "STATECRYPT_ENCRYPTION",
            r#"{"planfile": {"method": {"aes_gcm": {"nonce_size": 16}}}}"#,
        )
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = parse_json(&output.stdout);
    assert_eq!(
        json["config"]["configs"]["planfile"]["method"]["body"]["nonce_size"],
        16
    );
    assert_eq!(
        json["sources"][1],
        json!({"kind": "env", "name": "STATECRYPT_ENCRYPTION"})
    );
}

#[test]
fn test_blank_environment_is_ignored() {
    let env = TestEnv::new();
    let output = env
        .statecrypt()
        .arg("resolve")
        .env("STATECRYPT_ENCRYPTION", "   ")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(parse_json(&output.stdout)["configured"], false);
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_duplicate_method_is_a_diagnostic_not_a_crash() {
    let env = TestEnv::new();
    env.write(
        "dup.kdl",
        "statefile {\n    method \"a\" { }\n    method \"b\" { }\n}\n",
    );

    env.statecrypt()
        .args(["-e", "dup.kdl", "resolve"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Duplicate method block"))
        .stderr(predicate::str::contains("dup.kdl:3"));
}

#[test]
fn test_duplicate_purpose_warns_and_keeps_first() {
    let env = TestEnv::new();
    env.write(
        "dup.kdl",
        "statefile { required #true }\nstatefile { required #false }\n",
    );

    let output = env
        .statecrypt()
        .args(["-e", "dup.kdl", "resolve"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = parse_json(&output.stdout);
    assert_eq!(json["config"]["configs"]["statefile"]["required"], true);
    assert_eq!(json["warnings"][0]["severity"], "warning");
}

#[test]
fn test_missing_override_file_fails() {
    let env = TestEnv::new();
    env.statecrypt()
        .args(["-e", "nope.kdl", "resolve", "-H"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Failed to read encryption configuration file",
        ));
}

#[test]
fn test_malformed_environment_fails() {
    let env = TestEnv::new();
    env.statecrypt()
        .arg("resolve")
        .env("STATECRYPT_ENCRYPTION", r#"{"statefile": "#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("<env:STATECRYPT_ENCRYPTION>"));
}

// ============================================================================
// Human output
// ============================================================================

#[test]
fn test_human_output_summarizes_purposes() {
    let env = TestEnv::new();
    env.write(
        "override.kdl",
        r#"
        statefile {
            required #true
            key_provider "pbkdf2" { passphrase "correct horse battery staple" }
            method "aes_gcm" { }
        }
        remote_state "network" { }
        "#,
    );

    env.statecrypt()
        .args(["-H", "-e", "override.kdl", "resolve"])
        .assert()
        .success()
        .stdout(predicate::str::contains("statefile: required, pbkdf2/aes_gcm"))
        .stdout(predicate::str::contains("remote_state:network: optional, -/-"));
}

#[test]
fn test_human_output_without_configuration() {
    TestEnv::new()
        .statecrypt()
        .args(["-H", "resolve"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pass through"));
}
