//! Integration tests for `statecrypt flow`.
//!
//! Covers pass-through, missing fixed purposes, fallback ordering and
//! remote state data source defaults.

mod common;

use common::{TestEnv, parse_json};
use predicates::prelude::*;

const ROTATING: &str = r#"
statefile {
    required #true
    key_provider "aws_kms" { kms_key_id "alias/new" }
    method "aes_gcm" { }
    fallback {
        key_provider "aws_kms" { kms_key_id "alias/old" }
        method "aes_gcm" { }
    }
}
planfile {
    key_provider "pbkdf2" { passphrase "p" }
    method "aes_gcm" { }
}
"#;

#[test]
fn test_flow_pass_through_without_configuration() {
    let env = TestEnv::new();
    let output = env
        .statecrypt()
        .args(["flow", "statefile"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = parse_json(&output.stdout);
    assert_eq!(json["purpose"], "statefile");
    assert!(json["encrypt"].is_null());
    assert_eq!(json["decrypt"], serde_json::json!([]));
    assert_eq!(json["allow_plaintext"], true);
}

#[test]
fn test_flow_orders_decrypt_attempts() {
    let env = TestEnv::new();
    env.write("enc.kdl", ROTATING);

    let output = env
        .statecrypt()
        .args(["-e", "enc.kdl", "flow", "statefile"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = parse_json(&output.stdout);
    assert_eq!(
        json["encrypt"]["key_provider"]["body"]["kms_key_id"],
        "alias/new"
    );
    assert_eq!(
        json["decrypt"][1]["key_provider"]["body"]["kms_key_id"],
        "alias/old"
    );
    assert_eq!(json["allow_plaintext"], false);
}

#[test]
fn test_flow_human_output() {
    let env = TestEnv::new();
    env.write("enc.kdl", ROTATING);

    env.statecrypt()
        .args(["-H", "-e", "enc.kdl", "flow", "planfile"])
        .assert()
        .success()
        .stdout(predicate::str::contains("encrypt: pbkdf2/aes_gcm"))
        .stdout(predicate::str::contains("1. pbkdf2/aes_gcm"))
        .stdout(predicate::str::contains("2. plaintext"));
}

#[test]
fn test_flow_missing_fixed_purpose_is_an_error() {
    let env = TestEnv::new();
    env.write("enc.kdl", ROTATING);

    env.statecrypt()
        .args(["-e", "enc.kdl", "flow", "backend"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("missing encryption configuration"))
        .stderr(predicate::str::contains("backend"));
}

#[test]
fn test_flow_undeclared_datasource_passes_through() {
    let env = TestEnv::new();
    env.write("enc.kdl", ROTATING);

    env.statecrypt()
        .args(["-H", "-e", "enc.kdl", "flow", "remote_state:network"])
        .assert()
        .success()
        .stdout(predicate::str::contains("remote_state:network: pass-through"));
}

#[test]
fn test_flow_datasource_default_merge() {
    let env = TestEnv::new();
    env.write("enc.kdl", r#"remote_state "network" { required #false; method "aes_gcm" { } }"#);
    env.write(
        "default.kdl",
        r#"backend { required #true; key_provider "pbkdf2" { passphrase "p" } }"#,
    );

    let output = env
        .statecrypt()
        .args([
            "-e",
            "enc.kdl",
            "flow",
            "remote_state:network",
            "--default",
            "default.kdl",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = parse_json(&output.stdout);
    assert_eq!(json["allow_plaintext"], false);
    assert_eq!(json["encrypt"]["key_provider"]["name"], "pbkdf2");
    assert_eq!(json["encrypt"]["method"]["name"], "aes_gcm");
}

#[test]
fn test_flow_incomplete_level_is_an_error() {
    let env = TestEnv::new();
    env.write("enc.kdl", r#"statefile { method "aes_gcm" { } }"#);

    env.statecrypt()
        .args(["-e", "enc.kdl", "flow", "statefile"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("key_provider block is missing"));
}

#[test]
fn test_flow_invalid_purpose() {
    TestEnv::new()
        .statecrypt()
        .args(["flow", "lockfile"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid purpose: lockfile"));
}
