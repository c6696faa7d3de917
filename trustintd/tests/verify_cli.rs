use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use std::path::Path;

use trustint_core::{KeyLoader, Ledger, VaultLayout};

const TEST_KEY_B64: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

fn trustintd(vault: &Path) -> Command {
    let mut cmd = Command::cargo_bin("trustintd").unwrap();
    cmd.env_remove("TRUSTINT_HMAC_KEY")
        .env_remove("TRUSTINT_HMAC_KEY_FILE")
        .env_remove("TRUSTINT_LOG_LEVEL")
        .arg("--vault")
        .arg(vault);
    cmd
}

fn seeded_vault(dir: &Path, events: usize) -> VaultLayout {
    let layout = VaultLayout::new(dir.join("vault"));
    fs::create_dir_all(layout.root()).unwrap();
    fs::write(layout.key_path(), TEST_KEY_B64).unwrap();
    let ledger = Ledger::with_paths(layout.ledger_path(), KeyLoader::file_only(layout.key_path()));
    for n in 0..events {
        ledger
            .append_kv(&[("type", json!("probe")), ("n", json!(n))])
            .unwrap();
    }
    layout
}

#[test]
fn verify_exits_two_when_ledger_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let layout = VaultLayout::new(dir.path().join("vault"));
    fs::create_dir_all(layout.root()).unwrap();

    trustintd(layout.root())
        .arg("verify")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ledger not found"));
}

#[test]
fn verify_passes_on_an_intact_chain() {
    let dir = tempfile::tempdir().unwrap();
    let layout = seeded_vault(dir.path(), 3);

    trustintd(layout.root())
        .arg("verify")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("PASS: verified 3 events"))
        .stdout(predicate::str::contains("base64url"));
}

#[test]
fn verify_exits_one_with_line_number_on_tamper() {
    let dir = tempfile::tempdir().unwrap();
    let layout = seeded_vault(dir.path(), 3);

    let path = layout.ledger_path();
    let text = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = text.lines().map(String::from).collect();
    let mut event: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
    event["n"] = json!(99);
    lines[1] = serde_json::to_string(&event).unwrap();
    fs::write(&path, lines.join("\n") + "\n").unwrap();

    trustintd(layout.root())
        .arg("verify")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("FAIL line 2"))
        .stderr(predicate::str::contains("MAC_MISMATCH"));
}

#[test]
fn verify_exits_two_on_unloadable_key() {
    let dir = tempfile::tempdir().unwrap();
    let layout = seeded_vault(dir.path(), 1);
    fs::write(layout.key_path(), "not a key at all!").unwrap();

    trustintd(layout.root())
        .arg("verify")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ERR"));
}

#[test]
fn explicit_ledger_path_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    let layout = seeded_vault(dir.path(), 2);
    let copy = dir.path().join("copy.jsonl");
    fs::copy(layout.ledger_path(), &copy).unwrap();

    trustintd(layout.root())
        .arg("verify")
        .arg("--ledger")
        .arg(&copy)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("verified 2 events"));
}
