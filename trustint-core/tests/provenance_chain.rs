mod support;

use serde_json::{json, Value};
use std::fs;
use trustint_core::{verify_chain, ChainFault, KeyLoader, Ledger};

#[test]
fn first_append_on_absent_ledger_then_verify() {
    let vault = support::test_vault();
    let ledger = support::ledger_for(&vault.layout);
    assert!(!vault.layout.ledger_path().exists());

    let event = ledger.append_kv(&[("type", json!("ingest"))]).unwrap();
    assert_eq!(event["prev"], json!(""));
    assert_eq!(event["mac"].as_str().unwrap().len(), 64);

    let text = fs::read_to_string(vault.layout.ledger_path()).unwrap();
    assert_eq!(text.lines().count(), 1);

    let key = KeyLoader::file_only(vault.layout.key_path())
        .load()
        .unwrap()
        .bytes;
    assert_eq!(verify_chain(&vault.layout.ledger_path(), &key).unwrap(), 1);
}

#[test]
fn tampering_with_the_middle_event_breaks_the_chain_at_that_line() {
    let vault = support::test_vault();
    let ledger = support::ledger_for(&vault.layout);
    for n in 0..3 {
        ledger
            .append_kv(&[("type", json!("probe")), ("n", json!(n))])
            .unwrap();
    }

    let path = vault.layout.ledger_path();
    let text = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = text.lines().map(String::from).collect();
    let mut event: Value = serde_json::from_str(&lines[1]).unwrap();
    event["ts"] = json!("1999-12-31T23:59:59Z");
    lines[1] = serde_json::to_string(&event).unwrap();
    fs::write(&path, lines.join("\n") + "\n").unwrap();

    let key = KeyLoader::file_only(vault.layout.key_path())
        .load()
        .unwrap()
        .bytes;
    let err = verify_chain(&path, &key).unwrap_err();
    let integrity = match err {
        trustint_core::verify::VerifyError::Integrity(e) => e,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(integrity.line, 2);
    assert_eq!(integrity.fault, ChainFault::MacMismatch);
}

#[test]
fn chain_survives_key_file_re_encoding() {
    // Append under a raw binary key file, then rewrite the same key as
    // base64url text: the chain must still verify.
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;

    let vault = support::test_vault();
    let mut key_bytes = vec![0xffu8; 32];
    key_bytes[0] = 0xfe; // not valid UTF-8, so the file reads as raw bytes
    fs::write(vault.layout.key_path(), &key_bytes).unwrap();

    let ledger = support::ledger_for(&vault.layout);
    ledger.append_kv(&[("event", json!("one"))]).unwrap();
    ledger.append_kv(&[("event", json!("two"))]).unwrap();

    fs::write(vault.layout.key_path(), URL_SAFE_NO_PAD.encode(&key_bytes)).unwrap();
    let reloaded = KeyLoader::file_only(vault.layout.key_path())
        .load()
        .unwrap();
    assert!(reloaded.status.contains("base64url"));
    assert_eq!(reloaded.bytes, key_bytes);
    assert_eq!(
        verify_chain(&vault.layout.ledger_path(), &reloaded.bytes).unwrap(),
        2
    );
}

#[test]
fn appends_interleave_with_verification() {
    let vault = support::test_vault();
    let ledger = support::ledger_for(&vault.layout);
    let key = KeyLoader::file_only(vault.layout.key_path())
        .load()
        .unwrap()
        .bytes;

    for n in 0..5usize {
        ledger.append_kv(&[("n", json!(n))]).unwrap();
        assert_eq!(
            verify_chain(&vault.layout.ledger_path(), &key).unwrap(),
            n + 1
        );
    }

    let events = support::ledger_events(&vault.layout);
    for pair in events.windows(2) {
        assert_eq!(pair[1]["prev"], pair[0]["mac"]);
    }
}
