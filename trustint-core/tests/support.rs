use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use trustint_core::migrate;
use trustint_core::{KeyLoader, Ledger, Store, VaultLayout};

/// 32 zero bytes, base64url, no padding.
pub const TEST_KEY_B64: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

pub struct TestVault {
    // Held for its Drop; the vault lives inside it.
    pub dir: tempfile::TempDir,
    pub layout: VaultLayout,
}

pub fn test_vault() -> TestVault {
    let dir = tempfile::tempdir().expect("create temp dir");
    let layout = VaultLayout::new(dir.path().join("vault"));
    fs::create_dir_all(layout.root()).expect("create vault root");
    fs::write(layout.key_path(), TEST_KEY_B64).expect("write test key");
    TestVault { dir, layout }
}

pub fn ledger_for(layout: &VaultLayout) -> Ledger {
    Ledger::with_paths(layout.ledger_path(), KeyLoader::file_only(layout.key_path()))
}

pub fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

pub fn migrations_dir() -> PathBuf {
    repo_root().join("migrations")
}

pub fn config_dir() -> PathBuf {
    repo_root().join("config")
}

/// Store opened at the vault's db path with all repo migrations applied.
pub fn migrated_store(vault: &TestVault, ledger: &Ledger) -> Store {
    let mut store = Store::open(&vault.layout.db_path()).expect("open store");
    migrate::run_migrations(&mut store, ledger, &migrations_dir(), None)
        .expect("apply repo migrations");
    store
}

/// Parse every non-blank ledger line.
pub fn ledger_events(layout: &VaultLayout) -> Vec<Value> {
    let text = fs::read_to_string(layout.ledger_path()).unwrap_or_default();
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("ledger line parses"))
        .collect()
}
