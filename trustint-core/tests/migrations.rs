mod support;

use std::fs;
use trustint_core::migrate::{current_version, run_migrations};
use trustint_core::Store;

fn scratch_migrations(dir: &std::path::Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("V001__jurisdictions.sql"),
        "CREATE TABLE jurisdictions (id INTEGER PRIMARY KEY, code TEXT NOT NULL UNIQUE);",
    )
    .unwrap();
    fs::write(
        dir.join("V003__assets.sql"),
        "CREATE TABLE assets (id INTEGER PRIMARY KEY, descriptor TEXT NOT NULL);",
    )
    .unwrap();
    fs::write(
        dir.join("V002__trusts.sql"),
        "CREATE TABLE trusts (id INTEGER PRIMARY KEY, slug TEXT NOT NULL UNIQUE);",
    )
    .unwrap();
    fs::write(dir.join("notes.txt"), "not a migration").unwrap();
}

#[test]
fn catch_up_applies_in_order_and_ignores_strays() {
    let vault = support::test_vault();
    let ledger = support::ledger_for(&vault.layout);
    let mut store = Store::open(&vault.layout.db_path()).unwrap();

    let dir = vault.dir.path().join("migrations");
    scratch_migrations(&dir);

    let outcome = run_migrations(&mut store, &ledger, &dir, None).unwrap();
    assert_eq!(outcome.from_version, 0);
    assert_eq!(outcome.to_version, 3);
    assert_eq!(
        outcome.applied,
        vec![
            "V001__jurisdictions.sql",
            "V002__trusts.sql",
            "V003__assets.sql"
        ]
    );
    assert_eq!(current_version(&mut store).unwrap(), 3);

    let applied_versions: Vec<i64> = support::ledger_events(&vault.layout)
        .iter()
        .filter(|e| e["type"] == "MIGRATION_APPLY")
        .map(|e| e["version"].as_i64().unwrap())
        .collect();
    assert_eq!(applied_versions, vec![1, 2, 3]);

    // Every apply event names its script and carries the content hash.
    for event in support::ledger_events(&vault.layout) {
        if event["type"] == "MIGRATION_APPLY" {
            assert!(event["script"].as_str().unwrap().ends_with(".sql"));
            assert_eq!(event["sha256"].as_str().unwrap().len(), 64);
        }
    }
}

#[test]
fn rerun_is_a_no_op() {
    let vault = support::test_vault();
    let ledger = support::ledger_for(&vault.layout);
    let mut store = Store::open(&vault.layout.db_path()).unwrap();
    let dir = vault.dir.path().join("migrations");
    scratch_migrations(&dir);

    run_migrations(&mut store, &ledger, &dir, None).unwrap();
    let events_before = support::ledger_events(&vault.layout).len();

    let outcome = run_migrations(&mut store, &ledger, &dir, None).unwrap();
    assert!(outcome.applied.is_empty());
    assert_eq!(outcome.from_version, 3);
    assert_eq!(support::ledger_events(&vault.layout).len(), events_before);
}

#[test]
fn target_clamps_the_run() {
    let vault = support::test_vault();
    let ledger = support::ledger_for(&vault.layout);
    let mut store = Store::open(&vault.layout.db_path()).unwrap();
    let dir = vault.dir.path().join("migrations");
    scratch_migrations(&dir);

    let outcome = run_migrations(&mut store, &ledger, &dir, Some(2)).unwrap();
    assert_eq!(outcome.to_version, 2);
    assert_eq!(outcome.applied.len(), 2);

    // Past-target requests are a no-op, not a rollback.
    let outcome = run_migrations(&mut store, &ledger, &dir, Some(1)).unwrap();
    assert!(outcome.applied.is_empty());
    assert_eq!(current_version(&mut store).unwrap(), 2);

    let outcome = run_migrations(&mut store, &ledger, &dir, None).unwrap();
    assert_eq!(outcome.to_version, 3);
}

#[test]
fn legacy_version_table_collapses_to_singleton() {
    let vault = support::test_vault();
    let ledger = support::ledger_for(&vault.layout);
    let mut store = Store::open(&vault.layout.db_path()).unwrap();
    store
        .connection()
        .execute_batch(
            "CREATE TABLE schema_version (version INTEGER NOT NULL);
             INSERT INTO schema_version (version) VALUES (1), (2);",
        )
        .unwrap();

    assert_eq!(current_version(&mut store).unwrap(), 2);
    let (id, version): (i64, i64) = store
        .connection()
        .query_row("SELECT id, version FROM schema_version", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!((id, version), (1, 2));

    // Only the still-pending step applies after the collapse.
    let dir = vault.dir.path().join("migrations");
    scratch_migrations(&dir);
    let outcome = run_migrations(&mut store, &ledger, &dir, None).unwrap();
    assert_eq!(outcome.applied, vec!["V003__assets.sql"]);
}

#[test]
fn repo_migration_set_reaches_version_three() {
    let vault = support::test_vault();
    let ledger = support::ledger_for(&vault.layout);
    let store = support::migrated_store(&vault, &ledger);
    drop(store);

    let mut store = Store::open(&vault.layout.db_path()).unwrap();
    assert_eq!(current_version(&mut store).unwrap(), 3);

    // The shipped schema carries the tables the daemon relies on.
    for table in [
        "jurisdictions",
        "trusts",
        "roles",
        "assets",
        "obligations",
        "inbox_log",
        "quarantine_tickets",
        "search_idx",
    ] {
        let present: i64 = store
            .connection()
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE name = ?1",
                [table],
                |row| row.get(0),
            )
            .unwrap();
        assert!(present >= 1, "missing table {table}");
    }
}
