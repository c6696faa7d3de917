//! Idempotent declarative ingest and full-text index rebuild.
//!
//! Loads the four curated documents, inserts rows conditionally on their
//! unique identifiers (a conflict is informational, not an error), rebuilds
//! the search index from scratch, and records one `ingest` ledger event with
//! the resulting table totals. Running the same documents twice leaves every
//! count unchanged.

use anyhow::Context;
use rusqlite::{params, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::ledger::{rfc3339_utc_now, Ledger, LedgerError};
use crate::store::{Store, StoreError};
use trustint_spec::canon::canonical_bytes;
use trustint_spec::event;
use trustint_spec::records::{ConfigSet, LawsDoc};

/// Errors raised while loading or ingesting documents.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A document failed to parse.
    #[error("failed to parse {path}: {source}")]
    Document {
        /// Offending document path.
        path: String,
        /// Parse failure.
        source: serde_yaml::Error,
    },
    /// Store failure during ingest.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Ledger append failure after commit.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Filesystem failure while reading documents.
    #[error("ingest io error: {0}")]
    Io(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for IngestError {
    fn from(err: rusqlite::Error) -> Self {
        IngestError::Store(StoreError::Sqlite(err))
    }
}

/// Post-ingest row totals per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCounters {
    /// Rows in `jurisdictions`.
    pub jurisdictions: i64,
    /// Rows in `trusts`.
    pub trusts: i64,
    /// Rows in `roles`.
    pub roles: i64,
    /// Rows in `assets`.
    pub assets: i64,
    /// Rows in `obligations`.
    pub obligations: i64,
}

/// A hit from the full-text index.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Index scope (`trusts`, `roles`, `assets`, `obligations`).
    pub scope: String,
    /// Trust slug the row belongs to.
    pub key: String,
    /// Concatenated human-facing fields.
    pub content: String,
}

fn load_doc<T>(dir: &Path, name: &str) -> Result<Option<T>, IngestError>
where
    T: serde::de::DeserializeOwned,
{
    let path = dir.join(name);
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_yaml::from_str(&text)
        .map(Some)
        .map_err(|source| IngestError::Document {
            path: path.display().to_string(),
            source,
        })
}

/// Load the four declarative documents from `dir`. Missing or empty files
/// mean empty documents.
pub fn load_config(dir: &Path) -> Result<ConfigSet, IngestError> {
    Ok(ConfigSet {
        trusts: load_doc(dir, "trusts.yaml")?.unwrap_or_default(),
        roles: load_doc(dir, "roles.yaml")?.unwrap_or_default(),
        assets: load_doc(dir, "assets.yaml")?.unwrap_or_default(),
        laws: load_doc::<LawsDoc>(dir, "laws.yaml")?.unwrap_or_default(),
    })
}

/// Ingest `config_dir` into the store, rebuild the search index, and record
/// one `ingest` ledger event. Returns the post-ingest table totals.
pub fn ingest(
    store: &mut Store,
    ledger: &Ledger,
    config_dir: &Path,
) -> Result<IngestCounters, IngestError> {
    let set = load_config(config_dir)?;
    let span = tracing::info_span!("ingest", source = %config_dir.display());
    let _guard = span.enter();

    let tx = store.transaction()?;
    insert_documents(&tx, &set)?;
    let counters = IngestCounters {
        jurisdictions: count(&tx, "jurisdictions")?,
        trusts: count(&tx, "trusts")?,
        roles: count(&tx, "roles")?,
        assets: count(&tx, "assets")?,
        obligations: count(&tx, "obligations")?,
    };
    rebuild_search_index(&tx)?;
    tx.commit().map_err(StoreError::from)?;

    ledger.append_kv(&[
        ("type", json!(event::INGEST)),
        ("source", json!("config/")),
        (
            "counters",
            serde_json::to_value(counters).expect("IngestCounters serialization should not fail"),
        ),
    ])?;
    tracing::info!(?counters, "ingest complete");
    Ok(counters)
}

fn insert_documents(tx: &Transaction<'_>, set: &ConfigSet) -> Result<(), IngestError> {
    for j in &set.laws.jurisdictions {
        let n = tx.execute(
            "INSERT OR IGNORE INTO jurisdictions (code, name) VALUES (?1, ?2)",
            params![j.code, j.name],
        )?;
        if n == 0 {
            tracing::info!(code = %j.code, "DB_INGEST_CONFLICT_IGNORED: jurisdiction already exists");
        }
    }

    let now = rfc3339_utc_now();
    for t in &set.trusts {
        let n = tx.execute(
            "INSERT OR IGNORE INTO trusts (slug, name, purpose, jurisdiction_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, (SELECT id FROM jurisdictions WHERE code = ?4), ?5, ?6)",
            params![t.slug, t.name, t.purpose, t.jurisdiction, now, now],
        )?;
        if n == 0 {
            tracing::info!(slug = %t.slug, "DB_INGEST_CONFLICT_IGNORED: trust already exists");
        }
    }

    for r in &set.roles {
        let n = tx.execute(
            "INSERT OR IGNORE INTO roles (trust_id, role_type, party, powers)
             SELECT id, ?1, ?2, ?3 FROM trusts WHERE slug = ?4",
            params![r.role.as_str(), r.party, canonical_bytes(&r.powers), r.trust],
        )?;
        if n == 0 {
            tracing::info!(trust = %r.trust, party = %r.party, "DB_INGEST_CONFLICT_IGNORED: role already exists or trust missing");
        }
    }

    for a in &set.assets {
        let n = tx.execute(
            "INSERT OR IGNORE INTO assets (trust_id, class, descriptor, jurisdiction_id, metadata)
             SELECT id, ?1, ?2, (SELECT id FROM jurisdictions WHERE code = ?3), ?4
             FROM trusts WHERE slug = ?5",
            params![
                a.class.as_str(),
                a.descriptor,
                a.jurisdiction,
                canonical_bytes(&a.metadata),
                a.trust
            ],
        )?;
        if n == 0 {
            tracing::info!(trust = %a.trust, descriptor = %a.descriptor, "DB_INGEST_CONFLICT_IGNORED: asset already exists or trust missing");
        }
    }

    for o in &set.laws.obligations {
        let n = tx.execute(
            "INSERT OR IGNORE INTO obligations (trust_id, name, kind, schedule, authority, details)
             SELECT id, ?1, ?2, ?3, ?4, ?5 FROM trusts WHERE slug = ?6",
            params![
                o.name,
                o.kind.as_str(),
                o.schedule,
                o.authority,
                canonical_bytes(&o.details),
                o.trust
            ],
        )?;
        if n == 0 {
            tracing::info!(trust = %o.trust, name = %o.name, "DB_INGEST_CONFLICT_IGNORED: obligation already exists or trust missing");
        }
    }
    Ok(())
}

/// Drop and re-emit every search row from the current table contents.
fn rebuild_search_index(tx: &Transaction<'_>) -> Result<(), IngestError> {
    tx.execute("DELETE FROM search_idx", [])?;

    let mut insert = tx.prepare(
        "INSERT INTO search_idx (scope, key, content) VALUES (?1, ?2, ?3)",
    )?;

    let mut trusts = tx.prepare("SELECT slug, name, purpose FROM trusts")?;
    let mut rows = trusts.query([])?;
    while let Some(row) = rows.next()? {
        let slug: String = row.get("slug")?;
        let name: String = row.get("name")?;
        let purpose: String = row.get("purpose")?;
        insert.execute(params!["trusts", slug, format!("{name} {purpose}")])?;
    }

    let mut roles = tx.prepare(
        "SELECT t.slug AS slug, r.role_type AS role_type, r.party AS party
         FROM roles r JOIN trusts t ON r.trust_id = t.id",
    )?;
    let mut rows = roles.query([])?;
    while let Some(row) = rows.next()? {
        let slug: String = row.get("slug")?;
        let role_type: String = row.get("role_type")?;
        let party: String = row.get("party")?;
        insert.execute(params!["roles", slug, format!("{role_type} {party}")])?;
    }

    let mut assets = tx.prepare(
        "SELECT t.slug AS slug, a.class AS class, a.descriptor AS descriptor
         FROM assets a JOIN trusts t ON a.trust_id = t.id",
    )?;
    let mut rows = assets.query([])?;
    while let Some(row) = rows.next()? {
        let slug: String = row.get("slug")?;
        let class: String = row.get("class")?;
        let descriptor: String = row.get("descriptor")?;
        insert.execute(params!["assets", slug, format!("{class} {descriptor}")])?;
    }

    let mut obligations = tx.prepare(
        "SELECT t.slug AS slug, o.name AS name, o.kind AS kind, o.authority AS authority
         FROM obligations o JOIN trusts t ON o.trust_id = t.id",
    )?;
    let mut rows = obligations.query([])?;
    while let Some(row) = rows.next()? {
        let slug: String = row.get("slug")?;
        let name: String = row.get("name")?;
        let kind: String = row.get("kind")?;
        let authority: String = row.get("authority")?;
        insert.execute(params![
            "obligations",
            slug,
            format!("{name} {kind} {authority}")
        ])?;
    }

    Ok(())
}

fn count(tx: &Transaction<'_>, table: &str) -> Result<i64, IngestError> {
    let n = tx.query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(n)
}

/// Query the full-text index. `scope` restricts to one entity kind.
pub fn search(
    store: &Store,
    query: &str,
    scope: Option<&str>,
) -> Result<Vec<SearchHit>, StoreError> {
    let conn = store.connection();
    let mut hits = Vec::new();
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<SearchHit> {
        Ok(SearchHit {
            scope: row.get("scope")?,
            key: row.get("key")?,
            content: row.get("content")?,
        })
    };
    match scope {
        Some(scope) if scope != "all" => {
            let mut stmt = conn.prepare(
                "SELECT scope, key, content FROM search_idx WHERE content MATCH ?1 AND scope = ?2",
            )?;
            let mut rows = stmt.query(params![query, scope])?;
            while let Some(row) = rows.next()? {
                hits.push(map_row(row)?);
            }
        }
        _ => {
            let mut stmt = conn
                .prepare("SELECT scope, key, content FROM search_idx WHERE content MATCH ?1")?;
            let mut rows = stmt.query(params![query])?;
            while let Some(row) = rows.next()? {
                hits.push(map_row(row)?);
            }
        }
    }
    Ok(hits)
}
