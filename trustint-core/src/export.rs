//! Export artifacts and checksum manifests.
//!
//! Three formats are produced from the store: a JSONL dump of trusts, a flat
//! CSV across trusts/roles/assets, and a Markdown board report. Each artifact
//! records an `export` ledger event; `write_checksums` seals the batch with a
//! `SHA256SUMS` manifest and a `checksums` event. `export_all` finishes with
//! a WAL checkpoint.

use anyhow::Context;
use rusqlite::params;
use serde_json::json;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::digest::sha256_file;
use crate::ledger::{Ledger, LedgerError};
use crate::store::{Store, StoreError};
use trustint_spec::event;

/// Errors raised while exporting.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Store failure while reading rows.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Ledger append failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Filesystem failure while writing artifacts.
    #[error("export io error: {0}")]
    Io(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for ExportError {
    fn from(err: rusqlite::Error) -> Self {
        ExportError::Store(StoreError::Sqlite(err))
    }
}

/// Run all exports into `dist`, write the checksum manifest, and checkpoint
/// the store. Returns the artifact paths (manifest last).
pub fn export_all(
    store: &Store,
    ledger: &Ledger,
    dist: &Path,
) -> Result<Vec<PathBuf>, ExportError> {
    let mut paths = vec![
        export_jsonl(store, ledger, dist)?,
        export_csv(store, ledger, dist)?,
        export_markdown(store, ledger, dist)?,
    ];
    let sums = write_checksums(ledger, dist, &paths)?;
    paths.push(sums);
    store.checkpoint()?;
    Ok(paths)
}

/// One trust per line with its jurisdiction code.
pub fn export_jsonl(store: &Store, ledger: &Ledger, dist: &Path) -> Result<PathBuf, ExportError> {
    let out = prepare_out(dist, "trustint_export.jsonl")?;
    let mut file = create(&out)?;

    let conn = store.connection();
    let mut stmt = conn.prepare(
        "SELECT t.slug AS slug, t.name AS name, t.purpose AS purpose, j.code AS jurisdiction
         FROM trusts t LEFT JOIN jurisdictions j ON t.jurisdiction_id = j.id
         ORDER BY t.slug",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let record = json!({
            "slug": row.get::<_, String>("slug")?,
            "name": row.get::<_, String>("name")?,
            "purpose": row.get::<_, String>("purpose")?,
            "jurisdiction": row.get::<_, Option<String>>("jurisdiction")?,
        });
        writeln!(file, "{record}")
            .with_context(|| format!("failed to write {}", out.display()))?;
    }
    drop(rows);

    ledger.append_kv(&[
        ("type", json!(event::EXPORT)),
        ("format", json!("jsonl")),
        ("path", json!(out.display().to_string())),
    ])?;
    Ok(out)
}

/// Flat CSV across trusts, roles, and assets.
pub fn export_csv(store: &Store, ledger: &Ledger, dist: &Path) -> Result<PathBuf, ExportError> {
    let out = prepare_out(dist, "trustint_export.csv")?;
    let mut file = create(&out)?;
    let conn = store.connection();

    let mut write_row = |fields: [&str; 5]| -> Result<(), ExportError> {
        let line = fields.map(csv_field).join(",");
        writeln!(file, "{line}").with_context(|| format!("failed to write {}", out.display()))?;
        Ok(())
    };
    write_row(["trust", "entity", "field1", "field2", "field3"])?;

    let mut trusts = conn.prepare("SELECT slug, name, purpose FROM trusts ORDER BY slug")?;
    let mut rows = trusts.query([])?;
    while let Some(row) = rows.next()? {
        let slug: String = row.get("slug")?;
        let name: String = row.get("name")?;
        let purpose: String = row.get("purpose")?;
        write_row([&slug, "trust", &name, &purpose, ""])?;
    }

    let mut roles = conn.prepare(
        "SELECT t.slug AS slug, r.role_type AS role_type, r.party AS party
         FROM roles r JOIN trusts t ON r.trust_id = t.id ORDER BY t.slug, r.role_type",
    )?;
    let mut rows = roles.query([])?;
    while let Some(row) = rows.next()? {
        let slug: String = row.get("slug")?;
        let role_type: String = row.get("role_type")?;
        let party: String = row.get("party")?;
        write_row([&slug, "role", &role_type, &party, ""])?;
    }

    let mut assets = conn.prepare(
        "SELECT t.slug AS slug, a.class AS class, a.descriptor AS descriptor
         FROM assets a JOIN trusts t ON a.trust_id = t.id ORDER BY t.slug, a.class",
    )?;
    let mut rows = assets.query([])?;
    while let Some(row) = rows.next()? {
        let slug: String = row.get("slug")?;
        let class: String = row.get("class")?;
        let descriptor: String = row.get("descriptor")?;
        write_row([&slug, "asset", &class, &descriptor, ""])?;
    }

    ledger.append_kv(&[
        ("type", json!(event::EXPORT)),
        ("format", json!("csv")),
        ("path", json!(out.display().to_string())),
    ])?;
    Ok(out)
}

/// Markdown board report grouped by trust.
pub fn export_markdown(store: &Store, ledger: &Ledger, dist: &Path) -> Result<PathBuf, ExportError> {
    let out = prepare_out(dist, "board_report.md")?;
    let mut file = create(&out)?;
    let conn = store.connection();

    let write_err = || format!("failed to write {}", out.display());
    writeln!(file, "# TRUSTINT Board Report\n").with_context(write_err)?;

    let mut trusts = conn.prepare(
        "SELECT t.id AS id, t.slug AS slug, t.name AS name, t.purpose AS purpose,
                j.code AS jurisdiction
         FROM trusts t LEFT JOIN jurisdictions j ON j.id = t.jurisdiction_id
         ORDER BY t.slug",
    )?;
    let mut rows = trusts.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get("id")?;
        let slug: String = row.get("slug")?;
        let name: String = row.get("name")?;
        let purpose: String = row.get("purpose")?;
        let jurisdiction: Option<String> = row.get("jurisdiction")?;

        writeln!(
            file,
            "## {name} (`{slug}`) [{}]",
            jurisdiction.as_deref().unwrap_or("?")
        )
        .with_context(write_err)?;
        if !purpose.is_empty() {
            writeln!(file, "> {purpose}\n").with_context(write_err)?;
        }

        writeln!(file, "### Roles").with_context(write_err)?;
        let mut roles =
            conn.prepare("SELECT role_type, party FROM roles WHERE trust_id = ?1 ORDER BY role_type")?;
        let mut role_rows = roles.query(params![id])?;
        while let Some(role) = role_rows.next()? {
            let role_type: String = role.get("role_type")?;
            let party: String = role.get("party")?;
            writeln!(file, "- **{role_type}**: {party}").with_context(write_err)?;
        }

        writeln!(file, "\n### Assets").with_context(write_err)?;
        let mut assets =
            conn.prepare("SELECT class, descriptor FROM assets WHERE trust_id = ?1 ORDER BY class")?;
        let mut asset_rows = assets.query(params![id])?;
        while let Some(asset) = asset_rows.next()? {
            let class: String = asset.get("class")?;
            let descriptor: String = asset.get("descriptor")?;
            writeln!(file, "- **{class}**: {descriptor}").with_context(write_err)?;
        }
        writeln!(file, "\n---\n").with_context(write_err)?;
    }

    ledger.append_kv(&[
        ("type", json!(event::EXPORT)),
        ("format", json!("md")),
        ("path", json!(out.display().to_string())),
    ])?;
    Ok(out)
}

/// Write `SHA256SUMS` over the given artifacts and record a `checksums`
/// ledger event.
pub fn write_checksums(
    ledger: &Ledger,
    dist: &Path,
    paths: &[PathBuf],
) -> Result<PathBuf, ExportError> {
    let out = prepare_out(dist, "SHA256SUMS")?;
    let mut file = create(&out)?;
    let mut names = Vec::new();
    for path in paths {
        let digest = sha256_file(path)
            .with_context(|| format!("failed to hash export {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writeln!(file, "{digest}  {name}")
            .with_context(|| format!("failed to write {}", out.display()))?;
        names.push(name);
    }

    ledger.append_kv(&[
        ("type", json!(event::CHECKSUMS)),
        ("files", json!(names)),
        ("path", json!(out.display().to_string())),
    ])?;
    tracing::info!(path = %out.display(), "wrote export checksums");
    Ok(out)
}

fn prepare_out(dist: &Path, name: &str) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dist)
        .with_context(|| format!("failed to create export directory {}", dist.display()))?;
    Ok(dist.join(name))
}

fn create(path: &Path) -> Result<File, ExportError> {
    Ok(File::create(path).with_context(|| format!("failed to create {}", path.display()))?)
}

/// Minimal CSV quoting: wrap fields containing separators or quotes,
/// doubling embedded quotes.
fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
