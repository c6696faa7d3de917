//! Append-only, HMAC-chained provenance ledger.
//!
//! Each appended event becomes one line of UTF-8 JSON in
//! `vault/events.jsonl`, enriched with `ts` (RFC3339 UTC, trailing `Z`),
//! `prev` (the `mac` of the previous event, empty for the first), and `mac`
//! (lowercase-hex HMAC-SHA256 over the canonical form of the event without
//! `mac`). The line itself need not be canonical; only the MAC pre-image is.
//!
//! The service owns the ledger path and the resolved key; appends within one
//! process serialize on an internal lock. A failure before the final write
//! appends nothing, and the ledger never swallows errors: callers must not
//! proceed past a failed append.

use anyhow::Context;
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::Sha256;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::keys::{KeyError, KeyLoader};
use crate::vault::VaultLayout;
use trustint_spec::canon::canonical_bytes;

type HmacSha256 = Hmac<Sha256>;

/// Errors raised while appending to the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Key material could not be resolved.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// Filesystem failure before or during the append.
    #[error("ledger io error: {0}")]
    Io(#[from] anyhow::Error),
}

/// Current wall-clock time as RFC3339 UTC with a trailing `Z`, second
/// precision. The timestamp discipline for ledger events and row stamps.
pub fn rfc3339_utc_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Handle to the append-only provenance ledger.
pub struct Ledger {
    path: PathBuf,
    loader: KeyLoader,
    // Serializes appends and caches the resolved key for the process.
    key: Mutex<Option<Vec<u8>>>,
}

impl Ledger {
    /// Ledger at the layout's `events.jsonl`, key resolved per the
    /// environment precedence against the layout's key file.
    pub fn open(layout: &VaultLayout) -> Self {
        Self::with_paths(layout.ledger_path(), KeyLoader::from_env(layout.key_path()))
    }

    /// Ledger with explicit paths. Test seam.
    pub fn with_paths(path: PathBuf, loader: KeyLoader) -> Self {
        Self {
            path,
            loader,
            key: Mutex::new(None),
        }
    }

    /// The ledger file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve the key and return its provenance status line, caching the
    /// bytes for subsequent appends.
    pub fn key_status(&self) -> Result<String, KeyError> {
        let loaded = self.loader.load()?;
        *self.key.lock() = Some(loaded.bytes.clone());
        Ok(loaded.status)
    }

    /// Append one event built from key/value pairs.
    pub fn append_kv(
        &self,
        fields: &[(&str, Value)],
    ) -> Result<Map<String, Value>, LedgerError> {
        let mut map = Map::new();
        for (key, value) in fields {
            map.insert((*key).to_string(), value.clone());
        }
        self.append(map)
    }

    /// Append one event, returning it enriched with `ts`, `prev`, and `mac`.
    pub fn append(&self, event: Map<String, Value>) -> Result<Map<String, Value>, LedgerError> {
        let label = event_label(&event);
        let span = tracing::info_span!("ledger_append", event = %label);
        let _guard = span.enter();

        let mut key_slot = self.key.lock();
        let key = match key_slot.as_ref() {
            Some(key) => key.clone(),
            None => {
                let loaded = self.loader.load()?;
                tracing::debug!(status = %loaded.status, "resolved ledger key");
                *key_slot = Some(loaded.bytes.clone());
                loaded.bytes
            }
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create ledger directory {}", parent.display())
            })?;
        }

        let prev = self.last_mac()?;
        let mut enriched = event;
        enriched.insert("ts".into(), Value::String(rfc3339_utc_now()));
        enriched.insert("prev".into(), Value::String(prev));

        let pre_image = canonical_bytes(&Value::Object(enriched.clone()));
        let mut mac = HmacSha256::new_from_slice(&key)
            .expect("HMAC-SHA256 accepts keys of any length");
        mac.update(&pre_image);
        let tag = hex::encode(mac.finalize().into_bytes());
        enriched.insert("mac".into(), Value::String(tag));

        let mut line = serde_json::to_string(&Value::Object(enriched.clone()))
            .context("failed to serialize ledger event")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open ledger {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to ledger {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush ledger {}", self.path.display()))?;

        tracing::debug!("append committed");
        Ok(enriched)
    }

    /// The `mac` of the final non-blank line, or empty for a fresh ledger.
    fn last_mac(&self) -> Result<String, LedgerError> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read ledger {}", self.path.display()))?;
        let Some(last) = text.lines().rev().find(|line| !line.trim().is_empty()) else {
            return Ok(String::new());
        };
        let tail: Value = serde_json::from_str(last)
            .with_context(|| format!("ledger tail is not valid JSON in {}", self.path.display()))?;
        Ok(tail
            .get("mac")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

fn event_label(event: &Map<String, Value>) -> String {
    event
        .get("event")
        .or_else(|| event.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_ledger(dir: &Path) -> Ledger {
        let key_path = dir.join(".hmac_key");
        fs::write(&key_path, "A".repeat(43)).unwrap();
        Ledger::with_paths(dir.join("events.jsonl"), KeyLoader::file_only(key_path))
    }

    #[test]
    fn first_event_has_empty_prev_and_hex_mac() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = test_ledger(dir.path());
        let event = ledger.append_kv(&[("type", json!("ingest"))]).unwrap();
        assert_eq!(event["prev"], json!(""));
        let mac = event["mac"].as_str().unwrap();
        assert_eq!(mac.len(), 64);
        assert!(mac.chars().all(|c| c.is_ascii_hexdigit()));
        let text = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn appends_chain_on_previous_mac() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = test_ledger(dir.path());
        let first = ledger.append_kv(&[("type", json!("a"))]).unwrap();
        let second = ledger.append_kv(&[("type", json!("b"))]).unwrap();
        assert_eq!(second["prev"], first["mac"]);
    }

    #[test]
    fn blank_tail_lines_do_not_break_chaining() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = test_ledger(dir.path());
        let first = ledger.append_kv(&[("type", json!("a"))]).unwrap();
        let mut text = fs::read_to_string(ledger.path()).unwrap();
        text.push('\n');
        fs::write(ledger.path(), text).unwrap();
        let second = ledger.append_kv(&[("type", json!("b"))]).unwrap();
        assert_eq!(second["prev"], first["mac"]);
    }

    #[test]
    fn ts_is_rfc3339_with_trailing_z() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = test_ledger(dir.path());
        let event = ledger.append_kv(&[("type", json!("probe"))]).unwrap();
        let ts = event["ts"].as_str().unwrap();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2026-01-01T00:00:00Z".len());
    }
}
