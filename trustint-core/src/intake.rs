//! Inbox intake state machine.
//!
//! Files observed in the inbox are content-addressed and either admitted to
//! the raw vault, quarantined under a fresh ticket, or recorded as duplicate
//! submissions. Every transition appends one ledger event naming the
//! transition. Processing errors inside a single file's intake are converted
//! to an `E004` rejection so the inbox keeps draining; ledger failures are
//! never converted and abort the run.

use anyhow::Context;
use rusqlite::{params, OptionalExtension};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::digest::sha256_file;
use crate::ledger::{rfc3339_utc_now, Ledger, LedgerError};
use crate::store::{Store, StoreError};
use crate::vault::VaultLayout;
use trustint_spec::event;
use trustint_spec::policy::{IntakePolicy, RejectCode};

/// Errors that abort intake instead of quarantining the file.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Ledger append failure; never converted to a rejection.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Store failure on the rejection path itself.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Filesystem failure on the rejection path itself.
    #[error("intake io error: {0}")]
    Io(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for IntakeError {
    fn from(err: rusqlite::Error) -> Self {
        IntakeError::Store(StoreError::Sqlite(err))
    }
}

/// Terminal state reached for one inbox file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// File admitted to the raw vault.
    Accepted {
        /// Content hash of the file.
        sha256: String,
        /// Where the body now lives.
        stored_at: PathBuf,
    },
    /// Content hash already known; submission logged, file left in place.
    Duplicate {
        /// Content hash of the file.
        sha256: String,
    },
    /// File quarantined under a fresh ticket.
    Rejected {
        /// Minted ticket id (`T` + 8 uppercase hex).
        ticket_id: String,
        /// Rejection code.
        code: RejectCode,
        /// Full reason recorded on the ticket.
        reason: String,
    },
    /// Not a regular file; nothing recorded.
    Skipped,
}

/// Policy-check verdict for one file, before any decision row is written.
enum Decision {
    Duplicate {
        sha256: String,
    },
    Accept {
        sha256: String,
        ext: String,
    },
    Reject {
        sha256: String,
        code: RejectCode,
        reason: String,
    },
}

/// Intake engine bound to one store, ledger, policy, and vault layout.
pub struct IntakeEngine<'a> {
    store: &'a mut Store,
    ledger: &'a Ledger,
    policy: IntakePolicy,
    layout: VaultLayout,
}

impl<'a> IntakeEngine<'a> {
    /// Build an engine over the given collaborators.
    pub fn new(
        store: &'a mut Store,
        ledger: &'a Ledger,
        policy: IntakePolicy,
        layout: VaultLayout,
    ) -> Self {
        Self {
            store,
            ledger,
            policy,
            layout,
        }
    }

    /// Process every existing regular file in `inbox`, in name order. Used
    /// on watcher startup and by the explicit intake command.
    pub fn drain(&mut self, inbox: &Path) -> Result<Vec<(PathBuf, IntakeOutcome)>, IntakeError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(inbox)
            .with_context(|| format!("failed to read inbox {}", inbox.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        paths.sort();
        let mut outcomes = Vec::new();
        for path in paths {
            let outcome = self.process(&path)?;
            outcomes.push((path, outcome));
        }
        Ok(outcomes)
    }

    /// Drive one file through the state machine.
    pub fn process(&mut self, path: &Path) -> Result<IntakeOutcome, IntakeError> {
        let size = match fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Ok(IntakeOutcome::Skipped),
        };
        let span = tracing::info_span!("intake", path = %path.display());
        let _guard = span.enter();

        self.ledger.append_kv(&[
            ("event", json!(event::INBOX_DETECT)),
            ("path", json!(path.display().to_string())),
            ("size", json!(size)),
        ])?;

        // Errors before a decision is recorded become an E004 rejection so
        // the inbox keeps draining. Ledger failures abort, and failures
        // after a decision row exists abort too: re-recording would give one
        // hash two decisions.
        let decision = match self.classify(path, size) {
            Ok(decision) => decision,
            Err(IntakeError::Ledger(err)) => return Err(IntakeError::Ledger(err)),
            Err(err) => {
                tracing::error!(error = %err, "intake processing failed; quarantining");
                Decision::Reject {
                    sha256: "unknown".to_string(),
                    code: RejectCode::ProcessingError,
                    reason: format!("{}: {err}", RejectCode::ProcessingError),
                }
            }
        };

        match decision {
            Decision::Duplicate { sha256 } => {
                self.log_decision(&sha256, path, size, "DUPLICATE", None)?;
                self.ledger.append_kv(&[
                    ("event", json!(event::INBOX_DUPLICATE)),
                    ("sha256", json!(sha256)),
                ])?;
                tracing::info!(sha256 = %sha256, "duplicate submission");
                Ok(IntakeOutcome::Duplicate { sha256 })
            }
            Decision::Accept { sha256, ext } => self.accept(path, &sha256, &ext, size),
            Decision::Reject {
                sha256,
                code,
                reason,
            } => self.reject(path, &sha256, size, code, reason),
        }
    }

    /// HASHED → {DUPLICATE | POLICY_CHECK → {ACCEPT | REJECT}}.
    fn classify(&mut self, path: &Path, size: u64) -> Result<Decision, IntakeError> {
        let sha256 = sha256_file(path)
            .with_context(|| format!("failed to hash {}", path.display()))?;
        self.ledger.append_kv(&[
            ("event", json!(event::INBOX_CHECKSUM)),
            ("path", json!(path.display().to_string())),
            ("sha256", json!(sha256)),
        ])?;

        if self.already_submitted(&sha256)? {
            return Ok(Decision::Duplicate { sha256 });
        }

        let ext = lowercased_suffix(path);
        if !self.policy.allows_extension(&ext) {
            let reason = format!(
                "{}: extension '{ext}' not allowed by policy {}",
                RejectCode::DisallowedExtension,
                self.policy.policy_id
            );
            return Ok(Decision::Reject {
                sha256,
                code: RejectCode::DisallowedExtension,
                reason,
            });
        }
        if size > self.policy.rules.max_size_bytes {
            let reason = format!(
                "{}: size {size} exceeds max_size_bytes {}",
                RejectCode::Oversize,
                self.policy.rules.max_size_bytes
            );
            return Ok(Decision::Reject {
                sha256,
                code: RejectCode::Oversize,
                reason,
            });
        }

        Ok(Decision::Accept { sha256, ext })
    }

    /// ACCEPT → RAW_VAULT.
    fn accept(
        &mut self,
        path: &Path,
        sha256: &str,
        ext: &str,
        size: u64,
    ) -> Result<IntakeOutcome, IntakeError> {
        self.log_decision(sha256, path, size, "ACCEPT", None)?;
        self.ledger.append_kv(&[
            ("event", json!(event::INBOX_ACCEPT)),
            ("sha256", json!(sha256)),
            ("policy", json!(self.policy.policy_id)),
        ])?;

        let raw_dir = self.layout.raw_dir();
        fs::create_dir_all(&raw_dir)
            .with_context(|| format!("failed to create raw vault {}", raw_dir.display()))?;
        let stored_at = raw_dir.join(format!("{sha256}{ext}"));
        fs::rename(path, &stored_at).with_context(|| {
            format!("failed to move {} into raw vault", path.display())
        })?;
        self.ledger.append_kv(&[
            ("event", json!(event::INBOX_MOVE_RAW)),
            ("sha256", json!(sha256)),
            ("dest", json!(stored_at.display().to_string())),
        ])?;
        tracing::info!(sha256 = %sha256, dest = %stored_at.display(), "accepted into raw vault");
        Ok(IntakeOutcome::Accepted {
            sha256: sha256.to_string(),
            stored_at,
        })
    }

    /// REJECT → QUARANTINE.
    fn reject(
        &mut self,
        path: &Path,
        sha256: &str,
        size: u64,
        code: RejectCode,
        reason: String,
    ) -> Result<IntakeOutcome, IntakeError> {
        let ticket_id = mint_ticket_id();
        self.store.connection().execute(
            "INSERT INTO quarantine_tickets (id, reason, sha256, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![ticket_id, reason, sha256, rfc3339_utc_now()],
        )?;
        self.log_decision(sha256, path, size, "REJECT", Some(&ticket_id))?;
        self.ledger.append_kv(&[
            ("event", json!(event::INBOX_REJECT)),
            ("sha256", json!(sha256)),
            ("ticket", json!(ticket_id)),
            ("code", json!(code.as_str())),
        ])?;

        let ticket_dir = self.layout.quarantine_dir().join(&ticket_id);
        fs::create_dir_all(&ticket_dir).with_context(|| {
            format!("failed to create quarantine directory {}", ticket_dir.display())
        })?;
        if path.exists() {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unnamed".to_string());
            let dest = ticket_dir.join(file_name);
            fs::rename(path, &dest).with_context(|| {
                format!("failed to move {} into quarantine", path.display())
            })?;
            self.ledger.append_kv(&[
                ("event", json!(event::INBOX_MOVE_QUAR)),
                ("ticket", json!(ticket_id)),
                ("dest", json!(dest.display().to_string())),
            ])?;
        } else {
            // The body is gone (the failure that brought us here); the ticket
            // still records the rejection.
            tracing::warn!(ticket = %ticket_id, "rejected file no longer present; nothing to move");
        }
        tracing::warn!(ticket = %ticket_id, code = %code, "quarantined");
        Ok(IntakeOutcome::Rejected {
            ticket_id,
            code,
            reason,
        })
    }

    /// Any prior inbox entry for this hash counts as a prior submission,
    /// including an earlier DUPLICATE.
    fn already_submitted(&self, sha256: &str) -> Result<bool, IntakeError> {
        let hit: Option<i64> = self
            .store
            .connection()
            .query_row(
                "SELECT 1 FROM inbox_log WHERE sha256 = ?1 LIMIT 1",
                params![sha256],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn log_decision(
        &self,
        sha256: &str,
        path: &Path,
        size: u64,
        decision: &str,
        ticket_id: Option<&str>,
    ) -> Result<(), IntakeError> {
        self.store.connection().execute(
            "INSERT INTO inbox_log (sha256, source_path, size_bytes, file_ext, policy_id, decision, ticket_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sha256,
                path.display().to_string(),
                size as i64,
                lowercased_suffix(path),
                self.policy.policy_id,
                decision,
                ticket_id,
                rfc3339_utc_now(),
            ],
        )?;
        Ok(())
    }
}

/// Mint a ticket id: `T` followed by 8 uppercase hex chars from a fresh
/// random UUID.
fn mint_ticket_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("T{}", uuid[..8].to_uppercase())
}

/// Lowercased file suffix including the leading dot, empty when absent.
fn lowercased_suffix(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_ids_have_the_documented_shape() {
        let id = mint_ticket_id();
        assert_eq!(id.len(), 9);
        assert!(id.starts_with('T'));
        assert!(id[1..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn suffix_is_lowercased_with_dot() {
        assert_eq!(lowercased_suffix(Path::new("a/b/Report.PDF")), ".pdf");
        assert_eq!(lowercased_suffix(Path::new("a/b/archive.tar.GZ")), ".gz");
        assert_eq!(lowercased_suffix(Path::new("a/b/README")), "");
    }
}
