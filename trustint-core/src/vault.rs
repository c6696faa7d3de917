//! Vault directory layout.
//!
//! Everything the daemon owns on disk lives under one root: the embedded
//! store, the provenance ledger, the HMAC key, the raw vault of accepted file
//! bodies, and the quarantine tree. Paths are derived, never stored.

use std::path::{Path, PathBuf};

/// Resolver for the well-known paths inside a vault root.
#[derive(Debug, Clone)]
pub struct VaultLayout {
    root: PathBuf,
}

impl VaultLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Embedded store file.
    pub fn db_path(&self) -> PathBuf {
        self.root.join("trustint.db")
    }

    /// Append-only provenance ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    /// Default HMAC key file.
    pub fn key_path(&self) -> PathBuf {
        self.root.join(".hmac_key")
    }

    /// Raw vault holding accepted file bodies, named by content hash.
    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    /// Quarantine tree, one subdirectory per ticket.
    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join("quarantine")
    }
}

impl Default for VaultLayout {
    fn default() -> Self {
        Self::new("vault")
    }
}
