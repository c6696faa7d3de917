//! TRUSTINT core library: provenance ledger, replay verifier, key loader,
//! store adapter, schema migrations, declarative ingest, intake state
//! machine, quarantine registry, and exports.
#![deny(missing_docs)]

/// Streaming SHA-256 helpers.
pub mod digest;
/// Export artifacts (JSONL, CSV, Markdown) and checksum manifests.
pub mod export;
/// Idempotent declarative ingest and full-text index rebuild.
pub mod ingest;
/// Inbox intake state machine.
pub mod intake;
/// HMAC key resolution from environment, file, or generation.
pub mod keys;
/// Append-only HMAC-chained provenance ledger.
pub mod ledger;
/// Versioned forward-only schema migrations.
pub mod migrate;
/// Quarantine ticket lifecycle.
pub mod quarantine;
/// Embedded relational store adapter.
pub mod store;
/// Replay verification of the provenance ledger.
pub mod verify;
/// Vault directory layout.
pub mod vault;

pub use keys::{KeyError, KeyLoader, LoadedKey};
pub use ledger::{Ledger, LedgerError};
pub use store::{Store, StoreError};
pub use vault::VaultLayout;
pub use verify::{verify_chain, ChainError, ChainFault};
