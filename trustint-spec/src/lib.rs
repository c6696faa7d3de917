//! TRUSTINT specification types and validation primitives.
//!
//! This crate defines the declarative record model for the curated trust
//! documents, the canonical byte form used as the HMAC pre-image, the intake
//! policy model, and the validation rules (shape checks and cross-record
//! invariants). Execution happens in `trustint_core`.
#![deny(missing_docs)]

/// Canonical byte form shared by HMAC pre-images and opaque record blobs.
pub mod canon;
/// Operator-supplied intake policy and rejection codes.
pub mod policy;
/// Declarative record model for the curated documents.
pub mod records;
/// Shape and cross-record validation.
pub mod validate;

pub use records::{
    AssetClass, AssetRecord, ConfigSet, DocumentCounts, JurisdictionRecord, LawsDoc,
    ObligationKind, ObligationRecord, RoleRecord, RoleType, TrustRecord,
};
pub use validate::{validate_documents, ValidationError};

/// Canonical `event`/`type` values recorded in the provenance ledger.
pub mod event {
    /// A regular file appeared in the inbox.
    pub const INBOX_DETECT: &str = "INBOX_DETECT";
    /// Content hash computed for an inbox file.
    pub const INBOX_CHECKSUM: &str = "INBOX_CHECKSUM";
    /// Content hash already known; submission recorded as a duplicate.
    pub const INBOX_DUPLICATE: &str = "INBOX_DUPLICATE";
    /// Policy accepted the file.
    pub const INBOX_ACCEPT: &str = "INBOX_ACCEPT";
    /// Accepted file moved into the raw vault.
    pub const INBOX_MOVE_RAW: &str = "INBOX_MOVE_RAW";
    /// Policy rejected the file and a ticket was minted.
    pub const INBOX_REJECT: &str = "INBOX_REJECT";
    /// Rejected file moved into its quarantine directory.
    pub const INBOX_MOVE_QUAR: &str = "INBOX_MOVE_QUAR";
    /// Operator closed a quarantine ticket.
    pub const QUARANTINE_RESOLVE: &str = "QUARANTINE_RESOLVE";
    /// One migration script was applied.
    pub const MIGRATION_APPLY: &str = "MIGRATION_APPLY";
    /// Declarative ingest completed.
    pub const INGEST: &str = "ingest";
    /// One export artifact was written.
    pub const EXPORT: &str = "export";
    /// Checksum manifest written over export artifacts.
    pub const CHECKSUMS: &str = "checksums";
}
