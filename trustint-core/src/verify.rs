//! Replay verification of the provenance ledger.
//!
//! Re-reads the ledger line by line and enforces the chain invariant: every
//! event's `prev` equals the previous event's `mac` (empty for the first),
//! and every `mac` recomputes over the canonical form of the event without
//! `mac`. The first failure wins and stops the scan. A rotated key surfaces
//! as a MAC mismatch, not a distinct fault.

use anyhow::Context;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

use trustint_spec::canon::canonical_bytes;

type HmacSha256 = Hmac<Sha256>;

/// Why a ledger line failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFault {
    /// Line is not a JSON object.
    JsonParse,
    /// Line carries no `mac` field.
    MissingMac,
    /// `prev` does not match the previous event's `mac`.
    PrevMismatch,
    /// Recomputed MAC does not match the stored one.
    MacMismatch,
}

impl ChainFault {
    /// Stable wire name for the fault.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFault::JsonParse => "JSON_PARSE",
            ChainFault::MissingMac => "MISSING_MAC",
            ChainFault::PrevMismatch => "PREV_MISMATCH",
            ChainFault::MacMismatch => "MAC_MISMATCH",
        }
    }
}

impl fmt::Display for ChainFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First verification failure, with its 1-based line number.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("chain broken at line {line}: {fault}")]
pub struct ChainError {
    /// 1-based line number in the ledger file.
    pub line: usize,
    /// Failure class.
    pub fault: ChainFault,
}

/// Errors raised by a verification run.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The chain is broken.
    #[error(transparent)]
    Integrity(#[from] ChainError),
    /// The ledger could not be read at all.
    #[error("verify io error: {0}")]
    Io(#[from] anyhow::Error),
}

/// Replay-verify the ledger at `path` with `key`. Blank lines are skipped.
/// Returns the number of verified events.
pub fn verify_chain(path: &Path, key: &[u8]) -> Result<usize, VerifyError> {
    let file =
        File::open(path).with_context(|| format!("failed to open ledger {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut expected_prev = String::new();
    let mut verified = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line
            .with_context(|| format!("failed to read ledger {} line {line_no}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }

        let fail = |fault: ChainFault| ChainError {
            line: line_no,
            fault,
        };

        let parsed: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(_) => return Err(fail(ChainFault::JsonParse).into()),
        };
        let Value::Object(mut event) = parsed else {
            return Err(fail(ChainFault::JsonParse).into());
        };

        let Some(stored_mac) = event.remove("mac").as_ref().and_then(Value::as_str).map(str::to_string)
        else {
            return Err(fail(ChainFault::MissingMac).into());
        };

        let prev = event
            .get("prev")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if prev != expected_prev {
            return Err(fail(ChainFault::PrevMismatch).into());
        }

        let pre_image = canonical_bytes(&Value::Object(event));
        let mut mac = HmacSha256::new_from_slice(key)
            .expect("HMAC-SHA256 accepts keys of any length");
        mac.update(&pre_image);
        let stored_bytes = match hex::decode(stored_mac.as_bytes()) {
            Ok(bytes) => bytes,
            Err(_) => return Err(fail(ChainFault::MacMismatch).into()),
        };
        if mac.verify_slice(&stored_bytes).is_err() {
            return Err(fail(ChainFault::MacMismatch).into());
        }

        expected_prev = stored_mac;
        verified += 1;
    }

    Ok(verified)
}
