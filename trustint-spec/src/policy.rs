//! Intake policy model and rejection codes.
//!
//! The policy is intentionally declarative: the operator supplies a YAML
//! document naming the allowed file extensions and a size ceiling, and the
//! intake engine in `trustint_core` enforces it. Every decision records the
//! `policy_id` so the inbox log can be read against the policy that was in
//! force at the time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operator-supplied intake policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakePolicy {
    /// Free-form identifier recorded on every intake decision.
    pub policy_id: String,
    /// Enforcement rules.
    pub rules: IntakeRules,
}

/// Enforcement rules within an intake policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRules {
    /// Lowercase extensions, each including the leading dot.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    /// Maximum accepted file size in bytes.
    #[serde(default)]
    pub max_size_bytes: u64,
}

impl IntakePolicy {
    /// Parse a policy from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Whether a lowercased extension (leading dot included) is allowed.
    pub fn allows_extension(&self, ext: &str) -> bool {
        self.rules.allowed_extensions.iter().any(|e| e == ext)
    }
}

/// Stable rejection codes recorded on tickets and in the inbox log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectCode {
    /// `E001`: extension not in the policy allowlist.
    DisallowedExtension,
    /// `E002`: file larger than `max_size_bytes`.
    Oversize,
    /// `E004`: processing error while handling the file.
    ProcessingError,
}

impl RejectCode {
    /// Stable wire code.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::DisallowedExtension => "E001",
            RejectCode::Oversize => "E002",
            RejectCode::ProcessingError => "E004",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = "\
policy_id: intake-v1
rules:
  allowed_extensions: ['.pdf', '.txt']
  max_size_bytes: 1024
";

    #[test]
    fn parses_operator_policy() {
        let policy = IntakePolicy::from_yaml(POLICY).unwrap();
        assert_eq!(policy.policy_id, "intake-v1");
        assert_eq!(policy.rules.max_size_bytes, 1024);
        assert!(policy.allows_extension(".pdf"));
        assert!(!policy.allows_extension(".exe"));
    }

    #[test]
    fn reject_codes_are_stable() {
        assert_eq!(RejectCode::DisallowedExtension.to_string(), "E001");
        assert_eq!(RejectCode::Oversize.to_string(), "E002");
        assert_eq!(RejectCode::ProcessingError.to_string(), "E004");
    }
}
