//! Shape and cross-record validation for the declarative documents.
//!
//! Two passes: shape checks (identifier patterns, minimum lengths) and
//! cross-record rules (every trust has a trustee; air assets are bounded and
//! jurisdicted; references resolve). The first violation wins.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

use crate::records::{AssetClass, ConfigSet, DocumentCounts, RoleType};

/// Descriptor keywords that satisfy the air-asset bounds rule.
const AIR_BOUNDS_KEYWORDS: [&str; 4] = ["agl", "ceiling", "corridor", "altitude"];

fn slug_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9-]{3,}$").expect("slug pattern is valid"))
}

/// First rule violation found in a document set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Trust slug does not match the identifier pattern.
    #[error("trust slug '{0}' must match ^[a-z0-9-]{{3,}}$")]
    BadSlug(String),
    /// Trust name shorter than the minimum.
    #[error("trust '{0}': name must be at least 3 characters")]
    ShortName(String),
    /// Jurisdiction code shorter than the minimum.
    #[error("jurisdiction code '{0}' must be at least 2 characters")]
    BadJurisdictionCode(String),
    /// Role party shorter than the minimum.
    #[error("role for trust '{0}': party must be at least 2 characters")]
    ShortParty(String),
    /// Asset descriptor shorter than the minimum.
    #[error("asset for trust '{0}': descriptor must be at least 2 characters")]
    ShortDescriptor(String),
    /// Obligation name missing.
    #[error("obligation for trust '{0}': name must not be empty")]
    EmptyObligationName(String),
    /// Record references a trust slug that is not declared.
    #[error("{kind} references unknown trust '{trust}'")]
    UnknownTrust {
        /// Record kind making the reference.
        kind: &'static str,
        /// The unresolved slug.
        trust: String,
    },
    /// Trusts that declare no trustee role.
    #[error("trusts without a trustee: {0:?}")]
    MissingTrustee(Vec<String>),
    /// Air asset without a jurisdiction.
    #[error("air asset must specify a jurisdiction: {0}")]
    AirAssetWithoutJurisdiction(String),
    /// Air asset whose descriptor names no vertical bound.
    #[error("air asset descriptor should indicate bounds/altitude: {0}")]
    AirAssetWithoutBounds(String),
}

/// Validate all documents, returning per-document counts on success.
pub fn validate_documents(set: &ConfigSet) -> Result<DocumentCounts, ValidationError> {
    // Pass 1: shape.
    for trust in &set.trusts {
        if !slug_pattern().is_match(&trust.slug) {
            return Err(ValidationError::BadSlug(trust.slug.clone()));
        }
        if trust.name.chars().count() < 3 {
            return Err(ValidationError::ShortName(trust.slug.clone()));
        }
        if trust.jurisdiction.chars().count() < 2 {
            return Err(ValidationError::BadJurisdictionCode(
                trust.jurisdiction.clone(),
            ));
        }
    }
    for jurisdiction in &set.laws.jurisdictions {
        if jurisdiction.code.chars().count() < 2 {
            return Err(ValidationError::BadJurisdictionCode(
                jurisdiction.code.clone(),
            ));
        }
    }
    for role in &set.roles {
        if role.party.chars().count() < 2 {
            return Err(ValidationError::ShortParty(role.trust.clone()));
        }
    }
    for asset in &set.assets {
        if asset.descriptor.chars().count() < 2 {
            return Err(ValidationError::ShortDescriptor(asset.trust.clone()));
        }
    }
    for obligation in &set.laws.obligations {
        if obligation.name.is_empty() {
            return Err(ValidationError::EmptyObligationName(
                obligation.trust.clone(),
            ));
        }
    }

    // Pass 2: cross-record rules.
    let slugs: HashSet<&str> = set.trusts.iter().map(|t| t.slug.as_str()).collect();
    for role in &set.roles {
        if !slugs.contains(role.trust.as_str()) {
            return Err(ValidationError::UnknownTrust {
                kind: "role",
                trust: role.trust.clone(),
            });
        }
    }
    for asset in &set.assets {
        if !slugs.contains(asset.trust.as_str()) {
            return Err(ValidationError::UnknownTrust {
                kind: "asset",
                trust: asset.trust.clone(),
            });
        }
    }
    for obligation in &set.laws.obligations {
        if !slugs.contains(obligation.trust.as_str()) {
            return Err(ValidationError::UnknownTrust {
                kind: "obligation",
                trust: obligation.trust.clone(),
            });
        }
    }

    let trustees: HashSet<&str> = set
        .roles
        .iter()
        .filter(|r| r.role == RoleType::Trustee)
        .map(|r| r.trust.as_str())
        .collect();
    let missing: Vec<String> = set
        .trusts
        .iter()
        .filter(|t| !trustees.contains(t.slug.as_str()))
        .map(|t| t.slug.clone())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingTrustee(missing));
    }

    for asset in &set.assets {
        if asset.class == AssetClass::Air {
            if asset.jurisdiction.is_none() {
                return Err(ValidationError::AirAssetWithoutJurisdiction(
                    asset.trust.clone(),
                ));
            }
            let descriptor = asset.descriptor.to_lowercase();
            if !AIR_BOUNDS_KEYWORDS.iter().any(|k| descriptor.contains(k)) {
                return Err(ValidationError::AirAssetWithoutBounds(
                    asset.descriptor.clone(),
                ));
            }
        }
    }

    Ok(set.counts())
}
