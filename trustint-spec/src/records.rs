//! Declarative record model for the four operator-curated documents.
//!
//! Records reference each other by declared identifier only: roles, assets,
//! and obligations name their trust by `slug`, and jurisdictions are named by
//! `code`. Opaque mappings (`powers`, `metadata`, `details`) stay untyped and
//! are persisted as canonical bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role a party holds within a trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    /// Holds legal title and administers the trust.
    Trustee,
    /// Oversees and can veto trustee decisions.
    Protector,
    /// Entitled to benefit from the trust.
    Beneficiary,
    /// Advises without fiduciary powers.
    Advisor,
}

impl RoleType {
    /// Wire/store spelling of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Trustee => "trustee",
            RoleType::Protector => "protector",
            RoleType::Beneficiary => "beneficiary",
            RoleType::Advisor => "advisor",
        }
    }
}

/// Asset classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// Land and fixtures.
    Land,
    /// Water rights and bodies.
    Water,
    /// Airspace; requires a jurisdiction and bounded descriptor.
    Air,
}

impl AssetClass {
    /// Wire/store spelling of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Land => "land",
            AssetClass::Water => "water",
            AssetClass::Air => "air",
        }
    }
}

/// Kind of obligation a trust carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObligationKind {
    /// Statutory or regulatory duty.
    Compliance,
    /// Voluntary undertaking recorded against the trust.
    Covenant,
}

impl ObligationKind {
    /// Wire/store spelling of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObligationKind::Compliance => "compliance",
            ObligationKind::Covenant => "covenant",
        }
    }
}

fn empty_map() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A declared trust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustRecord {
    /// Lowercase-hyphen identifier, unique across the registry.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Free-form purpose statement.
    #[serde(default)]
    pub purpose: String,
    /// Jurisdiction code the trust is settled in.
    pub jurisdiction: String,
}

/// A role binding a party to a trust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Slug of the trust this role belongs to.
    pub trust: String,
    /// Role type.
    pub role: RoleType,
    /// Free-form party name.
    pub party: String,
    /// Opaque powers mapping, stored as canonical bytes.
    #[serde(default = "empty_map")]
    pub powers: Value,
}

/// An asset held by a trust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Slug of the owning trust.
    pub trust: String,
    /// Asset classification.
    pub class: AssetClass,
    /// Human-facing descriptor.
    pub descriptor: String,
    /// Optional jurisdiction code; mandatory for air assets.
    #[serde(default)]
    pub jurisdiction: Option<String>,
    /// Opaque metadata mapping, stored as canonical bytes.
    #[serde(default = "empty_map")]
    pub metadata: Value,
}

/// A jurisdiction declared in the laws document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionRecord {
    /// Short unique code (e.g. `NZ`).
    pub code: String,
    /// Display name.
    pub name: String,
}

/// An obligation declared in the laws document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObligationRecord {
    /// Slug of the obligated trust.
    pub trust: String,
    /// Obligation name, unique per trust.
    pub name: String,
    /// Obligation kind.
    pub kind: ObligationKind,
    /// Free-form schedule description.
    #[serde(default)]
    pub schedule: String,
    /// Authority the obligation answers to.
    #[serde(default)]
    pub authority: String,
    /// Opaque details mapping, stored as canonical bytes.
    #[serde(default = "empty_map")]
    pub details: Value,
}

/// The laws document: jurisdictions plus obligations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LawsDoc {
    /// Declared jurisdictions.
    #[serde(default)]
    pub jurisdictions: Vec<JurisdictionRecord>,
    /// Declared obligations.
    #[serde(default)]
    pub obligations: Vec<ObligationRecord>,
}

/// All four declarative documents, loaded together.
#[derive(Debug, Clone, Default)]
pub struct ConfigSet {
    /// Contents of `trusts.yaml`.
    pub trusts: Vec<TrustRecord>,
    /// Contents of `roles.yaml`.
    pub roles: Vec<RoleRecord>,
    /// Contents of `assets.yaml`.
    pub assets: Vec<AssetRecord>,
    /// Contents of `laws.yaml`.
    pub laws: LawsDoc,
}

impl ConfigSet {
    /// Per-document record counts.
    pub fn counts(&self) -> DocumentCounts {
        DocumentCounts {
            trusts: self.trusts.len(),
            roles: self.roles.len(),
            assets: self.assets.len(),
            jurisdictions: self.laws.jurisdictions.len(),
            obligations: self.laws.obligations.len(),
        }
    }
}

/// Record counts across the declarative documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCounts {
    /// Number of trust records.
    pub trusts: usize,
    /// Number of role records.
    pub roles: usize,
    /// Number of asset records.
    pub assets: usize,
    /// Number of jurisdiction records.
    pub jurisdictions: usize,
    /// Number of obligation records.
    pub obligations: usize,
}
