//! # Domain Model
//!
//! The persisted entity set: organizations own hardware keys, the catalog
//! names features and packages, and each key carries a license set — one
//! entry per feature with a seat count and a validity window.
//!
//! All records are plain data. The store crate owns persistence; the engine
//! crate owns the rules that transform license sets.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The reserved license-manager console feature.
///
/// Every shipped key carries it, and the renewal engine treats it specially:
/// its version is pinned to 1.0 and its validity always ends one year after
/// the rest of the set. The hardware-lock runtime expects this exact
/// identifier on the wire.
pub const CONSOLE_FEATURE: &str = "LM_CONSOLE";

/// A client organization that owns hardware keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    /// Free-text contact info (names, addresses, phone numbers).
    pub contacts: String,
    pub comments: String,
}

/// A hardware key registered with exactly one organization.
///
/// The key id is the short serial printed on the dongle; it is immutable
/// once created and globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareKey {
    pub id: String,
    pub org_id: i64,
    pub comments: String,
}

/// A catalog row: either a leaf licensable feature or a package bundling
/// several features under one name. Features and packages share a single
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub is_package: bool,
    pub description: String,
}

/// A resolved catalog entry.
///
/// The storage layer keeps a flag plus membership edges; consumers get this
/// tagged variant instead, so a package always arrives with its members
/// resolved and a leaf feature cannot carry any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEntry {
    /// A leaf licensable capability.
    Feature { name: String, description: String },
    /// A named bundle of leaf features, itself addressable like a feature.
    Package {
        name: String,
        description: String,
        members: Vec<String>,
    },
}

impl CatalogEntry {
    /// The catalog name of this entry.
    pub fn name(&self) -> &str {
        match self {
            Self::Feature { name, .. } | Self::Package { name, .. } => name,
        }
    }

    /// Whether this entry is a package.
    pub fn is_package(&self) -> bool {
        matches!(self, Self::Package { .. })
    }
}

/// One entitlement row: a feature licensed to a key.
///
/// `(key_id, feature)` is the unique key. `dup_group` is an opaque tag the
/// hardware-lock runtime uses to disambiguate duplicate-licensing semantics;
/// it travels through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseSetItem {
    pub key_id: String,
    pub feature: String,
    pub version: f64,
    /// Seat count, always positive.
    pub count: i32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub dup_group: String,
}

/// An append-only record of a signed license file issued for an
/// organization's key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuanceHistoryItem {
    pub org_name: String,
    pub issued_at: DateTime<Utc>,
    pub xml: String,
}
