//! # keyward-store — Entitlement Store
//!
//! The single owner of persisted state: organizations, hardware keys, the
//! feature/package catalog, per-key license sets, and issuance history.
//!
//! [`EntitlementStore`] is the contract every other component programs
//! against. Two implementations ship:
//!
//! - [`PgStore`] — Postgres via `sqlx`; every multi-row mutation runs in its
//!   own transaction
//! - [`MemStore`] — in-memory, `parking_lot`-backed; same contract, used by
//!   tests and DB-less deployments
//!
//! ## Replace semantics
//!
//! License sets and package contents are updated by **atomic full replace**:
//! delete everything, insert the new rows, commit. Callers never patch
//! individual rows. A duplicate feature inside one replacement set fails the
//! whole call with a conflict and leaves the prior rows visible. There is no
//! key-level locking across calls — two overlapping replaces on the same key
//! resolve to whichever commits last.

pub mod mem;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use keyward_core::model::{
    CatalogEntry, Feature, HardwareKey, IssuanceHistoryItem, LicenseSetItem, Organization,
};

pub use mem::MemStore;
pub use pg::PgStore;

/// Storage failure.
///
/// Not-found and conflict conditions are distinct variants so callers can
/// map them to different outcomes; everything else is a backend error.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No organization with this id is registered.
    #[error("unknown organization id {0}")]
    UnknownOrganization(i64),

    /// No hardware key with this id is registered.
    #[error("unknown key id \"{0}\"")]
    UnknownKey(String),

    /// No catalog entry with this name exists.
    #[error("unknown feature \"{0}\"")]
    UnknownFeature(String),

    /// A key with this id already exists; key ids are immutable and unique.
    #[error("key id \"{0}\" already exists")]
    DuplicateKey(String),

    /// A replacement license set named the same feature twice.
    #[error("duplicate feature \"{feature}\" in replacement set for key \"{key_id}\"")]
    DuplicateItem { key_id: String, feature: String },

    /// A replacement package content named the same member twice.
    #[error("duplicate member \"{member}\" in package \"{package}\"")]
    DuplicateMember { package: String, member: String },

    /// A package member is itself a package; nesting is unsupported and
    /// rejected at write time instead of mis-expanding at issue time.
    #[error("member \"{member}\" of package \"{package}\" is itself a package")]
    NestedPackage { package: String, member: String },

    /// Underlying database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Shorthand for store operation results.
pub type StoreResult<T> = Result<T, StoreError>;

/// The storage contract for the entitlement engine.
///
/// All other components operate on values returned from here and never
/// retain cross-call state; the store is the sole transaction boundary.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// All registered hardware keys.
    async fn keys(&self) -> StoreResult<Vec<HardwareKey>>;

    /// Register a new hardware key.
    ///
    /// Fails with [`StoreError::UnknownOrganization`] when the owning
    /// organization does not exist and [`StoreError::DuplicateKey`] when the
    /// key id is already taken.
    async fn create_key(&self, key: &HardwareKey) -> StoreResult<()>;

    /// All client organizations.
    async fn organizations(&self) -> StoreResult<Vec<Organization>>;

    /// The name of the organization with the given id.
    async fn organization_name(&self, org_id: i64) -> StoreResult<String>;

    /// Whether the key is currently registered to the given organization.
    /// Fails with [`StoreError::UnknownKey`] when the key is not registered
    /// anywhere.
    async fn key_belongs_to_org(&self, key_id: &str, org_id: i64) -> StoreResult<bool>;

    /// The organization owning a key.
    async fn owner_of(&self, key_id: &str) -> StoreResult<Organization>;

    /// The current license set for a key. Empty (not an error) for an
    /// unknown key.
    async fn license_set(&self, key_id: &str) -> StoreResult<Vec<LicenseSetItem>>;

    /// Atomically replace the whole license set for a key.
    ///
    /// Two items naming the same feature fail the call with
    /// [`StoreError::DuplicateItem`]; the prior set stays untouched.
    async fn replace_license_set(&self, key_id: &str, items: &[LicenseSetItem]) -> StoreResult<()>;

    /// Every license-set row whose end date falls inside the scan window
    /// for the given term, evaluated against the current instant.
    /// Monotonic in `term`: a shorter term returns a subset of a longer one.
    async fn expiring_within(&self, term: Duration) -> StoreResult<Vec<LicenseSetItem>>;

    /// Append a signed license file to the issuance history of the given
    /// organization; the organization name is resolved from the id.
    async fn append_history(
        &self,
        org_id: i64,
        issued_at: DateTime<Utc>,
        xml: &str,
    ) -> StoreResult<()>;

    /// All historical issuances for an organization, unordered.
    async fn history_for(&self, org_id: i64) -> StoreResult<Vec<IssuanceHistoryItem>>;

    /// The full feature/package catalog.
    async fn features(&self) -> StoreResult<Vec<Feature>>;

    /// Insert a catalog row, or update its description/kind when it already
    /// exists. Returns `true` when an existing row was updated.
    async fn create_or_update_feature(
        &self,
        name: &str,
        description: &str,
        is_package: bool,
    ) -> StoreResult<bool>;

    /// Delete a catalog row. Does not cascade to package memberships or
    /// license-set rows; those may dangle afterwards.
    async fn delete_feature(&self, name: &str) -> StoreResult<()>;

    /// Atomically replace the member list of a package.
    ///
    /// Duplicate members fail with [`StoreError::DuplicateMember`]; a member
    /// that is itself a package fails with [`StoreError::NestedPackage`].
    /// Either way the prior membership stays untouched.
    async fn set_package_content(&self, members: &[String], package: &str) -> StoreResult<()>;

    /// The member feature names of a package. Empty for an unknown package.
    async fn package_content(&self, package: &str) -> StoreResult<Vec<String>>;

    /// Whether the named catalog entry is a package.
    async fn is_package(&self, name: &str) -> StoreResult<bool>;

    /// Resolve a catalog name to its tagged entry; packages arrive with
    /// their member list attached.
    async fn catalog_entry(&self, name: &str) -> StoreResult<CatalogEntry>;
}

/// Reject replacement sets that name the same feature twice.
fn check_unique_features(key_id: &str, items: &[LicenseSetItem]) -> StoreResult<()> {
    let mut seen = std::collections::HashSet::new();
    for item in items {
        if !seen.insert(item.feature.as_str()) {
            return Err(StoreError::DuplicateItem {
                key_id: key_id.to_string(),
                feature: item.feature.clone(),
            });
        }
    }
    Ok(())
}

/// Reject package contents with repeated members.
fn check_unique_members(package: &str, members: &[String]) -> StoreResult<()> {
    let mut seen = std::collections::HashSet::new();
    for member in members {
        if !seen.insert(member.as_str()) {
            return Err(StoreError::DuplicateMember {
                package: package.to_string(),
                member: member.clone(),
            });
        }
    }
    Ok(())
}
