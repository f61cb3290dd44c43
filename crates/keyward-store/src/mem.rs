//! In-memory entitlement store.
//!
//! Implements the full [`EntitlementStore`] contract on top of a single
//! `parking_lot::RwLock`. All operations are synchronous inside the async
//! methods — the lock is never held across an `.await` point, and
//! `parking_lot` never poisons, so a panicking writer cannot corrupt the
//! store for later calls.
//!
//! Used by the test suites of every crate in the workspace and as the
//! DB-less fallback when no `DATABASE_URL` is configured.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use async_trait::async_trait;
use keyward_core::calendar::expiry_window;
use keyward_core::model::{
    CatalogEntry, Feature, HardwareKey, IssuanceHistoryItem, LicenseSetItem, Organization,
};

use crate::{
    check_unique_features, check_unique_members, EntitlementStore, StoreError, StoreResult,
};

#[derive(Default)]
struct Inner {
    organizations: BTreeMap<i64, Organization>,
    keys: BTreeMap<String, HardwareKey>,
    features: BTreeMap<String, Feature>,
    package_members: BTreeMap<String, Vec<String>>,
    license_sets: BTreeMap<String, Vec<LicenseSetItem>>,
    history: Vec<IssuanceHistoryItem>,
    next_org_id: i64,
}

/// Thread-safe in-memory implementation of [`EntitlementStore`].
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an organization, assigning the next free id.
    ///
    /// Organizations are created by administrative action outside the
    /// entitlement engine; this inherent method stands in for that action
    /// in tests and bootstrap code.
    pub fn insert_organization(
        &self,
        name: &str,
        contacts: &str,
        comments: &str,
    ) -> Organization {
        let mut inner = self.inner.write();
        inner.next_org_id += 1;
        let org = Organization {
            id: inner.next_org_id,
            name: name.to_string(),
            contacts: contacts.to_string(),
            comments: comments.to_string(),
        };
        inner.organizations.insert(org.id, org.clone());
        org
    }

    /// A store pre-populated with a small, self-consistent data set:
    /// two organizations, three keys, four leaf features, and one package.
    /// Mirrors what a freshly migrated production database looks like.
    pub fn with_sample_data() -> Self {
        let store = Self::new();
        let geoscan = store.insert_organization("Geoscan Ltd", "ops@geoscan.example", "");
        let northwind =
            store.insert_organization("Northwind Oil", "licensing@northwind.example", "");

        {
            let mut inner = store.inner.write();
            for (name, is_package, description) in [
                ("F1", false, "Base interpretation module"),
                ("F2", false, "Map editor"),
                ("F3", false, "Well correlation"),
                ("F4", false, "Seismic attributes"),
                ("P1", true, "Interpretation bundle"),
            ] {
                inner.features.insert(
                    name.to_string(),
                    Feature {
                        name: name.to_string(),
                        is_package,
                        description: description.to_string(),
                    },
                );
            }
            inner
                .package_members
                .insert("P1".to_string(), vec!["F1".to_string(), "F2".to_string()]);

            for (id, org_id) in [
                ("A1B2C3", geoscan.id),
                ("A1B2C4", geoscan.id),
                ("B9X8Y7", northwind.id),
            ] {
                inner.keys.insert(
                    id.to_string(),
                    HardwareKey {
                        id: id.to_string(),
                        org_id,
                        comments: String::new(),
                    },
                );
            }

            let start = chrono::NaiveDate::from_ymd_opt(2025, 7, 8).expect("valid date");
            let end = chrono::NaiveDate::from_ymd_opt(2026, 7, 8).expect("valid date");
            for (key_id, feature, count) in [
                ("A1B2C3", "P1", 10),
                ("A1B2C3", "F3", 10),
                ("A1B2C4", "P1", 20),
                ("A1B2C4", "F3", 20),
                ("A1B2C4", "F1", 30),
            ] {
                inner
                    .license_sets
                    .entry(key_id.to_string())
                    .or_default()
                    .push(LicenseSetItem {
                        key_id: key_id.to_string(),
                        feature: feature.to_string(),
                        version: 19.0,
                        count,
                        start,
                        end,
                        dup_group: "DISP".to_string(),
                    });
            }
        }
        store
    }
}

#[async_trait]
impl EntitlementStore for MemStore {
    async fn keys(&self) -> StoreResult<Vec<HardwareKey>> {
        Ok(self.inner.read().keys.values().cloned().collect())
    }

    async fn create_key(&self, key: &HardwareKey) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if !inner.organizations.contains_key(&key.org_id) {
            return Err(StoreError::UnknownOrganization(key.org_id));
        }
        if inner.keys.contains_key(&key.id) {
            return Err(StoreError::DuplicateKey(key.id.clone()));
        }
        inner.keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    async fn organizations(&self) -> StoreResult<Vec<Organization>> {
        Ok(self.inner.read().organizations.values().cloned().collect())
    }

    async fn organization_name(&self, org_id: i64) -> StoreResult<String> {
        self.inner
            .read()
            .organizations
            .get(&org_id)
            .map(|org| org.name.clone())
            .ok_or(StoreError::UnknownOrganization(org_id))
    }

    async fn key_belongs_to_org(&self, key_id: &str, org_id: i64) -> StoreResult<bool> {
        let inner = self.inner.read();
        let key = inner
            .keys
            .get(key_id)
            .ok_or_else(|| StoreError::UnknownKey(key_id.to_string()))?;
        Ok(key.org_id == org_id)
    }

    async fn owner_of(&self, key_id: &str) -> StoreResult<Organization> {
        let inner = self.inner.read();
        let key = inner
            .keys
            .get(key_id)
            .ok_or_else(|| StoreError::UnknownKey(key_id.to_string()))?;
        inner
            .organizations
            .get(&key.org_id)
            .cloned()
            .ok_or(StoreError::UnknownOrganization(key.org_id))
    }

    async fn license_set(&self, key_id: &str) -> StoreResult<Vec<LicenseSetItem>> {
        Ok(self
            .inner
            .read()
            .license_sets
            .get(key_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_license_set(&self, key_id: &str, items: &[LicenseSetItem]) -> StoreResult<()> {
        check_unique_features(key_id, items)?;
        let rows = items
            .iter()
            .map(|item| LicenseSetItem {
                key_id: key_id.to_string(),
                ..item.clone()
            })
            .collect();
        self.inner
            .write()
            .license_sets
            .insert(key_id.to_string(), rows);
        Ok(())
    }

    async fn expiring_within(&self, term: Duration) -> StoreResult<Vec<LicenseSetItem>> {
        let (lower, upper) = expiry_window(Utc::now(), term);
        Ok(self
            .inner
            .read()
            .license_sets
            .values()
            .flatten()
            .filter(|item| item.end > lower && item.end <= upper)
            .cloned()
            .collect())
    }

    async fn append_history(
        &self,
        org_id: i64,
        issued_at: DateTime<Utc>,
        xml: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let org_name = inner
            .organizations
            .get(&org_id)
            .map(|org| org.name.clone())
            .ok_or(StoreError::UnknownOrganization(org_id))?;
        inner.history.push(IssuanceHistoryItem {
            org_name,
            issued_at,
            xml: xml.to_string(),
        });
        Ok(())
    }

    async fn history_for(&self, org_id: i64) -> StoreResult<Vec<IssuanceHistoryItem>> {
        let inner = self.inner.read();
        let org_name = inner
            .organizations
            .get(&org_id)
            .map(|org| org.name.clone())
            .ok_or(StoreError::UnknownOrganization(org_id))?;
        Ok(inner
            .history
            .iter()
            .filter(|item| item.org_name == org_name)
            .cloned()
            .collect())
    }

    async fn features(&self) -> StoreResult<Vec<Feature>> {
        Ok(self.inner.read().features.values().cloned().collect())
    }

    async fn create_or_update_feature(
        &self,
        name: &str,
        description: &str,
        is_package: bool,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        let updated = inner.features.contains_key(name);
        inner.features.insert(
            name.to_string(),
            Feature {
                name: name.to_string(),
                is_package,
                description: description.to_string(),
            },
        );
        Ok(updated)
    }

    async fn delete_feature(&self, name: &str) -> StoreResult<()> {
        // No cascade: package memberships and license-set rows referencing
        // the name are left to dangle, same as the production schema.
        self.inner.write().features.remove(name);
        Ok(())
    }

    async fn set_package_content(&self, members: &[String], package: &str) -> StoreResult<()> {
        check_unique_members(package, members)?;
        let mut inner = self.inner.write();
        for member in members {
            if inner.features.get(member).is_some_and(|f| f.is_package) {
                return Err(StoreError::NestedPackage {
                    package: package.to_string(),
                    member: member.clone(),
                });
            }
        }
        inner
            .package_members
            .insert(package.to_string(), members.to_vec());
        Ok(())
    }

    async fn package_content(&self, package: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .inner
            .read()
            .package_members
            .get(package)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_package(&self, name: &str) -> StoreResult<bool> {
        self.inner
            .read()
            .features
            .get(name)
            .map(|f| f.is_package)
            .ok_or_else(|| StoreError::UnknownFeature(name.to_string()))
    }

    async fn catalog_entry(&self, name: &str) -> StoreResult<CatalogEntry> {
        let inner = self.inner.read();
        let feature = inner
            .features
            .get(name)
            .ok_or_else(|| StoreError::UnknownFeature(name.to_string()))?;
        Ok(if feature.is_package {
            CatalogEntry::Package {
                name: feature.name.clone(),
                description: feature.description.clone(),
                members: inner
                    .package_members
                    .get(name)
                    .cloned()
                    .unwrap_or_default(),
            }
        } else {
            CatalogEntry::Feature {
                name: feature.name.clone(),
                description: feature.description.clone(),
            }
        })
    }
}
