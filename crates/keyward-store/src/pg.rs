//! Postgres entitlement store.
//!
//! Every multi-row mutation (`create_key`, `replace_license_set`,
//! `set_package_content`, `append_history`) runs in its own transaction —
//! the all-or-nothing contract the rest of the system relies on. There is
//! no cross-call locking: two overlapping replaces for the same key resolve
//! to whichever transaction commits last.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use keyward_core::calendar::expiry_window;
use keyward_core::model::{
    CatalogEntry, Feature, HardwareKey, IssuanceHistoryItem, LicenseSetItem, Organization,
};

use crate::{
    check_unique_features, check_unique_members, EntitlementStore, StoreError, StoreResult,
};

/// Schema bootstrap statements, applied idempotently on startup.
const SCHEMA: &str = include_str!("schema.sql");

/// Postgres-backed implementation of [`EntitlementStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and apply the schema.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(8).connect(url).await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Apply the schema bootstrap statements.
    pub async fn init_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("entitlement schema ready");
        Ok(())
    }

    /// The underlying pool, for callers that need ad-hoc queries (tests,
    /// seed scripts).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct LicenseRow {
    key_id: String,
    feature: String,
    version: f64,
    count: i32,
    start_date: NaiveDate,
    end_date: NaiveDate,
    dup_group: String,
}

impl From<LicenseRow> for LicenseSetItem {
    fn from(row: LicenseRow) -> Self {
        Self {
            key_id: row.key_id,
            feature: row.feature,
            version: row.version,
            count: row.count,
            start: row.start_date,
            end: row.end_date,
            dup_group: row.dup_group,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: i64,
    name: String,
    contacts: String,
    comments: String,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            contacts: row.contacts,
            comments: row.comments,
        }
    }
}

const LICENSE_COLUMNS: &str =
    "key_id, feature, version, count, start_date, end_date, dup_group";

#[async_trait]
impl EntitlementStore for PgStore {
    async fn keys(&self) -> StoreResult<Vec<HardwareKey>> {
        let rows = sqlx::query("SELECT id, org_id, comments FROM hardware_keys ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| HardwareKey {
                id: row.get("id"),
                org_id: row.get("org_id"),
                comments: row.get("comments"),
            })
            .collect())
    }

    async fn create_key(&self, key: &HardwareKey) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let org_exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM organizations WHERE id = $1")
                .bind(key.org_id)
                .fetch_optional(&mut *tx)
                .await?;
        if org_exists.is_none() {
            return Err(StoreError::UnknownOrganization(key.org_id));
        }
        let taken: Option<String> = sqlx::query_scalar("SELECT id FROM hardware_keys WHERE id = $1")
            .bind(&key.id)
            .fetch_optional(&mut *tx)
            .await?;
        if taken.is_some() {
            return Err(StoreError::DuplicateKey(key.id.clone()));
        }
        sqlx::query("INSERT INTO hardware_keys (id, org_id, comments) VALUES ($1, $2, $3)")
            .bind(&key.id)
            .bind(key.org_id)
            .bind(&key.comments)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn organizations(&self) -> StoreResult<Vec<Organization>> {
        let rows = sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, contacts, comments FROM organizations ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Organization::from).collect())
    }

    async fn organization_name(&self, org_id: i64) -> StoreResult<String> {
        sqlx::query_scalar("SELECT name FROM organizations WHERE id = $1")
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::UnknownOrganization(org_id))
    }

    async fn key_belongs_to_org(&self, key_id: &str, org_id: i64) -> StoreResult<bool> {
        let owner: Option<i64> = sqlx::query_scalar("SELECT org_id FROM hardware_keys WHERE id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;
        match owner {
            Some(owner) => Ok(owner == org_id),
            None => Err(StoreError::UnknownKey(key_id.to_string())),
        }
    }

    async fn owner_of(&self, key_id: &str) -> StoreResult<Organization> {
        let org_id: Option<i64> = sqlx::query_scalar("SELECT org_id FROM hardware_keys WHERE id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;
        let org_id = org_id.ok_or_else(|| StoreError::UnknownKey(key_id.to_string()))?;
        let row = sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, contacts, comments FROM organizations WHERE id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Organization::from)
            .ok_or(StoreError::UnknownOrganization(org_id))
    }

    async fn license_set(&self, key_id: &str) -> StoreResult<Vec<LicenseSetItem>> {
        let rows = sqlx::query_as::<_, LicenseRow>(&format!(
            "SELECT {LICENSE_COLUMNS} FROM license_sets WHERE key_id = $1 ORDER BY feature"
        ))
        .bind(key_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LicenseSetItem::from).collect())
    }

    async fn replace_license_set(&self, key_id: &str, items: &[LicenseSetItem]) -> StoreResult<()> {
        check_unique_features(key_id, items)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM license_sets WHERE key_id = $1")
            .bind(key_id)
            .execute(&mut *tx)
            .await?;
        for item in items {
            sqlx::query(
                "INSERT INTO license_sets (key_id, feature, version, count, start_date, end_date, dup_group)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(key_id)
            .bind(&item.feature)
            .bind(item.version)
            .bind(item.count)
            .bind(item.start)
            .bind(item.end)
            .bind(&item.dup_group)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn expiring_within(&self, term: Duration) -> StoreResult<Vec<LicenseSetItem>> {
        let (lower, upper) = expiry_window(Utc::now(), term);
        let rows = sqlx::query_as::<_, LicenseRow>(&format!(
            "SELECT {LICENSE_COLUMNS} FROM license_sets WHERE end_date > $1 AND end_date <= $2"
        ))
        .bind(lower)
        .bind(upper)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LicenseSetItem::from).collect())
    }

    async fn append_history(
        &self,
        org_id: i64,
        issued_at: DateTime<Utc>,
        xml: &str,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let org_name: Option<String> = sqlx::query_scalar("SELECT name FROM organizations WHERE id = $1")
            .bind(org_id)
            .fetch_optional(&mut *tx)
            .await?;
        let org_name = org_name.ok_or(StoreError::UnknownOrganization(org_id))?;
        sqlx::query("INSERT INTO issuance_history (org_name, issued_at, xml) VALUES ($1, $2, $3)")
            .bind(&org_name)
            .bind(issued_at)
            .bind(xml)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn history_for(&self, org_id: i64) -> StoreResult<Vec<IssuanceHistoryItem>> {
        let org_name = self.organization_name(org_id).await?;
        let rows = sqlx::query(
            "SELECT org_name, issued_at, xml FROM issuance_history WHERE org_name = $1",
        )
        .bind(&org_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| IssuanceHistoryItem {
                org_name: row.get("org_name"),
                issued_at: row.get("issued_at"),
                xml: row.get("xml"),
            })
            .collect())
    }

    async fn features(&self) -> StoreResult<Vec<Feature>> {
        let rows = sqlx::query("SELECT name, is_package, description FROM features ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Feature {
                name: row.get("name"),
                is_package: row.get("is_package"),
                description: row.get("description"),
            })
            .collect())
    }

    async fn create_or_update_feature(
        &self,
        name: &str,
        description: &str,
        is_package: bool,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let existing: Option<String> = sqlx::query_scalar("SELECT name FROM features WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
        let updated = existing.is_some();
        if updated {
            sqlx::query("UPDATE features SET is_package = $2, description = $3 WHERE name = $1")
                .bind(name)
                .bind(is_package)
                .bind(description)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("INSERT INTO features (name, is_package, description) VALUES ($1, $2, $3)")
                .bind(name)
                .bind(is_package)
                .bind(description)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_feature(&self, name: &str) -> StoreResult<()> {
        // No cascade into package_members or license_sets.
        sqlx::query("DELETE FROM features WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_package_content(&self, members: &[String], package: &str) -> StoreResult<()> {
        check_unique_members(package, members)?;
        let nested: Option<String> = sqlx::query_scalar(
            "SELECT name FROM features WHERE name = ANY($1) AND is_package LIMIT 1",
        )
        .bind(members)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(member) = nested {
            return Err(StoreError::NestedPackage {
                package: package.to_string(),
                member,
            });
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM package_members WHERE package = $1")
            .bind(package)
            .execute(&mut *tx)
            .await?;
        for member in members {
            sqlx::query("INSERT INTO package_members (package, member) VALUES ($1, $2)")
                .bind(package)
                .bind(member)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn package_content(&self, package: &str) -> StoreResult<Vec<String>> {
        let members: Vec<String> = sqlx::query_scalar(
            "SELECT member FROM package_members WHERE package = $1 ORDER BY member",
        )
        .bind(package)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    async fn is_package(&self, name: &str) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT is_package FROM features WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::UnknownFeature(name.to_string()))
    }

    async fn catalog_entry(&self, name: &str) -> StoreResult<CatalogEntry> {
        let row = sqlx::query("SELECT name, is_package, description FROM features WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::UnknownFeature(name.to_string()))?;
        let is_package: bool = row.get("is_package");
        let description: String = row.get("description");
        Ok(if is_package {
            CatalogEntry::Package {
                name: name.to_string(),
                description,
                members: self.package_content(name).await?,
            }
        } else {
            CatalogEntry::Feature {
                name: name.to_string(),
                description,
            }
        })
    }
}
