//! License-set prolongation and seat-count adjustment.
//!
//! Both operations follow the same shape: read the current set, recompute
//! every selected item, write the whole set back with an atomic full
//! replace. The computation itself is a pure function over the current set
//! and an instant, so tests can pin "now".
//!
//! The read and the write are two separate store calls: concurrent
//! conflicting directives on the same key race and the last replace wins.
//! Identical concurrent directives are idempotent.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};

use keyward_core::calendar::add_months;
use keyward_core::model::{LicenseSetItem, CONSOLE_FEATURE};
use keyward_core::ValidationError;
use keyward_store::EntitlementStore;

use crate::EngineError;

/// How long an entitlement is extended for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalTerm {
    /// Extend to this absolute end date.
    Until(NaiveDate),
    /// Extend to `now` plus this many whole months, evaluated once per
    /// call — every item extended by the relative form shares the same
    /// target date.
    ByMonths(u32),
}

impl RenewalTerm {
    /// Build a relative term, rejecting non-positive month counts before
    /// anything touches storage.
    pub fn by_months(months: i64) -> Result<Self, ValidationError> {
        if months <= 0 {
            return Err(ValidationError::NonPositiveMonths(months));
        }
        Ok(Self::ByMonths(months as u32))
    }

    /// The target end date for a call made at `now`.
    fn resolve(self, now: DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Until(date) => date,
            Self::ByMonths(months) => add_months(now.date_naive(), months),
        }
    }
}

/// A prolongation directive.
#[derive(Debug, Clone)]
pub struct Prolongation {
    pub term: RenewalTerm,
    /// Feature names to act on; empty means every item in the set.
    pub restrict_to: HashSet<String>,
    /// New version for selected items; ignored unless strictly positive.
    pub set_version: Option<f64>,
}

impl Prolongation {
    /// Extend every feature in the set.
    pub fn new(term: RenewalTerm) -> Self {
        Self {
            term,
            restrict_to: HashSet::new(),
            set_version: None,
        }
    }

    fn selects(&self, feature: &str) -> bool {
        self.restrict_to.is_empty() || self.restrict_to.contains(feature)
    }

    /// Compute the prolonged license set at the instant `now`.
    ///
    /// Unselected items are copied unchanged. Selected items get the target
    /// end date and, when a positive version override is present, the new
    /// version. The license-manager console feature is special: its version
    /// is pinned to 1.0 and its end is pushed a further twelve months out,
    /// so the console always outlives the rest of the set.
    pub fn apply(&self, current: &[LicenseSetItem], now: DateTime<Utc>) -> Vec<LicenseSetItem> {
        let target_end = self.term.resolve(now);
        current
            .iter()
            .map(|item| {
                let mut item = item.clone();
                if self.selects(&item.feature) {
                    item.end = target_end;
                    if let Some(version) = self.set_version {
                        if version > 0.0 {
                            item.version = version;
                        }
                    }
                    if item.feature == CONSOLE_FEATURE {
                        item.version = 1.0;
                        item.end = add_months(target_end, 12);
                    }
                }
                item
            })
            .collect()
    }
}

/// A seat-count adjustment directive. Dates and versions pass through
/// unchanged.
#[derive(Debug, Clone)]
pub struct CountAdjustment {
    /// New seat count for selected items; ignored unless strictly positive.
    pub set_count: Option<i32>,
    /// Feature names to act on; empty means every item in the set.
    pub restrict_to: HashSet<String>,
}

impl CountAdjustment {
    fn selects(&self, feature: &str) -> bool {
        self.restrict_to.is_empty() || self.restrict_to.contains(feature)
    }

    /// Compute the adjusted license set.
    pub fn apply(&self, current: &[LicenseSetItem]) -> Vec<LicenseSetItem> {
        current
            .iter()
            .map(|item| {
                let mut item = item.clone();
                if self.selects(&item.feature) {
                    if let Some(count) = self.set_count {
                        if count > 0 {
                            item.count = count;
                        }
                    }
                }
                item
            })
            .collect()
    }
}

/// Prolong the license set of a key and write it back.
pub async fn prolong(
    store: &dyn EntitlementStore,
    key_id: &str,
    directive: &Prolongation,
) -> Result<(), EngineError> {
    let current = store.license_set(key_id).await?;
    let renewed = directive.apply(&current, Utc::now());
    store.replace_license_set(key_id, &renewed).await?;
    tracing::info!(key_id, items = renewed.len(), "license set prolonged");
    Ok(())
}

/// Adjust seat counts for a key and write the set back.
pub async fn adjust_counts(
    store: &dyn EntitlementStore,
    key_id: &str,
    directive: &CountAdjustment,
) -> Result<(), EngineError> {
    let current = store.license_set(key_id).await?;
    let adjusted = directive.apply(&current);
    store.replace_license_set(key_id, &adjusted).await?;
    tracing::info!(key_id, items = adjusted.len(), "seat counts adjusted");
    Ok(())
}
