//! License-set maintenance: read, full replace, prolongation, and seat
//! counts.
//!
//! ## Endpoints
//!
//! - `GET  /v1/keys/:keyId/features` — the current license set
//! - `PUT  /v1/keys/:keyId/features` — atomic full replace
//! - `POST /v1/keys/:keyId/prolong?till=|byMonths=&restrictTo=&setVersion=`
//! - `POST /v1/keys/:keyId/count?setCount=&restrictTo=`

use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use keyward_core::model::LicenseSetItem;
use keyward_core::ValidationError;
use keyward_engine::renew::{adjust_counts, prolong, CountAdjustment, Prolongation, RenewalTerm};

use crate::error::AppError;
use crate::state::AppState;

/// One licensed feature with its seat count and validity window
/// (ISO dates on the API surface; the wire format is the codec's concern).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicensedFeatureDto {
    pub name: String,
    pub version: f64,
    pub count: i32,
    #[serde(default)]
    pub dup_group: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl LicensedFeatureDto {
    fn from_item(item: LicenseSetItem) -> Self {
        Self {
            name: item.feature,
            version: item.version,
            count: item.count,
            dup_group: item.dup_group,
            start: item.start,
            end: item.end,
        }
    }

    fn into_item(self, key_id: &str) -> LicenseSetItem {
        LicenseSetItem {
            key_id: key_id.to_string(),
            feature: self.name,
            version: self.version,
            count: self.count,
            start: self.start,
            end: self.end,
            dup_group: self.dup_group,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProlongQuery {
    /// Absolute target end date (`YYYY-MM-DD`). Takes precedence when it
    /// parses; otherwise `byMonths` must be a positive integer.
    pub till: Option<String>,
    pub by_months: Option<i64>,
    /// Comma-separated feature names; empty means the whole set.
    pub restrict_to: Option<String>,
    pub set_version: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountQuery {
    pub set_count: Option<i32>,
    pub restrict_to: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/keys/:key_id/features",
            get(get_license_set).put(replace_license_set),
        )
        .route("/v1/keys/:key_id/prolong", post(prolong_license_set))
        .route("/v1/keys/:key_id/count", post(change_counts))
}

fn restriction_set(raw: Option<&str>) -> HashSet<String> {
    raw.unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve the renewal term from the query: an absolute date when `till`
/// parses, otherwise a positive month count. Rejected before any storage
/// touch.
fn resolve_term(query: &ProlongQuery) -> Result<RenewalTerm, AppError> {
    if let Some(till) = query.till.as_deref() {
        if let Ok(date) = NaiveDate::parse_from_str(till, "%Y-%m-%d") {
            return Ok(RenewalTerm::Until(date));
        }
    }
    match query.by_months {
        Some(months) => {
            RenewalTerm::by_months(months).map_err(|e| AppError::Validation(e.to_string()))
        }
        None => Err(AppError::Validation(
            ValidationError::MissingRenewalTerm.to_string(),
        )),
    }
}

/// GET /v1/keys/:keyId/features — current set; empty for an unknown key.
async fn get_license_set(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
) -> Result<Json<Vec<LicensedFeatureDto>>, AppError> {
    let set = state.store.license_set(&key_id).await?;
    Ok(Json(
        set.into_iter().map(LicensedFeatureDto::from_item).collect(),
    ))
}

/// PUT /v1/keys/:keyId/features — atomic full replace of the set.
async fn replace_license_set(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
    Json(items): Json<Vec<LicensedFeatureDto>>,
) -> Result<StatusCode, AppError> {
    let items: Vec<LicenseSetItem> = items
        .into_iter()
        .map(|dto| dto.into_item(&key_id))
        .collect();
    state.store.replace_license_set(&key_id, &items).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /v1/keys/:keyId/prolong — extend validity windows.
async fn prolong_license_set(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
    Query(query): Query<ProlongQuery>,
) -> Result<StatusCode, AppError> {
    let directive = Prolongation {
        term: resolve_term(&query)?,
        restrict_to: restriction_set(query.restrict_to.as_deref()),
        set_version: query.set_version,
    };
    prolong(state.store.as_ref(), &key_id, &directive).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /v1/keys/:keyId/count — adjust seat counts, dates untouched.
async fn change_counts(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
    Query(query): Query<CountQuery>,
) -> Result<StatusCode, AppError> {
    let directive = CountAdjustment {
        set_count: query.set_count,
        restrict_to: restriction_set(query.restrict_to.as_deref()),
    };
    adjust_counts(state.store.as_ref(), &key_id, &directive).await?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restriction_set_splits_and_skips_empties() {
        assert!(restriction_set(None).is_empty());
        assert!(restriction_set(Some("")).is_empty());
        let set = restriction_set(Some("F1,,F2"));
        assert_eq!(set.len(), 2);
        assert!(set.contains("F1") && set.contains("F2"));
    }

    #[test]
    fn term_prefers_a_parsable_till_date() {
        let query = ProlongQuery {
            till: Some("2027-03-15".to_string()),
            by_months: Some(4),
            restrict_to: None,
            set_version: None,
        };
        assert_eq!(
            resolve_term(&query).unwrap(),
            RenewalTerm::Until(NaiveDate::from_ymd_opt(2027, 3, 15).unwrap())
        );
    }

    #[test]
    fn term_falls_back_to_months_when_till_is_unparsable() {
        let query = ProlongQuery {
            till: Some("not-a-date".to_string()),
            by_months: Some(4),
            restrict_to: None,
            set_version: None,
        };
        assert_eq!(resolve_term(&query).unwrap(), RenewalTerm::ByMonths(4));
    }

    #[test]
    fn term_rejects_missing_and_non_positive_targets() {
        let none = ProlongQuery {
            till: None,
            by_months: None,
            restrict_to: None,
            set_version: None,
        };
        assert!(resolve_term(&none).is_err());

        let negative = ProlongQuery {
            till: None,
            by_months: Some(-2),
            restrict_to: None,
            set_version: None,
        };
        assert!(resolve_term(&negative).is_err());
    }
}
