//! Feature/package catalog maintenance.
//!
//! ## Endpoints
//!
//! - `GET    /v1/features` — full catalog
//! - `PUT    /v1/features/:featureName` — create or update a catalog row
//! - `DELETE /v1/features/:featureName` — delete a catalog row
//! - `GET    /v1/packages/:packageName` — package members
//! - `PUT    /v1/packages/:packageName` — atomic full replace of members

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use keyward_core::model::Feature;

use crate::error::AppError;
use crate::state::AppState;

/// A catalog row.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDto {
    pub name: String,
    #[serde(default)]
    pub is_package: bool,
    #[serde(default)]
    pub description: String,
}

impl From<Feature> for FeatureDto {
    fn from(feature: Feature) -> Self {
        Self {
            name: feature.name,
            is_package: feature.is_package,
            description: feature.description,
        }
    }
}

/// A package with its resolved member names.
#[derive(Debug, Serialize, Deserialize)]
pub struct PackageDto {
    pub name: String,
    pub features: Vec<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/features", get(list_features))
        .route(
            "/v1/features/:feature_name",
            axum::routing::put(upsert_feature).delete(delete_feature),
        )
        .route(
            "/v1/packages/:package_name",
            get(package_content).put(replace_package_content),
        )
}

/// GET /v1/features — the full catalog.
async fn list_features(State(state): State<AppState>) -> Result<Json<Vec<FeatureDto>>, AppError> {
    let features = state.store.features().await?;
    Ok(Json(features.into_iter().map(FeatureDto::from).collect()))
}

/// PUT /v1/features/:featureName — upsert. 200 on update, 201 on insert.
async fn upsert_feature(
    State(state): State<AppState>,
    Path(feature_name): Path<String>,
    Json(feature): Json<FeatureDto>,
) -> Result<(StatusCode, Json<FeatureDto>), AppError> {
    if feature_name != feature.name {
        return Err(AppError::BadRequest("inconsistent feature names".into()));
    }
    let updated = state
        .store
        .create_or_update_feature(&feature.name, &feature.description, feature.is_package)
        .await?;
    let status = if updated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(feature)))
}

/// DELETE /v1/features/:featureName — remove the catalog row (no cascade).
async fn delete_feature(
    State(state): State<AppState>,
    Path(feature_name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.delete_feature(&feature_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/packages/:packageName — member names. 404 for an unknown name,
/// 400 when the name is a leaf feature.
async fn package_content(
    State(state): State<AppState>,
    Path(package_name): Path<String>,
) -> Result<Json<PackageDto>, AppError> {
    if !state.store.is_package(&package_name).await? {
        return Err(AppError::BadRequest(format!(
            "{package_name} is not a package"
        )));
    }
    let features = state.store.package_content(&package_name).await?;
    Ok(Json(PackageDto {
        name: package_name,
        features,
    }))
}

/// PUT /v1/packages/:packageName — atomic full replace of members.
async fn replace_package_content(
    State(state): State<AppState>,
    Path(package_name): Path<String>,
    Json(members): Json<Vec<String>>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .set_package_content(&members, &package_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
