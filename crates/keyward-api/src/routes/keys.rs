//! Hardware key registration.
//!
//! ## Endpoints
//!
//! - `GET  /v1/keys?clientId=` — list registered keys, optionally one
//!   organization's
//! - `POST /v1/keys/:keyId` — register a new key for an organization

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use keyward_core::model::HardwareKey;

use crate::error::AppError;
use crate::state::AppState;

/// A registered hardware key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDto {
    pub id: String,
    pub org_id: i64,
    #[serde(default)]
    pub comments: String,
}

impl From<HardwareKey> for KeyDto {
    fn from(key: HardwareKey) -> Self {
        Self {
            id: key.id,
            org_id: key.org_id,
            comments: key.comments,
        }
    }
}

/// Request body for key registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub org_id: i64,
    #[serde(default)]
    pub comments: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListKeysQuery {
    /// Restrict the listing to one organization's keys.
    pub client_id: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/keys", get(list_keys))
        .route("/v1/keys/:key_id", post(create_key))
}

/// GET /v1/keys — every registered key, or one organization's.
async fn list_keys(
    State(state): State<AppState>,
    Query(query): Query<ListKeysQuery>,
) -> Result<Json<Vec<KeyDto>>, AppError> {
    let keys = state.store.keys().await?;
    Ok(Json(
        keys.into_iter()
            .filter(|key| query.client_id.map_or(true, |org_id| key.org_id == org_id))
            .map(KeyDto::from)
            .collect(),
    ))
}

/// POST /v1/keys/:keyId — register a key. 404 for an unknown organization,
/// 409 when the key id is already taken.
async fn create_key(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<KeyDto>), AppError> {
    let key = HardwareKey {
        id: key_id,
        org_id: req.org_id,
        comments: req.comments,
    };
    state.store.create_key(&key).await?;
    Ok((StatusCode::CREATED, Json(KeyDto::from(key))))
}
