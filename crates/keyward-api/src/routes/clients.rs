//! Client organizations and their issuance history.
//!
//! ## Endpoints
//!
//! - `GET /v1/clients` — list organizations
//! - `GET /v1/clients/:clientId/history` — issuance timestamps
//! - `GET /v1/clients/:clientId/history/:timeOfIssue` — the license file
//!   issued at that instant (RFC 3339)

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyward_core::model::Organization;

use crate::error::AppError;
use crate::routes::xml_response;
use crate::state::AppState;

/// A client organization.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDto {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub contacts: String,
    #[serde(default)]
    pub comments: String,
}

impl From<Organization> for ClientDto {
    fn from(org: Organization) -> Self {
        Self {
            id: org.id,
            name: org.name,
            contacts: org.contacts,
            comments: org.comments,
        }
    }
}

/// One issuance-history row; the file body is fetched separately by
/// timestamp.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryDto {
    pub client_name: String,
    pub issued_at: DateTime<Utc>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/clients", get(list_clients))
        .route("/v1/clients/:client_id/history", get(client_history))
        .route(
            "/v1/clients/:client_id/history/:time_of_issue",
            get(historical_license_file),
        )
}

/// GET /v1/clients — every organization.
async fn list_clients(State(state): State<AppState>) -> Result<Json<Vec<ClientDto>>, AppError> {
    let orgs = state.store.organizations().await?;
    Ok(Json(orgs.into_iter().map(ClientDto::from).collect()))
}

/// GET /v1/clients/:clientId/history — issuance timestamps, unordered.
async fn client_history(
    State(state): State<AppState>,
    Path(client_id): Path<i64>,
) -> Result<Json<Vec<HistoryEntryDto>>, AppError> {
    let history = state.store.history_for(client_id).await?;
    Ok(Json(
        history
            .into_iter()
            .map(|item| HistoryEntryDto {
                client_name: item.org_name,
                issued_at: item.issued_at,
            })
            .collect(),
    ))
}

/// GET /v1/clients/:clientId/history/:timeOfIssue — the license file issued
/// at exactly that instant; when several match, the last one wins.
async fn historical_license_file(
    State(state): State<AppState>,
    Path((client_id, time_of_issue)): Path<(i64, String)>,
) -> Result<Response, AppError> {
    let wanted = DateTime::parse_from_rfc3339(&time_of_issue)
        .map_err(|e| AppError::BadRequest(format!("invalid timestamp: {e}")))?
        .with_timezone(&Utc);

    let history = state.store.history_for(client_id).await?;
    let mut last_found = None;
    for item in history {
        if item.issued_at == wanted {
            last_found = Some(item.xml);
        }
    }
    match last_found {
        Some(xml) => Ok(xml_response(xml)),
        None => Err(AppError::NotFound("no license file".into())),
    }
}
