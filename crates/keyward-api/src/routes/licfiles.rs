//! License-file issuance.
//!
//! ## Endpoints
//!
//! - `POST /v1/clients/:clientId/licfile/:keyId?mailTo=` — generate the
//!   wire document for the key's current license set, sign it through the
//!   external encoder, record it in issuance history, and return it.
//!   With `mailTo`, the signed file is also mailed out; delivery failures
//!   are logged, not surfaced — the artifact was already issued.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::xml_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueQuery {
    pub mail_to: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/v1/clients/:client_id/licfile/:key_id",
        post(make_license_file),
    )
}

/// POST /v1/clients/:clientId/licfile/:keyId — issue a signed license file.
async fn make_license_file(
    State(state): State<AppState>,
    Path((client_id, key_id)): Path<(i64, String)>,
    Query(query): Query<IssueQuery>,
) -> Result<Response, AppError> {
    let signed = state.issuer.issue(client_id, &key_id).await?;

    if let Some(mail_to) = query.mail_to.filter(|m| !m.is_empty()) {
        mail_out(&state, client_id, &key_id, &mail_to, signed.as_bytes()).await;
    }

    Ok(xml_response(signed))
}

/// Mail the signed file to the requested address plus the configured copy
/// address. Failures are logged; the issuance itself already succeeded.
async fn mail_out(state: &AppState, client_id: i64, key_id: &str, mail_to: &str, file: &[u8]) {
    let org_name = match state.store.organization_name(client_id).await {
        Ok(name) => name,
        Err(e) => {
            tracing::error!(error = %e, client_id, "cannot resolve client name for mail-out");
            return;
        }
    };
    tracing::info!(mail_to, key_id, "mailing license file");
    let notifier = state
        .notifiers
        .for_recipients(&[mail_to.to_string(), state.config.back_mail.clone()]);
    if let Err(e) = notifier.send_file(&org_name, key_id, file).await {
        tracing::error!(error = %e, mail_to, "license file delivery failed");
    }
}
