//! # keyward-api — Administrative Surface
//!
//! Axum services over the entitlement engine. The API is the interface
//! operators and provisioning scripts use to register keys, maintain the
//! catalog and license sets, prolong entitlements, and issue signed
//! license files.
//!
//! ## API Surface
//!
//! | Prefix                                  | Module                | Domain            |
//! |-----------------------------------------|-----------------------|-------------------|
//! | `/v1/keys`, `/v1/keys/:keyId`           | [`routes::keys`]      | key registry      |
//! | `/v1/keys/:keyId/features` (+ prolong, count) | [`routes::licsets`] | license sets  |
//! | `/v1/features`, `/v1/packages/:name`    | [`routes::catalog`]   | catalog           |
//! | `/v1/clients`, `/v1/clients/:id/history` | [`routes::clients`]  | clients + history |
//! | `/v1/clients/:clientId/licfile/:keyId`  | [`routes::licfiles`]  | issuance          |
//!
//! Health probes (`/health/*`) are mounted outside the auth middleware so
//! they stay reachable without credentials.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use axum::middleware::from_fn;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };

    let api = Router::new()
        .merge(routes::keys::router())
        .merge(routes::licsets::router())
        .merge(routes::catalog::router())
        .merge(routes::clients::router())
        .merge(routes::licfiles::router())
        .layer(from_fn(auth::auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::Extension(auth_config))
        .with_state(state);

    let health = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    Router::new().merge(health).merge(api)
}

/// Liveness probe — 200 whenever the process runs.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe — 200 when the application can serve requests.
async fn readiness() -> &'static str {
    "ready"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use keyward_engine::{LicenseIssuer, LicenseSigner, SignError};
    use keyward_notify::{RecordingNotifierFactory, Sent};
    use keyward_store::{EntitlementStore, MemStore};

    use crate::state::AppConfig;

    /// Encoder double: prepends a marker instead of spawning a process.
    struct StaticSigner;

    #[async_trait]
    impl LicenseSigner for StaticSigner {
        async fn sign(&self, xml: &[u8], _secrets: &Path) -> Result<Vec<u8>, SignError> {
            let mut out = b"<!-- signed -->\n".to_vec();
            out.extend_from_slice(xml);
            Ok(out)
        }
    }

    struct TestHarness {
        app: Router,
        store: Arc<MemStore>,
        notifiers: Arc<RecordingNotifierFactory>,
    }

    fn harness() -> TestHarness {
        let store = Arc::new(MemStore::with_sample_data());
        let notifiers = Arc::new(RecordingNotifierFactory::new());
        let issuer = Arc::new(LicenseIssuer::new(
            store.clone(),
            Arc::new(StaticSigner),
            "/etc/keyward/secrets",
        ));
        let state = AppState::with_issuer(
            store.clone(),
            issuer,
            notifiers.clone(),
            AppConfig {
                back_mail: "archive@keyward.example".to_string(),
                ..AppConfig::default()
            },
        );
        TestHarness {
            app: app(state),
            store,
            notifiers,
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn send(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_probes_respond() {
        let h = harness();
        for uri in ["/health/liveness", "/health/readiness"] {
            let response = h.app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn key_registration_flow() {
        let h = harness();

        // Unknown organization.
        let response = h
            .app
            .clone()
            .oneshot(send(
                "POST",
                "/v1/keys/K9",
                Some(serde_json::json!({"orgId": 999})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Valid registration.
        let response = h
            .app
            .clone()
            .oneshot(send(
                "POST",
                "/v1/keys/K9",
                Some(serde_json::json!({"orgId": 1, "comments": "spare"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // Second registration of the same id conflicts.
        let response = h
            .app
            .clone()
            .oneshot(send(
                "POST",
                "/v1/keys/K9",
                Some(serde_json::json!({"orgId": 1})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = h.app.clone().oneshot(get("/v1/keys")).await.unwrap();
        let keys = body_json(response).await;
        assert!(keys.as_array().unwrap().iter().any(|k| k["id"] == "K9"));
    }

    #[tokio::test]
    async fn license_set_replace_rejects_duplicates() {
        let h = harness();
        let body = serde_json::json!([
            {"name": "F1", "version": 19.0, "count": 5, "start": "2026-01-01", "end": "2027-01-01"},
            {"name": "F1", "version": 19.0, "count": 5, "start": "2026-01-01", "end": "2027-01-01"}
        ]);
        let response = h
            .app
            .clone()
            .oneshot(send("PUT", "/v1/keys/A1B2C3/features", Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // The prior set is still there.
        let set = h.store.license_set("A1B2C3").await.unwrap();
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn prolong_validates_then_extends() {
        let h = harness();

        let response = h
            .app
            .clone()
            .oneshot(send("POST", "/v1/keys/A1B2C3/prolong?byMonths=0", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = h
            .app
            .clone()
            .oneshot(send("POST", "/v1/keys/A1B2C3/prolong?till=2030-01-01", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = h
            .app
            .clone()
            .oneshot(get("/v1/keys/A1B2C3/features"))
            .await
            .unwrap();
        let set = body_json(response).await;
        for item in set.as_array().unwrap() {
            assert_eq!(item["end"], "2030-01-01");
        }
    }

    #[tokio::test]
    async fn count_adjustment_restricted_to_one_feature() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(send(
                "POST",
                "/v1/keys/A1B2C3/count?setCount=42&restrictTo=F3",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let set = h.store.license_set("A1B2C3").await.unwrap();
        for item in set {
            let expected = if item.feature == "F3" { 42 } else { 10 };
            assert_eq!(item.count, expected, "feature {}", item.feature);
        }
    }

    #[tokio::test]
    async fn package_endpoints_distinguish_unknown_leaf_and_conflict() {
        let h = harness();

        let response = h.app.clone().oneshot(get("/v1/packages/NOPE")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = h.app.clone().oneshot(get("/v1/packages/F1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = h
            .app
            .clone()
            .oneshot(send(
                "PUT",
                "/v1/packages/P1",
                Some(serde_json::json!(["F1", "F4", "F4"])),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Prior membership intact.
        let response = h.app.clone().oneshot(get("/v1/packages/P1")).await.unwrap();
        let pkg = body_json(response).await;
        assert_eq!(pkg["features"], serde_json::json!(["F1", "F2"]));
    }

    #[tokio::test]
    async fn feature_upsert_reports_created_then_ok() {
        let h = harness();
        let body = serde_json::json!({"name": "F9", "description": "new", "isPackage": false});
        let response = h
            .app
            .clone()
            .oneshot(send("PUT", "/v1/features/F9", Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = h
            .app
            .clone()
            .oneshot(send("PUT", "/v1/features/F9", Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = h
            .app
            .clone()
            .oneshot(send(
                "PUT",
                "/v1/features/OTHER",
                Some(serde_json::json!({"name": "F9"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn issuance_returns_xml_and_records_history() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(send("POST", "/v1/clients/1/licfile/A1B2C3", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("application/xml"));
        let xml = body_text(response).await;
        assert!(xml.starts_with("<!-- signed -->"));
        assert!(xml.contains("id=\"A1B2C3\""));

        // The artifact is in the history and retrievable by timestamp.
        let response = h
            .app
            .clone()
            .oneshot(get("/v1/clients/1/history"))
            .await
            .unwrap();
        let history = body_json(response).await;
        let entries = history.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        let issued_at = entries[0]["issuedAt"].as_str().unwrap().to_string();

        let response = h
            .app
            .clone()
            .oneshot(get(&format!("/v1/clients/1/history/{issued_at}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, xml);

        let response = h
            .app
            .clone()
            .oneshot(get("/v1/clients/1/history/not-a-timestamp"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn issuance_rejects_foreign_keys() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(send("POST", "/v1/clients/2/licfile/A1B2C3", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(h.store.history_for(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn issuance_with_mail_to_sends_the_file() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(send(
                "POST",
                "/v1/clients/1/licfile/A1B2C3?mailTo=ops@geoscan.example",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(
            h.notifiers.requested_recipients(),
            vec![vec![
                "ops@geoscan.example".to_string(),
                "archive@keyward.example".to_string()
            ]]
        );
        let sent = h.notifiers.recorder().deliveries();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::File { name, body } => {
                assert_eq!(name, "license_A1B2C3_Geoscan_Ltd.xml");
                assert!(body.starts_with(b"<!-- signed -->"));
            }
            other => panic!("expected file delivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_token_guards_api_but_not_health() {
        let store = Arc::new(MemStore::with_sample_data());
        let notifiers = Arc::new(RecordingNotifierFactory::new());
        let issuer = Arc::new(LicenseIssuer::new(
            store.clone(),
            Arc::new(StaticSigner),
            "/etc/keyward/secrets",
        ));
        let state = AppState::with_issuer(
            store,
            issuer,
            notifiers,
            AppConfig {
                auth_token: Some("sesame".to_string()),
                ..AppConfig::default()
            },
        );
        let router = app(state);

        let response = router.clone().oneshot(get("/v1/keys")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .clone()
            .oneshot(get("/health/liveness"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .uri("/v1/keys")
            .header("Authorization", "Bearer sesame")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
