//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers via
//! the `State` extractor. Holds the entitlement store, the issuance
//! pipeline, and the notification collaborator behind trait objects so the
//! binary decides the concrete implementations (Postgres vs in-memory,
//! encoder vs test double, mail vs log-only).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use keyward_engine::{EncoderSigner, LicenseIssuer};
use keyward_notify::NotifierFactory;
use keyward_store::EntitlementStore;

/// Application configuration, assembled from the environment in `main`.
///
/// Custom `Debug` redacts the auth token so startup logging cannot leak
/// credentials.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Public base URL of this server, used in notification links.
    pub public_url: Option<String>,
    /// Path to the external encoder executable.
    pub encoder_path: PathBuf,
    /// Path to the secret key material handed to the encoder.
    pub secrets_path: PathBuf,
    /// Budget for a single encoder run.
    pub encoder_timeout: Duration,
    /// Operator address for expiry warnings.
    pub admin_mail: String,
    /// Second address copied on license-file deliveries; may be empty.
    pub back_mail: String,
    /// Report entitlements expiring within this many days.
    pub warn_days: i64,
    /// Static bearer token; `None` disables authentication.
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("public_url", &self.public_url)
            .field("encoder_path", &self.encoder_path)
            .field("secrets_path", &self.secrets_path)
            .field("encoder_timeout", &self.encoder_timeout)
            .field("admin_mail", &self.admin_mail)
            .field("back_mail", &self.back_mail)
            .field("warn_days", &self.warn_days)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 9995,
            public_url: None,
            encoder_path: PathBuf::from("/usr/local/bin/lmgen"),
            secrets_path: PathBuf::from("/etc/keyward/secrets"),
            encoder_timeout: Duration::from_secs(30),
            admin_mail: String::new(),
            back_mail: String::new(),
            warn_days: 7,
            auth_token: None,
        }
    }
}

/// Shared application state accessible to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntitlementStore>,
    pub issuer: Arc<LicenseIssuer>,
    pub notifiers: Arc<dyn NotifierFactory>,
    pub config: AppConfig,
}

impl AppState {
    /// Assemble state around a store and notifier, wiring the issuance
    /// pipeline to the configured encoder.
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        notifiers: Arc<dyn NotifierFactory>,
        config: AppConfig,
    ) -> Self {
        let signer = Arc::new(EncoderSigner::new(
            config.encoder_path.clone(),
            config.encoder_timeout,
        ));
        let issuer = Arc::new(LicenseIssuer::new(
            store.clone(),
            signer,
            config.secrets_path.clone(),
        ));
        Self {
            store,
            issuer,
            notifiers,
            config,
        }
    }

    /// Assemble state with an injected issuer, for tests that replace the
    /// external encoder with a double.
    pub fn with_issuer(
        store: Arc<dyn EntitlementStore>,
        issuer: Arc<LicenseIssuer>,
        notifiers: Arc<dyn NotifierFactory>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            issuer,
            notifiers,
            config,
        }
    }
}
