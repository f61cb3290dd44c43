//! # keyward — Binary Entry Point
//!
//! Starts the Axum administrative API and the background expiry scanner.
//! Configuration comes from the environment; with no `DATABASE_URL` the
//! service runs on the in-memory store (useful for demos and smoke tests,
//! loud about it in the log).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use keyward_api::state::{AppConfig, AppState};
use keyward_engine::{ExpiryScanner, ScannerConfig};
use keyward_notify::{LogNotifierFactory, NotifierFactory};
use keyward_store::{EntitlementStore, MemStore, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config_from_env();
    tracing::info!(?config, "effective configuration");

    // Storage: Postgres when configured, in-memory otherwise.
    let store: Arc<dyn EntitlementStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = PgStore::connect(&url).await.map_err(|e| {
                tracing::error!("database initialization failed: {e}");
                anyhow::anyhow!(e)
            })?;
            Arc::new(store)
        }
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set — using the in-memory store; data will not survive restarts"
            );
            Arc::new(MemStore::new())
        }
    };

    // Mail transport is deployment-specific; the default factory records
    // deliveries to the log.
    let notifiers: Arc<dyn NotifierFactory> = Arc::new(LogNotifierFactory);

    // Background expiry scanner with a shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scanner = ExpiryScanner::new(
        store.clone(),
        notifiers.for_recipients(&[config.admin_mail.clone()]),
        ScannerConfig {
            warn_days: config.warn_days,
            public_url: config.public_url.clone(),
            ..ScannerConfig::default()
        },
    );
    let scanner_task = tokio::spawn(scanner.run(shutdown_rx));

    let port = config.port;
    let state = AppState::new(store, notifiers, config);
    let app = keyward_api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Keyward API listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    // Stop the scanner before exiting.
    let _ = shutdown_tx.send(true);
    let _ = scanner_task.await;
    Ok(())
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn config_from_env() -> AppConfig {
    let defaults = AppConfig::default();
    AppConfig {
        port: std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port),
        public_url: std::env::var("PUBLIC_URL").ok().filter(|u| !u.is_empty()),
        encoder_path: env_string(
            "ENCODER_PATH",
            &defaults.encoder_path.to_string_lossy(),
        )
        .into(),
        secrets_path: env_string(
            "SECRETS_PATH",
            &defaults.secrets_path.to_string_lossy(),
        )
        .into(),
        encoder_timeout: std::env::var("ENCODER_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.encoder_timeout),
        admin_mail: env_string("ADMIN_MAIL", ""),
        back_mail: env_string("BACK_MAIL", ""),
        warn_days: std::env::var("EXPIRE_WARN_DAYS")
            .ok()
            .and_then(|d| d.parse().ok())
            .unwrap_or(defaults.warn_days),
        auth_token: std::env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
    }
}
