//! Expiry scanner: the long-running task that warns operators about
//! entitlements nearing their end date.
//!
//! Each scan queries the store for rows expiring within the configured
//! term, aggregates them per key, resolves the owning organizations, and
//! hands one rendered report to the notification collaborator. The scan
//! itself ([`ExpiryScanner::scan_once`]) is a deterministic unit; the loop
//! around it ([`ExpiryScanner::run`]) fires immediately on startup, then
//! every period, retries with a doubling backoff when the store fails, and
//! exits when the shutdown signal flips.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate};
use tokio::sync::watch;

use keyward_notify::Notifier;
use keyward_store::EntitlementStore;

use crate::EngineError;

/// Scanner settings.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Report entitlements ending within this many days.
    pub warn_days: i64,
    /// Pause between successful scans.
    pub period: StdDuration,
    /// Public base URL of the admin surface, linked in the report when set.
    pub public_url: Option<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            warn_days: 7,
            period: StdDuration::from_secs(24 * 60 * 60),
            public_url: None,
        }
    }
}

/// One report block: everything expiring on a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryReport {
    pub key_id: String,
    pub org_name: String,
    /// The earliest end date among this key's expiring rows.
    pub nearest_end: NaiveDate,
    pub features: Vec<String>,
}

/// The periodic expiry-warning task.
pub struct ExpiryScanner {
    store: Arc<dyn EntitlementStore>,
    notifier: Arc<dyn Notifier>,
    config: ScannerConfig,
}

/// First retry delay after a failed scan; doubles per consecutive failure.
const RETRY_BASE: StdDuration = StdDuration::from_secs(60);
/// Cap on the failure backoff.
const RETRY_MAX: StdDuration = StdDuration::from_secs(60 * 60);

impl ExpiryScanner {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        notifier: Arc<dyn Notifier>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Collect expiring rows grouped per key, ordered by key id.
    pub async fn collect(&self) -> Result<Vec<ExpiryReport>, EngineError> {
        let rows = self
            .store
            .expiring_within(Duration::days(self.config.warn_days))
            .await?;

        let mut grouped: BTreeMap<String, ExpiryReport> = BTreeMap::new();
        for row in rows {
            match grouped.get_mut(&row.key_id) {
                Some(report) => {
                    report.nearest_end = report.nearest_end.min(row.end);
                    report.features.push(row.feature);
                }
                None => {
                    let org = self.store.owner_of(&row.key_id).await?;
                    grouped.insert(
                        row.key_id.clone(),
                        ExpiryReport {
                            key_id: row.key_id,
                            org_name: org.name,
                            nearest_end: row.end,
                            features: vec![row.feature],
                        },
                    );
                }
            }
        }
        Ok(grouped.into_values().collect())
    }

    /// Render the warning message: one block per key, listing the affected
    /// features and the human-readable expiry date.
    pub fn render_report(&self, reports: &[ExpiryReport]) -> String {
        let days = self.config.warn_days;
        let mut out = format!(
            "Please check the following keys for features that will expire soon (in {days} days):\n"
        );
        for (index, report) in reports.iter().enumerate() {
            let _ = write!(out, "\n{index} : {}", report.key_id);
            if let Some(url) = &self.config.public_url {
                let _ = write!(out, " ({url}/v1/keys/{}/features)", report.key_id);
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "\tClient: {}", report.org_name);
            let _ = writeln!(
                out,
                "\t{} will expire in {days} day(s)",
                report.features.join(" ")
            );
            let _ = writeln!(
                out,
                "\tExpiration date: {}",
                report.nearest_end.format("%Y-%m-%d")
            );
        }
        out.push_str("\nHope that helps. Thanks!\n");
        out
    }

    /// Run one scan; send the report when anything is expiring. Returns the
    /// number of keys reported.
    pub async fn scan_once(&self) -> Result<usize, EngineError> {
        tracing::debug!(days = self.config.warn_days, "checking for expiring features");
        let reports = self.collect().await?;
        if !reports.is_empty() {
            let subject = format!(
                "Warning: some features will expire in {} days",
                self.config.warn_days
            );
            let body = self.render_report(&reports);
            self.notifier.send_message(&subject, &body).await?;
        }
        Ok(reports.len())
    }

    /// The perpetual loop: scan immediately, then every period. Errors are
    /// logged and retried with a doubling backoff; the loop ends when the
    /// shutdown signal changes or its sender goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut consecutive_failures: u32 = 0;
        loop {
            let delay = match self.scan_once().await {
                Ok(reported) => {
                    consecutive_failures = 0;
                    tracing::info!(keys = reported, "expiry scan complete");
                    self.config.period
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let backoff = RETRY_BASE
                        .saturating_mul(1 << consecutive_failures.min(6))
                        .min(RETRY_MAX);
                    tracing::error!(
                        error = %e,
                        attempt = consecutive_failures,
                        retry_in = ?backoff,
                        "expiry scan failed"
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    tracing::info!("expiry scanner stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keyward_core::model::LicenseSetItem;
    use keyward_notify::{RecordingNotifier, Sent};
    use keyward_store::MemStore;

    fn in_days(days: i64) -> NaiveDate {
        (Utc::now() + Duration::days(days)).date_naive()
    }

    fn item(key_id: &str, feature: &str, end: NaiveDate) -> LicenseSetItem {
        LicenseSetItem {
            key_id: key_id.to_string(),
            feature: feature.to_string(),
            version: 19.0,
            count: 1,
            start: in_days(-365),
            end,
            dup_group: String::new(),
        }
    }

    async fn store_with_two_expiring() -> Arc<MemStore> {
        let store = Arc::new(MemStore::with_sample_data());
        store
            .replace_license_set(
                "A1B2C3",
                &[
                    item("A1B2C3", "F3", in_days(1)),
                    item("A1B2C3", "P1", in_days(2)),
                ],
            )
            .await
            .unwrap();
        for key in ["A1B2C4", "B9X8Y7"] {
            let moved: Vec<_> = store
                .license_set(key)
                .await
                .unwrap()
                .into_iter()
                .map(|mut i| {
                    i.end = in_days(3650);
                    i
                })
                .collect();
            store.replace_license_set(key, &moved).await.unwrap();
        }
        store
    }

    fn scanner(
        store: Arc<MemStore>,
        notifier: Arc<RecordingNotifier>,
        warn_days: i64,
    ) -> ExpiryScanner {
        ExpiryScanner::new(
            store,
            notifier,
            ScannerConfig {
                warn_days,
                ..ScannerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn collect_groups_rows_per_key_with_nearest_end() {
        let store = store_with_two_expiring().await;
        let notifier = Arc::new(RecordingNotifier::new(["admin@example.com"]));
        let reports = scanner(store, notifier, 2).collect().await.unwrap();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.key_id, "A1B2C3");
        assert_eq!(report.org_name, "Geoscan Ltd");
        assert_eq!(report.nearest_end, in_days(1));
        let mut features = report.features.clone();
        features.sort();
        assert_eq!(features, vec!["F3".to_string(), "P1".to_string()]);
    }

    #[tokio::test]
    async fn shorter_term_narrows_the_report() {
        let store = store_with_two_expiring().await;
        let notifier = Arc::new(RecordingNotifier::new(["admin@example.com"]));
        let reports = scanner(store, notifier, 1).collect().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].features, vec!["F3".to_string()]);
    }

    #[tokio::test]
    async fn scan_once_sends_one_rendered_message() {
        let store = store_with_two_expiring().await;
        let notifier = Arc::new(RecordingNotifier::new(["admin@example.com"]));
        let scanner = scanner(store, notifier.clone(), 2);

        let reported = scanner.scan_once().await.unwrap();
        assert_eq!(reported, 1);

        let sent = notifier.deliveries();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Message { subject, body } => {
                assert!(subject.contains("expire in 2 days"));
                assert!(body.contains("A1B2C3"));
                assert!(body.contains("Client: Geoscan Ltd"));
                assert!(body.contains("F3"));
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scan_once_stays_silent_when_nothing_expires() {
        let store = Arc::new(MemStore::new());
        let notifier = Arc::new(RecordingNotifier::new(["admin@example.com"]));
        let scanner = scanner(store, notifier.clone(), 7);

        assert_eq!(scanner.scan_once().await.unwrap(), 0);
        assert!(notifier.deliveries().is_empty());
    }

    #[tokio::test]
    async fn report_links_the_admin_surface_when_configured() {
        let store = store_with_two_expiring().await;
        let notifier = Arc::new(RecordingNotifier::new(["admin@example.com"]));
        let scanner = ExpiryScanner::new(
            store,
            notifier,
            ScannerConfig {
                warn_days: 2,
                public_url: Some("http://keys.example:9995".to_string()),
                ..ScannerConfig::default()
            },
        );
        let reports = scanner.collect().await.unwrap();
        let body = scanner.render_report(&reports);
        assert!(body.contains("http://keys.example:9995/v1/keys/A1B2C3/features"));
    }

    #[tokio::test]
    async fn run_exits_on_shutdown_signal() {
        let store = Arc::new(MemStore::new());
        let notifier = Arc::new(RecordingNotifier::new(["admin@example.com"]));
        let scanner = scanner(store, notifier, 7);

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(scanner.run(rx));

        // Let the initial scan happen, then ask for shutdown.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        tx.send(true).expect("receiver alive");
        tokio::time::timeout(StdDuration::from_secs(5), task)
            .await
            .expect("scanner should stop promptly")
            .expect("scanner task should not panic");
    }
}
