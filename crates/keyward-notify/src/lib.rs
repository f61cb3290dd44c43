//! # keyward-notify — Notification Collaborator
//!
//! The expiry scanner and the issuance pipeline both hand finished messages
//! to a [`Notifier`]. This crate owns the collaborator interface and the
//! message-assembly rules (subject lines, attachment file names); the
//! delivery transport itself is injected by the deployment and out of scope
//! here.
//!
//! Two implementations ship: [`LogNotifier`], which records deliveries to
//! the tracing log (the default when no mail transport is configured), and
//! [`RecordingNotifier`], a capture double for tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

/// Delivery failure reported by a notification transport.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// The transport rejected or failed to deliver the message.
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// A notification sink with a fixed recipient list.
///
/// Implementations decide the transport; callers only choose between a
/// free-form message and a license-file attachment.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// The addresses this notifier delivers to.
    fn recipients(&self) -> &[String];

    /// Send a free-form message.
    async fn send_message(&self, subject: &str, body: &str) -> Result<(), NotifyError>;

    /// Send a license file as an attachment. The subject and attachment
    /// name are derived from the client name and key id.
    async fn send_file(
        &self,
        org_name: &str,
        key_id: &str,
        file_body: &[u8],
    ) -> Result<(), NotifyError>;
}

/// Builds notifiers for a given recipient list.
///
/// The expiry scanner keeps one notifier for the operator addresses;
/// license-file mail-outs build a fresh one per request because the
/// destination address arrives with the request.
pub trait NotifierFactory: Send + Sync {
    fn for_recipients(&self, addresses: &[String]) -> Arc<dyn Notifier>;
}

/// Factory for [`LogNotifier`]s, the default when no transport is
/// configured.
pub struct LogNotifierFactory;

impl NotifierFactory for LogNotifierFactory {
    fn for_recipients(&self, addresses: &[String]) -> Arc<dyn Notifier> {
        Arc::new(LogNotifier::new(addresses.iter().cloned()))
    }
}

/// Subject line for a license-file delivery.
pub fn file_subject(org_name: &str, key_id: &str) -> String {
    format!("License file key {key_id} for {org_name}")
}

/// Attachment file name for a license file: the org name reduced to a safe
/// ASCII token so the name survives every mail client and file system.
pub fn attachment_filename(org_name: &str, key_id: &str) -> String {
    let safe: String = org_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("license_{key_id}_{safe}.xml")
}

/// Collect a recipient list, silently skipping empty addresses.
pub fn collect_recipients<I, S>(addresses: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    addresses
        .into_iter()
        .map(Into::into)
        .filter(|a: &String| !a.is_empty())
        .collect()
}

/// Notifier that records deliveries to the tracing log instead of sending
/// them anywhere. Used when no mail transport is configured, so issuance
/// and scanning stay observable without a mail server.
pub struct LogNotifier {
    recipients: Vec<String>,
}

impl LogNotifier {
    /// Create a log-only notifier for the given addresses; empty addresses
    /// are skipped.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipients: collect_recipients(addresses),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn recipients(&self) -> &[String] {
        &self.recipients
    }

    async fn send_message(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!(
            recipients = ?self.recipients,
            subject,
            body_len = body.len(),
            "notification (log only, no transport configured)"
        );
        Ok(())
    }

    async fn send_file(
        &self,
        org_name: &str,
        key_id: &str,
        file_body: &[u8],
    ) -> Result<(), NotifyError> {
        tracing::info!(
            recipients = ?self.recipients,
            attachment = attachment_filename(org_name, key_id),
            size = file_body.len(),
            "license file delivery (log only, no transport configured)"
        );
        Ok(())
    }
}

/// A delivery captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Message { subject: String, body: String },
    File { name: String, body: Vec<u8> },
}

/// Test double that captures every delivery for later assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    recipients: Vec<String>,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipients: collect_recipients(addresses),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Everything delivered so far.
    pub fn deliveries(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

/// Factory whose notifiers all share one recorder, so tests can assert on
/// deliveries no matter which recipient list a caller requested.
#[derive(Default)]
pub struct RecordingNotifierFactory {
    recorder: Arc<RecordingNotifier>,
    requested: Mutex<Vec<Vec<String>>>,
}

impl RecordingNotifierFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared recorder behind every notifier this factory handed out.
    pub fn recorder(&self) -> Arc<RecordingNotifier> {
        self.recorder.clone()
    }

    /// Every recipient list callers asked for, in order.
    pub fn requested_recipients(&self) -> Vec<Vec<String>> {
        self.requested.lock().clone()
    }
}

impl NotifierFactory for RecordingNotifierFactory {
    fn for_recipients(&self, addresses: &[String]) -> Arc<dyn Notifier> {
        self.requested
            .lock()
            .push(collect_recipients(addresses.iter().cloned()));
        self.recorder.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn recipients(&self) -> &[String] {
        &self.recipients
    }

    async fn send_message(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        self.sent.lock().push(Sent::Message {
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn send_file(
        &self,
        org_name: &str,
        key_id: &str,
        file_body: &[u8],
    ) -> Result<(), NotifyError> {
        self.sent.lock().push(Sent::File {
            name: attachment_filename(org_name, key_id),
            body: file_body.to_vec(),
        });
        Ok(())
    }
}
