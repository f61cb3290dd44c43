//! Signing pipeline: from a key's current license set to a signed,
//! history-tracked license file.
//!
//! The cryptography lives in an external encoder executable whose behavior
//! is opaque here; this module owns the handoff. The encoder is abstracted
//! behind [`LicenseSigner`] so tests inject a double instead of spawning
//! processes, and the real [`EncoderSigner`] enforces an explicit timeout —
//! a hung encoder fails the operation instead of blocking it forever.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;

use keyward_core::model::LicenseSetItem;
use keyward_store::EntitlementStore;
use keyward_wire::{render, reorder, ServerInfo, WireEntry, SERVER_PORT};

use crate::EngineError;

/// External signer failure.
#[derive(Error, Debug)]
pub enum SignError {
    /// The encoder wrote to stderr; the diagnostic text is passed through.
    #[error("encoder reported errors: {0}")]
    Encoder(String),

    /// The encoder did not finish within the configured budget.
    #[error("encoder timed out after {0:?}")]
    Timeout(Duration),

    /// Spawning or talking to the encoder process failed.
    #[error("failed to run encoder: {0}")]
    Io(#[from] std::io::Error),
}

/// The external signer collaborator: canonical XML bytes in, signed bytes
/// out, or a diagnostic error.
#[async_trait]
pub trait LicenseSigner: Send + Sync {
    async fn sign(&self, xml: &[u8], secrets: &Path) -> Result<Vec<u8>, SignError>;
}

/// Signs license files by running the encoder executable:
/// `<program> -i <xml file> -s <secrets file>`.
pub struct EncoderSigner {
    program: PathBuf,
    timeout: Duration,
}

impl EncoderSigner {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl LicenseSigner for EncoderSigner {
    async fn sign(&self, xml: &[u8], secrets: &Path) -> Result<Vec<u8>, SignError> {
        // The encoder reads its input from a file, not stdin.
        let mut input = tempfile::NamedTempFile::new()?;
        input.write_all(xml)?;
        input.flush()?;

        let output = Command::new(&self.program)
            .arg("-i")
            .arg(input.path())
            .arg("-s")
            .arg(secrets)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| SignError::Timeout(self.timeout))??;

        if !output.stderr.is_empty() {
            return Err(SignError::Encoder(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(output.stdout)
    }
}

/// Orchestrates issuance: wire document assembly, signing, and the
/// append-only history record.
pub struct LicenseIssuer {
    store: Arc<dyn EntitlementStore>,
    signer: Arc<dyn LicenseSigner>,
    secrets: PathBuf,
}

impl LicenseIssuer {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        signer: Arc<dyn LicenseSigner>,
        secrets: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            signer,
            secrets: secrets.into(),
        }
    }

    /// Generate, sign, and record the license file for a key.
    ///
    /// Fails with [`EngineError::KeyNotOwned`] when the key is registered
    /// to a different organization, and with *unknown-feature* when a
    /// license-set row references a catalog name that no longer exists.
    pub async fn issue(&self, org_id: i64, key_id: &str) -> Result<String, EngineError> {
        if !self.store.key_belongs_to_org(key_id, org_id).await? {
            return Err(EngineError::KeyNotOwned {
                key_id: key_id.to_string(),
                org_id,
            });
        }

        let set = self.store.license_set(key_id).await?;
        let entries = self.wire_entries(&set).await?;
        let server = ServerInfo {
            port: SERVER_PORT,
            id: key_id.to_string(),
        };
        let xml = render(&server, &entries);

        let signed = self.signer.sign(xml.as_bytes(), &self.secrets).await?;
        let signed = String::from_utf8_lossy(&signed).into_owned();

        self.store.append_history(org_id, Utc::now(), &signed).await?;
        tracing::info!(key_id, org_id, bytes = signed.len(), "license file issued");
        Ok(signed)
    }

    /// Resolve each license-set row against the catalog and put the
    /// resulting entries into canonical order (leaf features first).
    async fn wire_entries(&self, set: &[LicenseSetItem]) -> Result<Vec<WireEntry>, EngineError> {
        let mut entries = Vec::with_capacity(set.len());
        for item in set {
            let catalog = self.store.catalog_entry(&item.feature).await?;
            entries.push(WireEntry::from_item(item, &catalog));
        }
        reorder(&mut entries);
        Ok(entries)
    }
}
