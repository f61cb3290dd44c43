//! # keyward-engine — Entitlement Engine
//!
//! The rules that transform license sets, built on the store contract:
//!
//! - [`renew`] — prolongation and seat-count adjustment: compute a new
//!   license set from the current one and write it back as an atomic full
//!   replace
//! - [`issue`] — the signing pipeline: assemble the wire document for a
//!   key, run it through the external encoder, and append the artifact to
//!   issuance history
//! - [`scan`] — the daily expiry scanner: aggregate soon-to-expire
//!   entitlements per key and hand the rendered report to the notification
//!   collaborator
//!
//! Every operation reads, computes, and writes through
//! [`keyward_store::EntitlementStore`]; nothing here holds state between
//! calls.

pub mod issue;
pub mod renew;
pub mod scan;

use thiserror::Error;

use keyward_core::ValidationError;
use keyward_store::StoreError;
use keyward_wire::WireError;

pub use issue::{EncoderSigner, LicenseIssuer, LicenseSigner, SignError};
pub use renew::{CountAdjustment, Prolongation, RenewalTerm};
pub use scan::{ExpiryReport, ExpiryScanner, ScannerConfig};

/// Engine operation failure.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Caller input rejected before any storage mutation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Storage failure, including not-found and conflict conditions.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Wire codec failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// External signer failure.
    #[error(transparent)]
    Sign(#[from] SignError),

    /// Notification delivery failure.
    #[error(transparent)]
    Notify(#[from] keyward_notify::NotifyError),

    /// The key is registered to a different organization than the caller
    /// named.
    #[error("key {key_id} does not belong to organization {org_id}")]
    KeyNotOwned { key_id: String, org_id: i64 },
}
