//! # keyward-core — Foundational Types for Keyward
//!
//! Keyward issues and tracks software entitlements bound to hardware-locked
//! keys. This crate holds the domain model shared by every other crate in
//! the workspace:
//!
//! - [`model`] — organizations, hardware keys, the feature/package catalog,
//!   license-set entries, and issuance history records
//! - [`calendar`] — the calendar rules: wire date format, month arithmetic
//!   for prolongation, and the expiry-scan window
//! - [`error`] — validation errors raised before anything touches storage
//!
//! Higher layers (store, engine, API) operate on these types by value and
//! never retain cross-call state.

pub mod calendar;
pub mod error;
pub mod model;

pub use calendar::{add_months, expiry_window, format_wire_date, parse_wire_date, WIRE_DATE_FORMAT};
pub use error::ValidationError;
pub use model::{
    CatalogEntry, Feature, HardwareKey, IssuanceHistoryItem, LicenseSetItem, Organization,
    CONSOLE_FEATURE,
};
