//! # Validation Errors
//!
//! Errors raised while checking caller input, before anything touches
//! storage. Structured with `thiserror`; each variant carries the offending
//! value so operators can diagnose a rejected request from the log line
//! alone.

use thiserror::Error;

/// Input validation failure.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A date string could not be parsed in the expected format.
    #[error("invalid date: \"{value}\" ({reason})")]
    InvalidDate {
        /// The string that failed to parse.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A prolongation was requested without a usable target: neither an
    /// absolute end date nor a positive month count.
    #[error("extension term must be a date or a positive number of months")]
    MissingRenewalTerm,

    /// A month count that is zero or negative.
    #[error("invalid extension term ({0} months)")]
    NonPositiveMonths(i64),

    /// A numeric field that must be strictly positive.
    #[error("{field} must be positive, got {value}")]
    NonPositive {
        /// The rejected field name.
        field: &'static str,
        /// The rejected value.
        value: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_offending_value() {
        let err = ValidationError::InvalidDate {
            value: "31.13.2026".to_string(),
            reason: "input is out of range".to_string(),
        };
        assert!(err.to_string().contains("31.13.2026"));

        assert!(ValidationError::NonPositiveMonths(-3)
            .to_string()
            .contains("-3"));

        let err = ValidationError::NonPositive {
            field: "count",
            value: 0,
        };
        assert!(err.to_string().contains("count"));
    }
}
