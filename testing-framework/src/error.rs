//! Harness failure taxonomy
//!
//! Every way a scenario step can fail maps onto one variant here. Nothing is
//! downgraded to a warning: a step either completes its contract or returns
//! one of these.

use std::time::Duration;

use thiserror::Error;

use crate::ledger::LedgerError;

/// Scenario step failure
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A step read a context field no earlier step populated
    #[error("scenario context has no {field}; a preceding step must set it")]
    MissingContext { field: String },

    /// A fixture could not establish its precondition
    #[error("precondition failed for {subject}: expected {expected}, got {actual}")]
    Precondition {
        subject: String,
        expected: String,
        actual: String,
    },

    /// Queried state differs from the expectation
    #[error("assertion failed for {subject}: expected {expected}, got {actual}")]
    Mismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    /// An operation declared to fail was accepted
    #[error("expected {operation} to fail, but it succeeded")]
    UnexpectedSuccess { operation: String },

    /// A step or subscription exceeded its time budget
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl HarnessError {
    pub fn missing(field: impl Into<String>) -> Self {
        HarnessError::MissingContext {
            field: field.into(),
        }
    }

    pub fn precondition(
        subject: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        HarnessError::Precondition {
            subject: subject.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn mismatch(
        subject: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        HarnessError::Mismatch {
            subject: subject.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result alias for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_expected_and_actual() {
        let err = HarnessError::precondition("hbar balance of 0.0.1001", "> 10 ℏ", "2 ℏ");
        assert_eq!(
            err.to_string(),
            "precondition failed for hbar balance of 0.0.1001: expected > 10 ℏ, got 2 ℏ"
        );

        let err = HarnessError::missing("token id");
        assert!(err.to_string().contains("no token id"));
    }
}
