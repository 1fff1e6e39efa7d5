//! Custom error types for the application.
//!
//! This module defines the primary error type, `SweepError`, for the whole run.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the run-level failures a measurement campaign can hit, from
//! configuration parsing to writing the final reports.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches in the settings file.
//! - **`Configuration`**: A malformed test specification (invalid range, wrong
//!   types, empty lists). Reported before any instrument contact; only the
//!   offending spec is skipped.
//! - **`FamilyInit`**: The instrument sessions for a measurement family could
//!   not be established. Aborts that family only.
//! - **`Io`**, **`Json`**, **`Csv`**: Output and input plumbing.
//!
//! Unit-execution failures are deliberately *not* represented here: they are
//! captured inline as error-bearing measurement results.

use crate::measurement::Family;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SweepError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("{family} session initialization failed: {message}")]
    FamilyInit { family: Family, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<figment::Error> for SweepError {
    fn from(value: figment::Error) -> Self {
        SweepError::Config(Box::new(value))
    }
}

impl SweepError {
    /// Shorthand for a test-specification error.
    pub fn configuration(message: impl Into<String>) -> Self {
        SweepError::Configuration(message.into())
    }

    /// Whether this error is scoped to a single test specification.
    pub fn is_spec_scoped(&self) -> bool {
        matches!(self, SweepError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_init_message_names_family() {
        let err = SweepError::FamilyInit {
            family: Family::Nr5g,
            message: "connection refused".into(),
        };
        let text = err.to_string();
        assert!(text.contains("NR5G"));
        assert!(text.contains("connection refused"));
        assert!(!err.is_spec_scoped());
    }

    #[test]
    fn configuration_errors_are_spec_scoped() {
        let err = SweepError::configuration("step must be positive");
        assert!(err.is_spec_scoped());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: step must be positive"
        );
    }
}
