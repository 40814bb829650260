// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for virtnet record handling
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// Record could not be encoded or decoded
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(virtnet::serialization_error),
        help("Ensure the record is valid JSON or YAML and uses the expected field names")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Record is structurally valid but unusable
    #[error("Invalid record: {reason}")]
    #[diagnostic(code(virtnet::invalid_record), help("{suggestion}"))]
    InvalidRecord {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(virtnet::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InvalidRecord error
    pub fn invalid_record(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
