//! Error types for the vspace address-space core.
//!
//! Boundary conditions (unmapped reads, zero-length decodes, writes past a
//! segment) are reported through sentinel return values and never reach this
//! type. `VspaceError` is reserved for contract violations, parse failures and
//! I/O problems that the caller must act on.

use thiserror::Error;

/// Main error type for vspace operations.
#[derive(Debug, Error)]
pub enum VspaceError {
    /// A caller passed an argument that violates the API contract
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Inserting a segment would overlap another segment of the same provenance
    #[error("Segment [{start:#x}, {end:#x}) overlaps an existing segment")]
    SegmentOverlap { start: u64, end: u64 },

    /// Lookup by key failed where the operation requires an existing record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Type string could not be parsed
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// Named type references form a loop
    #[error("Type reference cycle through '{name}'")]
    TypeCycle { name: String },

    /// Architecture not supported by any registered backend
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// Operation requires a default architecture and none is set
    #[error("No default architecture set for this address space")]
    MissingArchitecture,

    /// Storage accessor failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation did not finish in time
    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    /// Observer callback failed
    #[error("Observer error: {message}")]
    Observer { message: String },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for vspace operations
pub type Result<T> = std::result::Result<T, VspaceError>;

impl VspaceError {
    /// True for errors raised before any mutation took place.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            VspaceError::InvalidArgument(_)
                | VspaceError::SegmentOverlap { .. }
                | VspaceError::MissingArchitecture
                | VspaceError::UnsupportedArchitecture(_)
        )
    }
}

impl From<serde_json::Error> for VspaceError {
    fn from(err: serde_json::Error) -> Self {
        VspaceError::Serialization(err.to_string())
    }
}

/// Convert vspace errors to PyO3 exceptions
#[cfg(feature = "python-ext")]
impl From<VspaceError> for pyo3::PyErr {
    fn from(err: VspaceError) -> pyo3::PyErr {
        use pyo3::exceptions::{
            PyException, PyIOError, PyKeyError, PySyntaxError, PyTimeoutError, PyValueError,
        };

        match err {
            VspaceError::Io(e) => PyIOError::new_err(e.to_string()),
            VspaceError::Timeout { seconds } => {
                PyTimeoutError::new_err(format!("Operation timed out after {}s", seconds))
            }
            VspaceError::Parse { message } => PySyntaxError::new_err(message),
            VspaceError::NotFound(msg) => PyKeyError::new_err(msg),
            VspaceError::InvalidArgument(msg) => PyValueError::new_err(msg),
            _ => PyException::new_err(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VspaceError::InvalidArgument("empty name component".to_string());
        assert_eq!(err.to_string(), "Invalid argument: empty name component");

        let err = VspaceError::SegmentOverlap {
            start: 0x1000,
            end: 0x2000,
        };
        assert_eq!(
            err.to_string(),
            "Segment [0x1000, 0x2000) overlaps an existing segment"
        );
    }

    #[test]
    fn test_contract_violation_classification() {
        assert!(VspaceError::MissingArchitecture.is_contract_violation());
        assert!(!VspaceError::Parse {
            message: "x".into()
        }
        .is_contract_violation());
    }

    #[test]
    fn test_json_error_conversion() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: VspaceError = bad.unwrap_err().into();
        assert!(matches!(err, VspaceError::Serialization(_)));
    }
}
