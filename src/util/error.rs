//! Error and result types shared by every bake layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::device::Backend;

/// Main error type for bake operations.
///
/// Every variant maps to exactly one non-success [`ResultKind`], so a
/// [`BakeResult`] can be produced from any `Result` without losing the kind.
#[derive(Error, Debug)]
pub enum Error {
    /// Cooperative cancellation was honored
    #[error("Bake cancelled")]
    Cancelled,

    /// Integration kernel failed internally
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Host or device allocation failed
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Malformed bake input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Device or driver error
    #[error("Low level API failure: {0}")]
    LowLevelApiFailure(String),

    /// Buffer readback/write-back or serialization failed
    #[error("I/O failed: {0}")]
    IoFailed(String),

    /// Context passed to an object created for another backend
    #[error("Backend mismatch: expected {expected}, got {actual}")]
    BackendMismatch { expected: Backend, actual: Backend },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a job failure.
    pub fn job(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a device/driver error.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::LowLevelApiFailure(msg.into())
    }

    /// Create a transfer error.
    pub fn io_failed(msg: impl Into<String>) -> Self {
        Self::IoFailed(msg.into())
    }

    /// Outcome kind this error reports as.
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Cancelled => ResultKind::Cancelled,
            Self::JobFailed(_) => ResultKind::JobFailed,
            Self::OutOfMemory(_) => ResultKind::OutOfMemory,
            Self::InvalidInput(_) | Self::BackendMismatch { .. } | Self::Json(_) => {
                ResultKind::InvalidInput
            }
            Self::LowLevelApiFailure(_) => ResultKind::LowLevelApiFailure,
            Self::IoFailed(_) | Self::Io(_) => ResultKind::IoFailed,
        }
    }
}

/// Result type alias for bake operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome kind of a bake or integration operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultKind {
    Success = 0,
    Cancelled = 1,
    JobFailed = 2,
    OutOfMemory = 3,
    InvalidInput = 4,
    LowLevelApiFailure = 5,
    IoFailed = 6,
    /// Never produced by a completed operation
    #[default]
    Undefined = 255,
}

impl ResultKind {
    /// Decode from the wire byte. Unknown values decode as `Undefined`.
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Success,
            1 => Self::Cancelled,
            2 => Self::JobFailed,
            3 => Self::OutOfMemory,
            4 => Self::InvalidInput,
            5 => Self::LowLevelApiFailure,
            6 => Self::IoFailed,
            _ => Self::Undefined,
        }
    }
}

/// Immutable tagged outcome with an optional human-readable message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakeResult {
    kind: ResultKind,
    message: Option<String>,
}

impl BakeResult {
    /// Build a result of the given kind.
    pub fn new(kind: ResultKind, message: Option<String>) -> Self {
        Self { kind, message }
    }

    /// Successful outcome without message.
    pub fn success() -> Self {
        Self::new(ResultKind::Success, None)
    }

    pub fn kind(&self) -> ResultKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.kind == ResultKind::Success
    }
}

impl From<&Error> for BakeResult {
    fn from(err: &Error) -> Self {
        Self::new(err.kind(), Some(err.to_string()))
    }
}

impl<T> From<&Result<T>> for BakeResult {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::success(),
            Err(e) => e.into(),
        }
    }
}

impl fmt::Display for BakeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{:?}: {}", self.kind, msg),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::BackendMismatch {
            expected: Backend::Reference,
            actual: Backend::Jobs,
        };
        assert!(e.to_string().contains("reference"));
        assert!(e.to_string().contains("jobs"));
        assert_eq!(e.kind(), ResultKind::InvalidInput);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ResultKind::IoFailed);
    }

    #[test]
    fn test_result_from_outcome() {
        let ok: Result<u32> = Ok(3);
        assert!(BakeResult::from(&ok).is_success());

        let cancelled: Result<u32> = Err(Error::Cancelled);
        let report = BakeResult::from(&cancelled);
        assert_eq!(report.kind(), ResultKind::Cancelled);
        assert!(report.message().is_some());
    }

    #[test]
    fn test_kind_wire_values() {
        for kind in [
            ResultKind::Success,
            ResultKind::Cancelled,
            ResultKind::JobFailed,
            ResultKind::OutOfMemory,
            ResultKind::InvalidInput,
            ResultKind::LowLevelApiFailure,
            ResultKind::IoFailed,
        ] {
            assert_eq!(ResultKind::from_u8(kind as u8), kind);
        }
        assert_eq!(ResultKind::from_u8(42), ResultKind::Undefined);
    }
}
