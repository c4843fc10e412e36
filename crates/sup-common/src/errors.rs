//! Error types for the supervisor framework.
//!
//! Two distinct failure channels exist:
//!
//! - [`Error`] covers operational failures.  Only the coarse
//!   [`ResultCode`] derived from it is visible to IPC clients; structured
//!   details go to the logs.
//! - [`Violation`] covers client-protocol violations (empty names, stale
//!   references, out-of-range parameters).  A violation is fatal to the
//!   calling client session, never to the supervisor itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for operations that can fail with a client-protocol
/// violation.
pub type ClientResult<T> = std::result::Result<T, Violation>;

/// Main error type for supervisor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A requested resource was not found.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// The resource already exists or the operation was already applied.
    #[error("duplicate: {resource}")]
    Duplicate { resource: String },

    /// A value did not fit in the buffer provided by the caller.
    #[error("overflow: {message}")]
    Overflow { message: String },

    /// Invalid input.
    #[error("bad parameter: {message}")]
    BadParameter { message: String },

    /// Any other operational failure.
    #[error("fault: {message}")]
    Fault { message: String },

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a NotFound error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a Duplicate error.
    pub fn duplicate(resource: impl Into<String>) -> Self {
        Self::Duplicate {
            resource: resource.into(),
        }
    }

    /// Creates an Overflow error.
    pub fn overflow(message: impl Into<String>) -> Self {
        Self::Overflow {
            message: message.into(),
        }
    }

    /// Creates a BadParameter error.
    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::BadParameter {
            message: message.into(),
        }
    }

    /// Creates a Fault error.
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }

    /// The coarse result code visible to IPC clients.
    pub fn code(&self) -> ResultCode {
        match self {
            Error::NotFound { .. } => ResultCode::NotFound,
            Error::Duplicate { .. } => ResultCode::Duplicate,
            Error::Overflow { .. } => ResultCode::Overflow,
            Error::BadParameter { .. } => ResultCode::BadParameter,
            Error::Fault { .. } | Error::Io(_) => ResultCode::Fault,
        }
    }
}

/// Coarse result code carried over the IPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Ok,
    Fault,
    NotFound,
    Overflow,
    BadParameter,
    Duplicate,
}

impl ResultCode {
    /// Collapses an operation result into its wire-level code.
    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ResultCode::Ok,
            Err(e) => e.code(),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Ok => write!(f, "ok"),
            ResultCode::Fault => write!(f, "fault"),
            ResultCode::NotFound => write!(f, "not_found"),
            ResultCode::Overflow => write!(f, "overflow"),
            ResultCode::BadParameter => write!(f, "bad_parameter"),
            ResultCode::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// A client-protocol violation.
///
/// The IPC layer terminates the offending client session when one of
/// these surfaces; the supervisor itself carries on.
#[derive(Debug, Error)]
#[error("client protocol violation: {0}")]
pub struct Violation(String);

impl Violation {
    /// Creates a new violation with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// The reason this violation was raised.
    pub fn reason(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::not_found("app 'foo'");
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(err.to_string(), "not found: app 'foo'");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::not_found("x").code(), ResultCode::NotFound);
        assert_eq!(Error::duplicate("x").code(), ResultCode::Duplicate);
        assert_eq!(Error::overflow("x").code(), ResultCode::Overflow);
        assert_eq!(Error::bad_parameter("x").code(), ResultCode::BadParameter);
        assert_eq!(Error::fault("x").code(), ResultCode::Fault);

        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.code(), ResultCode::Fault);
    }

    #[test]
    fn test_result_code_from_result() {
        assert_eq!(ResultCode::from_result(&Ok(())), ResultCode::Ok);
        assert_eq!(
            ResultCode::from_result::<()>(&Err(Error::fault("x"))),
            ResultCode::Fault
        );
    }

    #[test]
    fn test_violation_reason() {
        let v = Violation::new("app name cannot be empty");
        assert_eq!(v.reason(), "app name cannot be empty");
        assert!(v.to_string().contains("violation"));
    }
}
