//! Core domain types used throughout the supervisor framework.
//!
//! Names arriving over IPC are validated once, at construction, so the
//! rest of the framework only ever sees well-formed values.  A name that
//! fails validation is a [`Violation`]: fatal to the calling client
//! session, not to the supervisor.

use crate::errors::{ClientResult, Violation};
use crate::limits::{MAX_APP_NAME_BYTES, MAX_PROC_NAME_BYTES};
use serde::{Deserialize, Serialize};
use std::fmt;

fn validate_name(kind: &str, name: &str, max_bytes: usize) -> ClientResult<()> {
    if name.is_empty() {
        return Err(Violation::new(format!("{kind} name cannot be empty")));
    }

    if name.contains('/') {
        return Err(Violation::new(format!(
            "{kind} name '{name}' contains illegal character '/'"
        )));
    }

    if name.len() > max_bytes {
        return Err(Violation::new(format!(
            "{kind} name '{name}' is longer than {max_bytes} bytes"
        )));
    }

    Ok(())
}

/// Application name - uniquely identifies an installed application.
///
/// # Example
/// ```
/// use sup_common::AppName;
///
/// let name = AppName::new("modemService").unwrap();
/// assert_eq!(name.as_str(), "modemService");
/// assert!(AppName::new("bad/name").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppName(String);

impl AppName {
    /// Creates a validated AppName.
    pub fn new(name: impl Into<String>) -> ClientResult<Self> {
        let name = name.into();
        validate_name("app", &name, MAX_APP_NAME_BYTES)?;
        Ok(Self(name))
    }

    /// Returns the app name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process name - identifies a process within an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcName(String);

impl ProcName {
    /// Creates a validated ProcName.
    pub fn new(name: impl Into<String>) -> ClientResult<Self> {
        let name = name.into();
        validate_name("process", &name, MAX_PROC_NAME_BYTES)?;
        Ok(Self(name))
    }

    /// Returns the process name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// IPC session identifier.
///
/// Issued by the IPC layer; the supervisor only ever compares these, it
/// never inspects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u32);

impl SessionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}
